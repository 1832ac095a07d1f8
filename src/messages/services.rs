use std::collections::HashMap;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{Conversation, MarkReadResponse, MessageView, UnreadCount};
use super::repo_types::{Message, NewMessage};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::users::dto::UserSummary;

/// Per-counterparty digest before user lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationDigest {
    pub partner: Uuid,
    pub last_message: Message,
    pub unread_count: u64,
}

/// Groups `messages` (any order) by the other participant. The newest message
/// wins; ties keep the later one in input order. Unread counts only inbound
/// messages. Result is sorted newest conversation first.
pub fn group_conversations(me: Uuid, messages: &[Message]) -> Vec<ConversationDigest> {
    let mut by_partner: HashMap<Uuid, ConversationDigest> = HashMap::new();
    for m in messages {
        let partner = if m.sender_id == me {
            m.receiver_id
        } else if m.receiver_id == me {
            m.sender_id
        } else {
            continue;
        };
        let unread = u64::from(m.receiver_id == me && !m.read);
        by_partner
            .entry(partner)
            .and_modify(|d| {
                if m.created_at >= d.last_message.created_at {
                    d.last_message = m.clone();
                }
                d.unread_count += unread;
            })
            .or_insert_with(|| ConversationDigest {
                partner,
                last_message: m.clone(),
                unread_count: unread,
            });
    }
    let mut out: Vec<_> = by_partner.into_values().collect();
    out.sort_by(|a, b| {
        b.last_message
            .created_at
            .cmp(&a.last_message.created_at)
            .then_with(|| a.partner.cmp(&b.partner))
    });
    out
}

async fn summaries(state: &AppState, ids: &mut Vec<Uuid>) -> ApiResult<HashMap<Uuid, UserSummary>> {
    ids.sort_unstable();
    ids.dedup();
    Ok(state
        .store
        .find_users(ids)
        .await?
        .iter()
        .map(|u| (u.id, UserSummary::from(u)))
        .collect())
}

async fn attach_people(state: &AppState, messages: Vec<Message>) -> ApiResult<Vec<MessageView>> {
    let mut ids: Vec<Uuid> = messages
        .iter()
        .flat_map(|m| [m.sender_id, m.receiver_id])
        .collect();
    let people = summaries(state, &mut ids).await?;
    Ok(messages
        .into_iter()
        .map(|message| MessageView {
            sender: people.get(&message.sender_id).cloned(),
            receiver: people.get(&message.receiver_id).cloned(),
            message,
        })
        .collect())
}

fn clean_content(content: &str) -> ApiResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ApiError::validation("Message content is required"));
    }
    Ok(content.to_string())
}

async fn deliver(
    state: &AppState,
    sender_id: Uuid,
    receiver_id: Uuid,
    content: String,
    job_id: Option<Uuid>,
) -> ApiResult<MessageView> {
    if receiver_id == sender_id {
        return Err(ApiError::validation("Cannot send a message to yourself"));
    }
    if state.store.find_user(receiver_id).await?.is_none() {
        warn!(%receiver_id, "message to unknown receiver");
        return Err(ApiError::NotFound("Receiver"));
    }
    let message = state
        .store
        .insert_message(NewMessage {
            sender_id,
            receiver_id,
            content,
            job_id,
        })
        .await?;
    info!(message_id = %message.id, %sender_id, %receiver_id, job_id = ?job_id, "message sent");
    attach_people(state, vec![message])
        .await?
        .pop()
        .ok_or(ApiError::NotFound("Message"))
}

#[instrument(skip(state, content))]
pub async fn send_message(
    state: &AppState,
    sender_id: Uuid,
    receiver_id: Uuid,
    content: &str,
) -> ApiResult<MessageView> {
    let content = clean_content(content)?;
    deliver(state, sender_id, receiver_id, content, None).await
}

/// Job-scoped send. Without an explicit receiver the message goes to the
/// other party of the job.
#[instrument(skip(state, content))]
pub async fn send_job_message(
    state: &AppState,
    sender_id: Uuid,
    job_id: Option<Uuid>,
    receiver_id: Option<Uuid>,
    content: &str,
) -> ApiResult<MessageView> {
    let content = clean_content(content)?;
    let job_id = job_id.ok_or_else(|| ApiError::validation("Job ID is required"))?;
    let job = state
        .store
        .find_job(job_id)
        .await?
        .ok_or(ApiError::NotFound("Job"))?;

    let receiver_id = match receiver_id {
        Some(id) => id,
        None if sender_id == job.buyer_id => job
            .seller_id
            .ok_or_else(|| ApiError::validation("Job has no seller yet; receiver is required"))?,
        None => job.buyer_id,
    };
    deliver(state, sender_id, receiver_id, content, Some(job_id)).await
}

#[instrument(skip(state))]
pub async fn list_conversations(state: &AppState, user_id: Uuid) -> ApiResult<Vec<Conversation>> {
    let messages = state.store.messages_involving(user_id).await?;
    let digests = group_conversations(user_id, &messages);

    let mut ids: Vec<Uuid> = digests.iter().map(|d| d.partner).collect();
    let people = summaries(state, &mut ids).await?;

    // Conversations with deleted users are dropped.
    Ok(digests
        .into_iter()
        .filter_map(|d| {
            people.get(&d.partner).map(|user| Conversation {
                user: user.clone(),
                last_message: d.last_message,
                unread_count: d.unread_count,
            })
        })
        .collect())
}

#[instrument(skip(state))]
pub async fn thread(state: &AppState, me: Uuid, other: Uuid) -> ApiResult<Vec<MessageView>> {
    let messages = state.store.thread(me, other).await?;
    attach_people(state, messages).await
}

#[instrument(skip(state))]
pub async fn mark_read(state: &AppState, me: Uuid, from: Uuid) -> ApiResult<MarkReadResponse> {
    let updated = state.store.mark_read(from, me).await?;
    info!(%me, %from, updated, "messages marked as read");
    Ok(MarkReadResponse {
        msg: "Messages marked as read".into(),
        updated,
    })
}

pub async fn unread_count(state: &AppState, me: Uuid) -> ApiResult<UnreadCount> {
    Ok(UnreadCount {
        count: state.store.unread_count(me).await?,
    })
}

/// The job's buyer and assigned seller see every message; anyone else only
/// the messages they sent or received.
#[instrument(skip(state))]
pub async fn list_job_messages(
    state: &AppState,
    me: Uuid,
    job_id: Uuid,
) -> ApiResult<Vec<MessageView>> {
    let job = state
        .store
        .find_job(job_id)
        .await?
        .ok_or(ApiError::NotFound("Job"))?;
    let party = job.buyer_id == me || job.seller_id == Some(me);
    let messages = state
        .store
        .job_messages(job_id)
        .await?
        .into_iter()
        .filter(|m| party || m.sender_id == me || m.receiver_id == me)
        .collect();
    attach_people(state, messages).await
}
