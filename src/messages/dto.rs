use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::repo_types::Message;
use crate::users::dto::UserSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(alias = "receiverId")]
    pub receiver: Uuid,
    pub content: String,
}

/// Job-scoped send. `receiver` defaults to the other party of the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendJobMessageRequest {
    pub job_id: Option<Uuid>,
    #[serde(default, alias = "receiverId")]
    pub receiver: Option<Uuid>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Option<UserSummary>,
    pub receiver: Option<UserSummary>,
}

/// One entry per counterparty: the latest message and how many of theirs are
/// still unread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub user: UserSummary,
    pub last_message: Message,
    pub unread_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub msg: String,
    pub updated: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnreadCount {
    pub count: i64,
}
