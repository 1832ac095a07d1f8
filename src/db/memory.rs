use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ExpertiseRewrite, Store, StoreError, StoreResult};
use crate::jobs::repo_types::{Job, JobPurge, JobStatus, NewJob};
use crate::messages::repo_types::{Message, NewMessage};
use crate::users::repo_types::{
    ClientRecord, NewUser, PaymentCard, Profile, ProfilePatch, Role, SellerPatch, SellerRecord,
    User,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    clients: HashMap<Uuid, ClientRecord>,
    sellers: HashMap<Uuid, SellerRecord>,
    profiles: HashMap<Uuid, Profile>,
    // Insertion order doubles as the tie-breaker for equal timestamps.
    jobs: Vec<Job>,
    messages: Vec<Message>,
}

impl Tables {
    fn check_unique(&self, skip: Option<Uuid>, user: &UniqueKeys<'_>) -> StoreResult<()> {
        for existing in self.users.values().filter(|u| Some(u.id) != skip) {
            if let Some(email) = user.email {
                if existing.email == email {
                    return Err(StoreError::Duplicate("email"));
                }
            }
            if let Some(username) = user.username {
                if existing.username == username {
                    return Err(StoreError::Duplicate("username"));
                }
            }
            if let (Some(ext), Some(existing_ext)) = (user.external_id, &existing.external_id) {
                if existing_ext == ext {
                    return Err(StoreError::Duplicate("external_id"));
                }
            }
        }
        Ok(())
    }

    fn ensure_extension(&mut self, user_id: Uuid, role: Role) {
        match role {
            Role::Client => {
                self.clients.entry(user_id).or_insert_with(|| ClientRecord {
                    user_id,
                    payment_cards: Vec::new(),
                });
            }
            Role::Seller => {
                self.sellers
                    .entry(user_id)
                    .or_insert_with(|| SellerRecord::new(user_id));
            }
            Role::Pending => {}
        }
    }

    fn remove_user(&mut self, user_id: Uuid) {
        self.users.remove(&user_id);
        self.clients.remove(&user_id);
        self.sellers.remove(&user_id);
        self.profiles.remove(&user_id);
        let dropped: Vec<Uuid> = self
            .jobs
            .iter()
            .filter(|j| j.buyer_id == user_id)
            .map(|j| j.id)
            .collect();
        self.jobs.retain(|j| j.buyer_id != user_id);
        for job in self.jobs.iter_mut().filter(|j| j.seller_id == Some(user_id)) {
            job.seller_id = None;
        }
        self.messages
            .retain(|m| m.sender_id != user_id && m.receiver_id != user_id);
        // ON DELETE SET NULL
        for m in self.messages.iter_mut() {
            if m.job_id.is_some_and(|id| dropped.contains(&id)) {
                m.job_id = None;
            }
        }
    }

    /// Jobs newest first, matching `ORDER BY created_at DESC`.
    fn jobs_where(&self, pred: impl Fn(&Job) -> bool) -> Vec<Job> {
        let mut out: Vec<Job> = self.jobs.iter().filter(|j| pred(j)).cloned().collect();
        out.reverse();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    fn messages_where(&self, pred: impl Fn(&Message) -> bool) -> Vec<Message> {
        let mut out: Vec<Message> = self.messages.iter().filter(|m| pred(m)).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }
}

/// Current time, nudged past `prev` so insertion order and timestamp order agree.
fn after(prev: Option<OffsetDateTime>) -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    match prev {
        Some(p) if p >= now => p + time::Duration::nanoseconds(1),
        _ => now,
    }
}

struct UniqueKeys<'a> {
    email: Option<&'a str>,
    username: Option<&'a str>,
    external_id: Option<&'a str>,
}

/// In-process store with the same observable semantics as `PgStore`.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_account(&self, new: NewUser) -> StoreResult<User> {
        let mut t = self.tables.write().await;
        t.check_unique(
            None,
            &UniqueKeys {
                email: Some(&new.email),
                username: Some(&new.username),
                external_id: new.external_id.as_deref(),
            },
        )?;
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            full_name: new.full_name,
            email: new.email,
            password_hash: new.password_hash,
            role: new.role,
            external_id: new.external_id,
            profile_image: new.profile_image,
            profile_completed: new.profile_completed,
            created_at: OffsetDateTime::now_utc(),
        };
        t.ensure_extension(user.id, user.role);
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_user_by_external_id(&self, external_id: &str) -> StoreResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t
            .users
            .values()
            .find(|u| u.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn find_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        let t = self.tables.read().await;
        Ok(ids.iter().filter_map(|id| t.users.get(id).cloned()).collect())
    }

    async fn list_users_by_role(&self, role: Role) -> StoreResult<Vec<User>> {
        let t = self.tables.read().await;
        let mut users: Vec<User> = t.users.values().filter(|u| u.role == role).cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    async fn link_external_id(
        &self,
        user_id: Uuid,
        external_id: &str,
        profile_image: Option<&str>,
    ) -> StoreResult<Option<User>> {
        let mut t = self.tables.write().await;
        t.check_unique(
            Some(user_id),
            &UniqueKeys {
                email: None,
                username: None,
                external_id: Some(external_id),
            },
        )?;
        let Some(user) = t.users.get_mut(&user_id) else {
            return Ok(None);
        };
        user.external_id = Some(external_id.to_string());
        if user.profile_image.is_none() {
            user.profile_image = profile_image.map(str::to_string);
        }
        Ok(Some(user.clone()))
    }

    async fn complete_profile(
        &self,
        user_id: Uuid,
        username: &str,
        role: Role,
    ) -> StoreResult<Option<User>> {
        let mut t = self.tables.write().await;
        let onboarding = t
            .users
            .get(&user_id)
            .is_some_and(|u| u.role == Role::Pending && !u.profile_completed);
        if !onboarding {
            return Ok(None);
        }
        t.check_unique(
            Some(user_id),
            &UniqueKeys {
                email: None,
                username: Some(username),
                external_id: None,
            },
        )?;
        t.ensure_extension(user_id, role);
        let user = t
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::Corrupt(format!("user {user_id} vanished")))?;
        user.username = username.to_string();
        user.role = role;
        user.profile_completed = true;
        Ok(Some(user.clone()))
    }

    async fn update_user_details(
        &self,
        user_id: Uuid,
        full_name: Option<&str>,
        profile_image: Option<&str>,
    ) -> StoreResult<Option<User>> {
        let mut t = self.tables.write().await;
        let Some(user) = t.users.get_mut(&user_id) else {
            return Ok(None);
        };
        if let Some(name) = full_name {
            user.full_name = name.to_string();
        }
        if let Some(image) = profile_image {
            user.profile_image = Some(image.to_string());
        }
        Ok(Some(user.clone()))
    }

    async fn find_client(&self, user_id: Uuid) -> StoreResult<Option<ClientRecord>> {
        Ok(self.tables.read().await.clients.get(&user_id).cloned())
    }

    async fn set_client_cards(
        &self,
        user_id: Uuid,
        cards: Vec<PaymentCard>,
    ) -> StoreResult<Option<ClientRecord>> {
        let mut t = self.tables.write().await;
        let Some(client) = t.clients.get_mut(&user_id) else {
            return Ok(None);
        };
        client.payment_cards = cards;
        Ok(Some(client.clone()))
    }

    async fn find_seller(&self, user_id: Uuid) -> StoreResult<Option<SellerRecord>> {
        Ok(self.tables.read().await.sellers.get(&user_id).cloned())
    }

    async fn list_sellers(&self) -> StoreResult<Vec<SellerRecord>> {
        Ok(self.tables.read().await.sellers.values().cloned().collect())
    }

    async fn update_seller(
        &self,
        user_id: Uuid,
        patch: SellerPatch,
    ) -> StoreResult<Option<SellerRecord>> {
        let mut t = self.tables.write().await;
        let Some(seller) = t.sellers.get_mut(&user_id) else {
            return Ok(None);
        };
        if let Some(price) = patch.minimum_price {
            seller.minimum_price = price;
        }
        if let Some(online) = patch.is_online {
            seller.is_online = online;
        }
        if let Some(expertise) = patch.expertise {
            seller.expertise = expertise;
        }
        Ok(Some(seller.clone()))
    }

    async fn find_profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        Ok(self.tables.read().await.profiles.get(&user_id).cloned())
    }

    async fn find_profiles(&self, user_ids: &[Uuid]) -> StoreResult<Vec<Profile>> {
        let t = self.tables.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| t.profiles.get(id).cloned())
            .collect())
    }

    async fn upsert_profile(&self, user_id: Uuid, patch: ProfilePatch) -> StoreResult<Profile> {
        let mut t = self.tables.write().await;
        let now = OffsetDateTime::now_utc();
        let profile = t.profiles.entry(user_id).or_insert_with(|| Profile {
            user_id,
            bio: None,
            hourly_rate: None,
            certificates: Vec::new(),
            experiences: Vec::new(),
            updated_at: now,
        });
        if let Some(bio) = patch.bio {
            profile.bio = Some(bio);
        }
        if let Some(rate) = patch.hourly_rate {
            profile.hourly_rate = Some(rate);
        }
        if let Some(certificates) = patch.certificates {
            profile.certificates = certificates;
        }
        if let Some(experiences) = patch.experiences {
            profile.experiences = experiences;
        }
        profile.updated_at = now;
        Ok(profile.clone())
    }

    async fn insert_job(&self, new: NewJob) -> StoreResult<Job> {
        let mut t = self.tables.write().await;
        let now = after(t.jobs.last().map(|j| j.created_at));
        let job = Job {
            id: Uuid::new_v4(),
            title: new.title,
            description: new.description,
            buyer_id: new.buyer_id,
            seller_id: None,
            price: new.price,
            expertise: new.expertise,
            status: JobStatus::Open,
            answer: None,
            created_at: now,
            updated_at: now,
        };
        t.jobs.push(job.clone());
        Ok(job)
    }

    async fn find_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        let t = self.tables.read().await;
        Ok(t.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn list_jobs_for_buyer(&self, buyer_id: Uuid) -> StoreResult<Vec<Job>> {
        Ok(self.tables.read().await.jobs_where(|j| j.buyer_id == buyer_id))
    }

    async fn list_jobs_for_seller(&self, seller_id: Uuid) -> StoreResult<Vec<Job>> {
        Ok(self
            .tables
            .read()
            .await
            .jobs_where(|j| j.seller_id == Some(seller_id) || j.status == JobStatus::Open))
    }

    async fn list_jobs_for_assignee(&self, seller_id: Uuid) -> StoreResult<Vec<Job>> {
        Ok(self
            .tables
            .read()
            .await
            .jobs_where(|j| j.seller_id == Some(seller_id)))
    }

    async fn assign_job(
        &self,
        id: Uuid,
        seller_id: Uuid,
        answer: Option<&str>,
    ) -> StoreResult<Option<Job>> {
        // Check and write happen under one write guard.
        let mut t = self.tables.write().await;
        let Some(job) = t
            .jobs
            .iter_mut()
            .find(|j| j.id == id && j.status == JobStatus::Open)
        else {
            return Ok(None);
        };
        job.seller_id = Some(seller_id);
        job.answer = answer.map(str::to_string);
        job.status = JobStatus::Assigned;
        job.updated_at = OffsetDateTime::now_utc();
        Ok(Some(job.clone()))
    }

    async fn complete_job(&self, id: Uuid, buyer_id: Uuid) -> StoreResult<Option<Job>> {
        let mut t = self.tables.write().await;
        let Some(job) = t
            .jobs
            .iter_mut()
            .find(|j| j.id == id && j.buyer_id == buyer_id && j.status == JobStatus::Assigned)
        else {
            return Ok(None);
        };
        job.status = JobStatus::Completed;
        job.updated_at = OffsetDateTime::now_utc();
        let job = job.clone();
        if let Some(seller) = job.seller_id.and_then(|s| t.sellers.get_mut(&s)) {
            seller.credit += job.price;
        }
        Ok(Some(job))
    }

    async fn insert_message(&self, new: NewMessage) -> StoreResult<Message> {
        let mut t = self.tables.write().await;
        let created_at = after(t.messages.last().map(|m| m.created_at));
        let msg = Message {
            id: Uuid::new_v4(),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            content: new.content,
            read: false,
            job_id: new.job_id,
            created_at,
        };
        t.messages.push(msg.clone());
        Ok(msg)
    }

    async fn messages_involving(&self, user_id: Uuid) -> StoreResult<Vec<Message>> {
        Ok(self
            .tables
            .read()
            .await
            .messages_where(|m| m.sender_id == user_id || m.receiver_id == user_id))
    }

    async fn thread(&self, a: Uuid, b: Uuid) -> StoreResult<Vec<Message>> {
        Ok(self.tables.read().await.messages_where(|m| {
            (m.sender_id == a && m.receiver_id == b) || (m.sender_id == b && m.receiver_id == a)
        }))
    }

    async fn job_messages(&self, job_id: Uuid) -> StoreResult<Vec<Message>> {
        Ok(self
            .tables
            .read()
            .await
            .messages_where(|m| m.job_id == Some(job_id)))
    }

    async fn mark_read(&self, from: Uuid, to: Uuid) -> StoreResult<u64> {
        let mut t = self.tables.write().await;
        let mut flipped = 0;
        for m in t
            .messages
            .iter_mut()
            .filter(|m| m.sender_id == from && m.receiver_id == to && !m.read)
        {
            m.read = true;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn unread_count(&self, user_id: Uuid) -> StoreResult<i64> {
        let t = self.tables.read().await;
        Ok(t.messages
            .iter()
            .filter(|m| m.receiver_id == user_id && !m.read)
            .count() as i64)
    }

    async fn delete_external_users(&self) -> StoreResult<u64> {
        let mut t = self.tables.write().await;
        let doomed: Vec<Uuid> = t
            .users
            .values()
            .filter(|u| u.external_id.is_some())
            .map(|u| u.id)
            .collect();
        for id in &doomed {
            t.remove_user(*id);
        }
        Ok(doomed.len() as u64)
    }

    async fn delete_all_users(&self) -> StoreResult<u64> {
        let mut t = self.tables.write().await;
        let count = t.users.len() as u64;
        *t = Tables::default();
        Ok(count)
    }

    async fn delete_jobs(&self, which: JobPurge) -> StoreResult<u64> {
        let mut t = self.tables.write().await;
        let doomed: Vec<Uuid> = t
            .jobs
            .iter()
            .filter(|j| which.matches(j.status))
            .map(|j| j.id)
            .collect();
        t.jobs.retain(|j| !doomed.contains(&j.id));
        for m in t.messages.iter_mut() {
            if m.job_id.is_some_and(|id| doomed.contains(&id)) {
                m.job_id = None;
            }
        }
        Ok(doomed.len() as u64)
    }

    async fn delete_messages(&self) -> StoreResult<u64> {
        let mut t = self.tables.write().await;
        let count = t.messages.len() as u64;
        t.messages.clear();
        Ok(count)
    }

    async fn standardize_expertise(&self) -> StoreResult<ExpertiseRewrite> {
        // Tags are parsed into the fixed vocabulary on the way in, so there is
        // never a legacy spelling to rewrite here.
        Ok(ExpertiseRewrite::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str, role: Role) -> NewUser {
        NewUser {
            username: username.into(),
            full_name: username.into(),
            email: email.into(),
            password_hash: None,
            role,
            external_id: None,
            profile_image: None,
            profile_completed: true,
        }
    }

    #[tokio::test]
    async fn create_account_adds_role_extension() {
        let store = MemoryStore::new();
        let seller = store
            .create_account(new_user("sam", "sam@example.com", Role::Seller))
            .await
            .unwrap();
        let client = store
            .create_account(new_user("cleo", "cleo@example.com", Role::Client))
            .await
            .unwrap();

        assert!(store.find_seller(seller.id).await.unwrap().is_some());
        assert!(store.find_client(seller.id).await.unwrap().is_none());
        assert!(store.find_client(client.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn create_account_rejects_duplicate_email_and_username() {
        let store = MemoryStore::new();
        store
            .create_account(new_user("sam", "sam@example.com", Role::Seller))
            .await
            .unwrap();

        let err = store
            .create_account(new_user("other", "sam@example.com", Role::Client))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate("email")));

        let err = store
            .create_account(new_user("sam", "new@example.com", Role::Client))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate("username")));
        assert_eq!(store.list_users_by_role(Role::Client).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn assign_job_only_matches_open_jobs() {
        let store = MemoryStore::new();
        let job = store
            .insert_job(NewJob {
                buyer_id: Uuid::new_v4(),
                title: "t".into(),
                description: "d".into(),
                price: 5.0,
                expertise: vec![],
            })
            .await
            .unwrap();

        let first = store.assign_job(job.id, Uuid::new_v4(), Some("x")).await.unwrap();
        assert!(first.is_some());
        let second = store.assign_job(job.id, Uuid::new_v4(), Some("y")).await.unwrap();
        assert!(second.is_none());
        assert_eq!(store.find_job(job.id).await.unwrap().unwrap().answer.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn delete_external_users_cascades() {
        let store = MemoryStore::new();
        let mut oauth = new_user("ext", "ext@example.com", Role::Client);
        oauth.external_id = Some("4242".into());
        let oauth = store.create_account(oauth).await.unwrap();
        let local = store
            .create_account(new_user("local", "local@example.com", Role::Client))
            .await
            .unwrap();
        store
            .insert_message(NewMessage {
                sender_id: local.id,
                receiver_id: oauth.id,
                content: "hi".into(),
                job_id: None,
            })
            .await
            .unwrap();

        assert_eq!(store.delete_external_users().await.unwrap(), 1);
        assert!(store.find_user(oauth.id).await.unwrap().is_none());
        assert!(store.find_client(oauth.id).await.unwrap().is_none());
        assert!(store.find_user(local.id).await.unwrap().is_some());
        assert!(store.messages_involving(local.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_buyer_detaches_job_messages() {
        let store = MemoryStore::new();
        let mut buyer = new_user("ext", "ext@example.com", Role::Client);
        buyer.external_id = Some("7".into());
        let buyer = store.create_account(buyer).await.unwrap();
        let seller = store
            .create_account(new_user("seller", "s@example.com", Role::Seller))
            .await
            .unwrap();
        let other = store
            .create_account(new_user("other", "o@example.com", Role::Client))
            .await
            .unwrap();
        let job = store
            .insert_job(NewJob {
                buyer_id: buyer.id,
                title: "t".into(),
                description: "d".into(),
                price: 1.0,
                expertise: vec![],
            })
            .await
            .unwrap();
        let kept = store
            .insert_message(NewMessage {
                sender_id: seller.id,
                receiver_id: other.id,
                content: "about that job".into(),
                job_id: Some(job.id),
            })
            .await
            .unwrap();

        store.delete_external_users().await.unwrap();
        assert!(store.find_job(job.id).await.unwrap().is_none());
        let thread = store.thread(seller.id, other.id).await.unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].id, kept.id);
        assert_eq!(thread[0].job_id, None);
    }

    #[tokio::test]
    async fn complete_profile_only_applies_to_pending_users() {
        let store = MemoryStore::new();
        let client = store
            .create_account(new_user("client", "c@example.com", Role::Client))
            .await
            .unwrap();
        assert!(store
            .complete_profile(client.id, "client", Role::Seller)
            .await
            .unwrap()
            .is_none());
        assert!(store.find_seller(client.id).await.unwrap().is_none());

        let mut pending = new_user("pend", "p@example.com", Role::Pending);
        pending.profile_completed = false;
        let pending = store.create_account(pending).await.unwrap();
        let done = store
            .complete_profile(pending.id, "pend", Role::Seller)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.role, Role::Seller);
        assert!(store
            .complete_profile(pending.id, "pend", Role::Client)
            .await
            .unwrap()
            .is_none());
    }
}
