//! Persistence seam. Every service talks to `dyn Store`; the Postgres backend
//! is used in deployment and the in-memory one for development and tests.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{AppConfig, StoreBackend};
use crate::jobs::repo_types::{Job, JobPurge, NewJob};
use crate::messages::repo_types::{Message, NewMessage};
use crate::users::repo_types::{
    ClientRecord, NewUser, PaymentCard, Profile, ProfilePatch, Role, SellerPatch, SellerRecord,
    User,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint rejected the write; carries the field name.
    #[error("duplicate {0}")]
    Duplicate(&'static str),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Row counts reported by `standardize_expertise`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpertiseRewrite {
    pub sellers: u64,
    pub jobs: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    // users
    /// Inserts the user and, for `client`/`seller`, the matching extension record.
    async fn create_account(&self, new: NewUser) -> StoreResult<User>;
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_external_id(&self, external_id: &str) -> StoreResult<Option<User>>;
    async fn find_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>>;
    async fn list_users_by_role(&self, role: Role) -> StoreResult<Vec<User>>;
    async fn link_external_id(
        &self,
        user_id: Uuid,
        external_id: &str,
        profile_image: Option<&str>,
    ) -> StoreResult<Option<User>>;
    /// Sets username and role, marks the profile completed and creates the
    /// role extension if it does not exist yet. Only applies to a `pending`
    /// user that has not completed onboarding; otherwise `None`.
    async fn complete_profile(
        &self,
        user_id: Uuid,
        username: &str,
        role: Role,
    ) -> StoreResult<Option<User>>;
    async fn update_user_details(
        &self,
        user_id: Uuid,
        full_name: Option<&str>,
        profile_image: Option<&str>,
    ) -> StoreResult<Option<User>>;

    // role extensions
    async fn find_client(&self, user_id: Uuid) -> StoreResult<Option<ClientRecord>>;
    async fn set_client_cards(
        &self,
        user_id: Uuid,
        cards: Vec<PaymentCard>,
    ) -> StoreResult<Option<ClientRecord>>;
    async fn find_seller(&self, user_id: Uuid) -> StoreResult<Option<SellerRecord>>;
    async fn list_sellers(&self) -> StoreResult<Vec<SellerRecord>>;
    async fn update_seller(
        &self,
        user_id: Uuid,
        patch: SellerPatch,
    ) -> StoreResult<Option<SellerRecord>>;

    // profiles
    async fn find_profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>>;
    async fn find_profiles(&self, user_ids: &[Uuid]) -> StoreResult<Vec<Profile>>;
    /// Applies only the fields present in `patch`, creating the row if needed.
    async fn upsert_profile(&self, user_id: Uuid, patch: ProfilePatch) -> StoreResult<Profile>;

    // jobs
    async fn insert_job(&self, new: NewJob) -> StoreResult<Job>;
    async fn find_job(&self, id: Uuid) -> StoreResult<Option<Job>>;
    async fn list_jobs_for_buyer(&self, buyer_id: Uuid) -> StoreResult<Vec<Job>>;
    /// Jobs assigned to the seller plus every open job, newest first.
    async fn list_jobs_for_seller(&self, seller_id: Uuid) -> StoreResult<Vec<Job>>;
    async fn list_jobs_for_assignee(&self, seller_id: Uuid) -> StoreResult<Vec<Job>>;
    /// Conditional write: succeeds only while the job is `open`. `None` when
    /// no row matched.
    async fn assign_job(
        &self,
        id: Uuid,
        seller_id: Uuid,
        answer: Option<&str>,
    ) -> StoreResult<Option<Job>>;
    /// Conditional write: succeeds only for the buyer of an `assigned` job,
    /// crediting the seller with the job price in the same unit of work.
    async fn complete_job(&self, id: Uuid, buyer_id: Uuid) -> StoreResult<Option<Job>>;

    // messages
    async fn insert_message(&self, new: NewMessage) -> StoreResult<Message>;
    /// Every message sent or received by the user, oldest first.
    async fn messages_involving(&self, user_id: Uuid) -> StoreResult<Vec<Message>>;
    async fn thread(&self, a: Uuid, b: Uuid) -> StoreResult<Vec<Message>>;
    async fn job_messages(&self, job_id: Uuid) -> StoreResult<Vec<Message>>;
    /// Flips `read` on unread messages `from -> to`; returns how many changed.
    async fn mark_read(&self, from: Uuid, to: Uuid) -> StoreResult<u64>;
    async fn unread_count(&self, user_id: Uuid) -> StoreResult<i64>;

    // maintenance
    async fn delete_external_users(&self) -> StoreResult<u64>;
    async fn delete_all_users(&self) -> StoreResult<u64>;
    async fn delete_jobs(&self, which: JobPurge) -> StoreResult<u64>;
    async fn delete_messages(&self) -> StoreResult<u64>;
    async fn standardize_expertise(&self) -> StoreResult<ExpertiseRewrite>;
}

/// Builds the configured backend. Postgres connections run pending migrations.
pub async fn connect(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    match config.store {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::default()))
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL not set")?;
            let store = PgStore::connect(url).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}
