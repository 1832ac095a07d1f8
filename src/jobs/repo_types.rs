use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::repo_types::Expertise;

/// Job lifecycle: `open -> assigned -> completed`. `Cancelled` exists in the
/// schema but no operation moves a job there.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Open,
    Assigned,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Open => "open",
            JobStatus::Assigned => "assigned",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }
}

/// Job (posted question) record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub buyer_id: Uuid,
    pub seller_id: Option<Uuid>,
    pub price: f64,
    pub expertise: Vec<Expertise>,
    pub status: JobStatus,
    pub answer: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Job {
    /// Open jobs are public; otherwise only the buyer and the assigned seller.
    pub fn visible_to(&self, user_id: Uuid) -> bool {
        self.status == JobStatus::Open
            || self.buyer_id == user_id
            || self.seller_id == Some(user_id)
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub buyer_id: Uuid,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub expertise: Vec<Expertise>,
}

/// Which jobs a maintenance purge removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPurge {
    All,
    Open,
    /// Completed and cancelled.
    Finished,
}

impl JobPurge {
    pub fn matches(self, status: JobStatus) -> bool {
        match self {
            JobPurge::All => true,
            JobPurge::Open => status == JobStatus::Open,
            JobPurge::Finished => status.is_finished(),
        }
    }
}
