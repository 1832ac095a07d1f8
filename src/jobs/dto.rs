use serde::{Deserialize, Serialize};

use super::repo_types::Job;
use crate::users::dto::{one_or_many, UserSummary};
use crate::users::repo_types::Expertise;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub title: String,
    pub description: String,
    pub price: f64,
    #[serde(default, deserialize_with = "one_or_many")]
    pub expertise: Option<Vec<Expertise>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignJobRequest {
    #[serde(default)]
    pub answer: Option<String>,
}

/// Job with buyer and seller resolved to summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub buyer: Option<UserSummary>,
    pub seller: Option<UserSummary>,
}
