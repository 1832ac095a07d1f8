use std::collections::HashMap;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{CreateJobRequest, JobView};
use super::repo_types::{Job, JobStatus, NewJob};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::users::dto::UserSummary;
use crate::users::repo_types::{Role, User};

async fn requester(state: &AppState, id: Uuid) -> ApiResult<User> {
    state
        .store
        .find_user(id)
        .await?
        .ok_or(ApiError::NotFound("User"))
}

async fn load_job(state: &AppState, id: Uuid) -> ApiResult<Job> {
    state
        .store
        .find_job(id)
        .await?
        .ok_or(ApiError::NotFound("Job"))
}

/// Resolves buyer and seller summaries with one batched user lookup.
pub(crate) async fn attach_people(state: &AppState, jobs: Vec<Job>) -> ApiResult<Vec<JobView>> {
    let mut ids: Vec<Uuid> = jobs
        .iter()
        .flat_map(|j| std::iter::once(j.buyer_id).chain(j.seller_id))
        .collect();
    ids.sort_unstable();
    ids.dedup();

    let people: HashMap<Uuid, UserSummary> = state
        .store
        .find_users(&ids)
        .await?
        .iter()
        .map(|u| (u.id, UserSummary::from(u)))
        .collect();

    Ok(jobs
        .into_iter()
        .map(|job| JobView {
            buyer: people.get(&job.buyer_id).cloned(),
            seller: job.seller_id.and_then(|id| people.get(&id).cloned()),
            job,
        })
        .collect())
}

async fn view(state: &AppState, job: Job) -> ApiResult<JobView> {
    attach_people(state, vec![job])
        .await?
        .pop()
        .ok_or(ApiError::NotFound("Job"))
}

#[instrument(skip(state, req))]
pub async fn create_job(
    state: &AppState,
    buyer_id: Uuid,
    req: CreateJobRequest,
) -> ApiResult<JobView> {
    let title = req.title.trim();
    let description = req.description.trim();
    if title.is_empty() || description.is_empty() {
        return Err(ApiError::validation("Title and description are required"));
    }
    if !req.price.is_finite() || req.price < 0.0 {
        return Err(ApiError::validation("Price must be a non-negative number"));
    }

    let buyer = requester(state, buyer_id).await?;
    if buyer.role != Role::Client {
        warn!(user_id = %buyer_id, role = %buyer.role, "non-client tried to post a job");
        return Err(ApiError::unauthorized("Only clients can post jobs"));
    }

    let job = state
        .store
        .insert_job(NewJob {
            buyer_id,
            title: title.to_string(),
            description: description.to_string(),
            price: req.price,
            expertise: req.expertise.unwrap_or_default(),
        })
        .await?;
    info!(job_id = %job.id, %buyer_id, price = job.price, "job created");
    view(state, job).await
}

/// Clients see what they posted; sellers see their assignments plus every
/// open job. Pending users see nothing.
#[instrument(skip(state))]
pub async fn list_jobs(state: &AppState, requester_id: Uuid) -> ApiResult<Vec<JobView>> {
    let user = requester(state, requester_id).await?;
    let jobs = match user.role {
        Role::Client => state.store.list_jobs_for_buyer(user.id).await?,
        Role::Seller => state.store.list_jobs_for_seller(user.id).await?,
        Role::Pending => Vec::new(),
    };
    attach_people(state, jobs).await
}

#[instrument(skip(state))]
pub async fn get_job(state: &AppState, id: Uuid, requester_id: Uuid) -> ApiResult<JobView> {
    let job = load_job(state, id).await?;
    if !job.visible_to(requester_id) {
        return Err(ApiError::unauthorized("User not authorized"));
    }
    view(state, job).await
}

/// Single conditional update; a lost race surfaces as `Conflict`.
#[instrument(skip(state, answer))]
pub async fn assign_job(
    state: &AppState,
    id: Uuid,
    seller_id: Uuid,
    answer: Option<String>,
) -> ApiResult<JobView> {
    let job = load_job(state, id).await?;
    if job.status != JobStatus::Open {
        return Err(ApiError::conflict("Job is already assigned or completed"));
    }
    let seller = requester(state, seller_id).await?;
    if seller.role != Role::Seller {
        warn!(user_id = %seller_id, role = %seller.role, "non-seller tried to accept a job");
        return Err(ApiError::unauthorized("Only sellers can accept jobs"));
    }
    if job.buyer_id == seller_id {
        warn!(job_id = %id, %seller_id, "buyer tried to accept own job");
        return Err(ApiError::unauthorized("Cannot accept your own job"));
    }

    let answer = answer.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
    match state
        .store
        .assign_job(id, seller_id, answer.as_deref())
        .await?
    {
        Some(job) => {
            info!(job_id = %id, %seller_id, "job assigned");
            view(state, job).await
        }
        None => {
            // Lost the race, or the job vanished in between.
            load_job(state, id).await?;
            warn!(job_id = %id, %seller_id, "job assigned concurrently");
            Err(ApiError::conflict("Job is already assigned or completed"))
        }
    }
}

#[instrument(skip(state))]
pub async fn complete_job(state: &AppState, id: Uuid, buyer_id: Uuid) -> ApiResult<JobView> {
    let job = load_job(state, id).await?;
    if job.buyer_id != buyer_id {
        return Err(ApiError::unauthorized("User not authorized"));
    }
    if job.status != JobStatus::Assigned {
        return Err(ApiError::conflict("Job cannot be completed"));
    }

    match state.store.complete_job(id, buyer_id).await? {
        Some(job) => {
            info!(job_id = %id, seller_id = ?job.seller_id, price = job.price, "job completed");
            view(state, job).await
        }
        None => {
            load_job(state, id).await?;
            Err(ApiError::conflict("Job cannot be completed"))
        }
    }
}
