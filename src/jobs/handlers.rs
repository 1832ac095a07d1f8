use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{AssignJobRequest, CreateJobRequest, JobView},
    services,
};
use crate::{
    auth::AuthUser,
    error::{parse_id, ApiResult, JsonBody},
    state::AppState,
};

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/assign", put(assign_job))
        .route("/jobs/:id/complete", put(complete_job))
}

#[instrument(skip(state, payload))]
pub async fn create_job(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(payload): JsonBody<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobView>)> {
    let job = services::create_job(&state, auth.id, payload).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

#[instrument(skip(state))]
pub async fn list_jobs(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<JobView>>> {
    services::list_jobs(&state, auth.id).await.map(Json)
}

#[instrument(skip(state))]
pub async fn get_job(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let id = parse_id(&id, "Job")?;
    services::get_job(&state, id, auth.id).await.map(Json)
}

/// Body is optional; an empty request accepts the job without an answer.
#[instrument(skip(state, payload))]
pub async fn assign_job(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    payload: Option<Json<AssignJobRequest>>,
) -> ApiResult<Json<JobView>> {
    let id = parse_id(&id, "Job")?;
    let answer = payload.and_then(|Json(p)| p.answer);
    services::assign_job(&state, id, auth.id, answer)
        .await
        .map(Json)
}

#[instrument(skip(state))]
pub async fn complete_job(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let id = parse_id(&id, "Job")?;
    services::complete_job(&state, id, auth.id).await.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{extractors::TOKEN_HEADER, jwt::JwtKeys};
    use crate::jobs::services::tests::user;
    use crate::users::repo_types::{Role, User};
    use axum::{body::Body, extract::FromRef, http::Request};
    use tower::ServiceExt;

    fn token(state: &AppState, user: &User) -> String {
        JwtKeys::from_ref(state).sign(user.id, user.role).unwrap()
    }

    async fn call(
        state: &AppState,
        method: &str,
        uri: &str,
        who: &User,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(TOKEN_HEADER, token(state, who));
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let res = job_routes()
            .with_state(state.clone())
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    #[tokio::test]
    async fn http_scenario_create_assign_complete() {
        let state = AppState::fake();
        let buyer = user(&state, "buyer", Role::Client).await;
        let seller = user(&state, "seller", Role::Seller).await;

        let (status, job) = call(
            &state,
            "POST",
            "/jobs",
            &buyer,
            Some(serde_json::json!({
                "title": "Macarons crack",
                "description": "Why do my macarons crack?",
                "price": 5,
                "expertise": "Pastry"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(job["status"], "open");
        assert_eq!(job["expertise"], serde_json::json!(["Pastry"]));
        assert_eq!(job["buyer"]["username"], "buyer");
        let id = job["id"].as_str().unwrap().to_string();

        let (status, job) = call(
            &state,
            "PUT",
            &format!("/jobs/{id}/assign"),
            &seller,
            Some(serde_json::json!({ "answer": "Rest the shells first" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["status"], "assigned");
        assert_eq!(job["seller"]["username"], "seller");

        let (status, body) =
            call(&state, "PUT", &format!("/jobs/{id}/assign"), &seller, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["msg"], "Job is already assigned or completed");

        let (status, job) =
            call(&state, "PUT", &format!("/jobs/{id}/complete"), &buyer, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["status"], "completed");
    }

    #[tokio::test]
    async fn malformed_and_unknown_ids_are_404() {
        let state = AppState::fake();
        let buyer = user(&state, "buyer", Role::Client).await;
        let (status, body) = call(&state, "GET", "/jobs/not-an-id", &buyer, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["msg"], "Job not found");

        let uri = format!("/jobs/{}", uuid::Uuid::new_v4());
        let (status, _) = call(&state, "GET", &uri, &buyer, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn incomplete_body_is_400_with_msg() {
        let state = AppState::fake();
        let buyer = user(&state, "buyer", Role::Client).await;

        let (status, body) = call(
            &state,
            "POST",
            "/jobs",
            &buyer,
            Some(serde_json::json!({ "title": "t", "description": "d" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["msg"].as_str().unwrap().contains("missing field `price`"));

        let (status, body) = call(
            &state,
            "POST",
            "/jobs",
            &buyer,
            Some(serde_json::json!({ "title": "t", "description": "d", "price": "cheap" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["msg"].is_string());
        assert!(state.store.list_jobs_for_buyer(buyer.id).await.unwrap().is_empty());
    }
}
