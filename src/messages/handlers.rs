use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{
        Conversation, MarkReadResponse, MessageView, SendJobMessageRequest, SendMessageRequest,
        UnreadCount,
    },
    services,
};
use crate::{
    auth::AuthUser,
    error::{parse_id, ApiResult, JsonBody},
    state::AppState,
};

pub fn message_routes() -> Router<AppState> {
    Router::new()
        .route("/messages", get(list_conversations).post(send_message))
        .route("/messages/unread/count", get(unread_count))
        .route("/messages/read/:user_id", put(mark_read))
        .route("/messages/job", post(send_job_message))
        .route("/messages/job/:job_id", get(list_job_messages))
        .route("/messages/:user_id", get(thread))
}

#[instrument(skip(state, payload))]
pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(payload): JsonBody<SendMessageRequest>,
) -> ApiResult<Json<MessageView>> {
    services::send_message(&state, auth.id, payload.receiver, &payload.content)
        .await
        .map(Json)
}

#[instrument(skip(state))]
pub async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<Conversation>>> {
    services::list_conversations(&state, auth.id).await.map(Json)
}

#[instrument(skip(state))]
pub async fn thread(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<MessageView>>> {
    let other = parse_id(&user_id, "User")?;
    services::thread(&state, auth.id, other).await.map(Json)
}

#[instrument(skip(state))]
pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<MarkReadResponse>> {
    let from = parse_id(&user_id, "User")?;
    services::mark_read(&state, auth.id, from).await.map(Json)
}

#[instrument(skip(state))]
pub async fn unread_count(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<UnreadCount>> {
    services::unread_count(&state, auth.id).await.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn send_job_message(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(payload): JsonBody<SendJobMessageRequest>,
) -> ApiResult<Json<MessageView>> {
    services::send_job_message(
        &state,
        auth.id,
        payload.job_id,
        payload.receiver,
        &payload.content,
    )
    .await
    .map(Json)
}

#[instrument(skip(state))]
pub async fn list_job_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Vec<MessageView>>> {
    let job_id = parse_id(&job_id, "Job")?;
    services::list_job_messages(&state, auth.id, job_id)
        .await
        .map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{extractors::TOKEN_HEADER, jwt::JwtKeys};
    use crate::jobs::services::tests::user;
    use crate::users::repo_types::{Role, User};
    use axum::{
        body::Body,
        extract::FromRef,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    async fn call(
        state: &AppState,
        method: &str,
        uri: &str,
        who: &User,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let token = JwtKeys::from_ref(state).sign(who.id, who.role).unwrap();
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(TOKEN_HEADER, token)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |v| Body::from(v.to_string())))
            .unwrap();
        let res = message_routes()
            .with_state(state.clone())
            .oneshot(req)
            .await
            .unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    #[tokio::test]
    async fn static_segments_win_over_user_id() {
        let state = AppState::fake();
        let me = user(&state, "me", Role::Client).await;
        let other = user(&state, "other", Role::Seller).await;

        let (status, _) = call(
            &state,
            "POST",
            "/messages",
            &other,
            Some(serde_json::json!({ "receiver": me.id, "content": "ping" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&state, "GET", "/messages/unread/count", &me, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (_, convs) = call(&state, "GET", "/messages", &me, None).await;
        assert_eq!(convs[0]["user"]["username"], "other");
        assert_eq!(convs[0]["unreadCount"], 1);
        assert_eq!(convs[0]["lastMessage"]["content"], "ping");

        let uri = format!("/messages/read/{}", other.id);
        let (status, body) = call(&state, "PUT", &uri, &me, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"], 1);

        let (_, thread) = call(&state, "GET", &format!("/messages/{}", other.id), &me, None).await;
        assert_eq!(thread.as_array().map(Vec::len), Some(1));
        assert_eq!(thread[0]["read"], true);
        assert_eq!(thread[0]["sender"]["username"], "other");
    }

    #[tokio::test]
    async fn job_message_without_job_id_is_400() {
        let state = AppState::fake();
        let me = user(&state, "me", Role::Client).await;
        let (status, body) = call(
            &state,
            "POST",
            "/messages/job",
            &me,
            Some(serde_json::json!({ "content": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["msg"], "Job ID is required");
    }
}
