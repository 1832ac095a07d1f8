use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{ProfileUpsertRequest, ProfileView, SellerDirectoryEntry, UserComposite},
    services,
};
use crate::{
    auth::AuthUser,
    error::{parse_id, ApiResult, JsonBody},
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users/profile",
            get(get_profile).post(upsert_profile).put(upsert_profile),
        )
        .route("/users/profile/:user_id", get(get_public_profile))
        .route("/users/sellers", get(list_sellers))
        .route("/users/:id", get(get_user))
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<ProfileView>> {
    services::get_profile(&state, auth.id).await.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn upsert_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(payload): JsonBody<ProfileUpsertRequest>,
) -> ApiResult<Json<ProfileView>> {
    services::upsert_profile(&state, auth.id, payload)
        .await
        .map(Json)
}

#[instrument(skip(state))]
pub async fn get_public_profile(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<ProfileView>> {
    let user_id = parse_id(&user_id, "User")?;
    services::public_profile(&state, user_id).await.map(Json)
}

#[instrument(skip(state))]
pub async fn list_sellers(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> ApiResult<Json<Vec<SellerDirectoryEntry>>> {
    services::list_active_sellers(&state).await.map(Json)
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<UserComposite>> {
    let id = parse_id(&id, "User")?;
    services::get_user_composite(&state, auth.id, id)
        .await
        .map(Json)
}
