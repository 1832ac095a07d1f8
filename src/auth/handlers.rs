use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reqwest::Url;
use tracing::{debug, error, instrument};

use super::{
    dto::{
        AuthResponse, AuthorizeQuery, AuthorizeResponse, CallbackQuery, CompleteProfileRequest,
        LoginRequest, OAuthTokenRequest, OAuthTokenResponse, RegisterRequest,
    },
    extractors::AuthUser,
    services,
};
use crate::{
    error::{ApiResult, JsonBody},
    state::AppState,
    users::repo_types::User,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/user", get(current_user))
        .route("/auth/ft/login", get(ft_login))
        .route("/auth/ft/callback", get(ft_callback))
        .route("/auth/ft/token", post(ft_token))
        .route("/auth/complete-profile", post(complete_profile))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> ApiResult<Json<AuthResponse>> {
    services::register(&state, payload).await.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    services::login(&state, payload).await.map(Json)
}

#[instrument(skip(state))]
pub async fn current_user(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<User>> {
    services::current_user(&state, auth.id).await.map(Json)
}

#[instrument(skip(state))]
pub async fn ft_login(
    State(state): State<AppState>,
    Query(q): Query<AuthorizeQuery>,
) -> ApiResult<Json<AuthorizeResponse>> {
    services::authorize(&state, q.mobile).map(Json)
}

/// Browser landing point: exchanges the code and sends the user back to the
/// frontend with the token in the query string.
#[instrument(skip(state, q))]
pub async fn ft_callback(State(state): State<AppState>, Query(q): Query<CallbackQuery>) -> Response {
    debug!(state = ?q.state, "provider callback");
    let frontend = state.config.frontend_url.trim_end_matches('/');

    let outcome = match (q.code, q.error) {
        (_, Some(provider_error)) => Err(provider_error),
        (None, None) => Err("missing_code".to_string()),
        (Some(code), None) => services::oauth_exchange(&state, &code, false)
            .await
            .map_err(|e| {
                error!(error = %e, "oauth callback failed");
                "oauth_failed".to_string()
            }),
    };

    let target = match outcome {
        Ok(res) => {
            let page = if res.is_new_user { "complete-profile" } else { "market" };
            frontend_url(frontend, page, "token", &res.token)
        }
        Err(reason) => frontend_url(frontend, "login", "error", &reason),
    };

    match target {
        Some(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        None => {
            error!(%frontend, "FRONTEND_URL is not a valid URL");
            crate::error::ApiError::Configuration("FRONTEND_URL".into()).into_response()
        }
    }
}

fn frontend_url(base: &str, page: &str, key: &str, value: &str) -> Option<String> {
    let mut url = Url::parse(&format!("{base}/{page}")).ok()?;
    url.query_pairs_mut().append_pair(key, value);
    Some(url.into())
}

#[instrument(skip(state, payload))]
pub async fn ft_token(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<OAuthTokenRequest>,
) -> ApiResult<Json<OAuthTokenResponse>> {
    services::oauth_exchange(&state, &payload.code, payload.mobile)
        .await
        .map(Json)
}

#[instrument(skip(state, payload))]
pub async fn complete_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(payload): JsonBody<CompleteProfileRequest>,
) -> ApiResult<Json<AuthResponse>> {
    services::complete_profile(&state, auth.id, payload)
        .await
        .map(Json)
}
