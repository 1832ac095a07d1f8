use axum::extract::FromRef;
use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{
    AuthResponse, AuthorizeResponse, CompleteProfileRequest, LoginRequest, OAuthTokenResponse,
    RegisterRequest,
};
use super::jwt::JwtKeys;
use super::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::error::{ApiError, ApiResult};
use crate::oauth::{self, ProviderProfile};
use crate::state::AppState;
use crate::users::repo_types::{NewUser, Role, User};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").unwrap();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub(crate) fn validate_username(username: &str) -> ApiResult<()> {
    if USERNAME_RE.is_match(username) {
        Ok(())
    } else {
        Err(ApiError::validation(
            "Username must be 3-32 characters of letters, digits, '_', '.' or '-'",
        ))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Only `client` and `seller` may be chosen; `pending` is internal.
fn require_concrete_role(role: Role) -> ApiResult<Role> {
    match role {
        Role::Client | Role::Seller => Ok(role),
        Role::Pending => Err(ApiError::validation("Role must be client or seller")),
    }
}

fn issue(state: &AppState, user: &User) -> ApiResult<String> {
    Ok(JwtKeys::from_ref(state).sign(user.id, user.role)?)
}

#[instrument(skip(state, req), fields(email = %req.email))]
pub async fn register(state: &AppState, req: RegisterRequest) -> ApiResult<AuthResponse> {
    let email = normalize_email(&req.email);
    let username = req.username.trim().to_string();

    if !is_valid_email(&email) {
        warn!("invalid email");
        return Err(ApiError::validation("Invalid email"));
    }
    validate_username(&username)?;
    if req.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(ApiError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let role = require_concrete_role(req.role)?;

    if state.store.find_user_by_email(&email).await?.is_some() {
        warn!("email already registered");
        return Err(ApiError::DuplicateEmail);
    }
    if state.store.find_user_by_username(&username).await?.is_some() {
        warn!(%username, "username already taken");
        return Err(ApiError::DuplicateUsername);
    }

    let full_name = match req.full_name.trim() {
        "" => username.clone(),
        name => name.to_string(),
    };
    let user = state
        .store
        .create_account(NewUser {
            username,
            full_name,
            email,
            password_hash: Some(hash_password(&req.password)?),
            role,
            external_id: None,
            profile_image: None,
            profile_completed: true,
        })
        .await?;

    let token = issue(state, &user)?;
    info!(user_id = %user.id, role = %user.role, "user registered");
    Ok(AuthResponse { token, user })
}

#[instrument(skip(state, req), fields(email = %req.email))]
pub async fn login(state: &AppState, req: LoginRequest) -> ApiResult<AuthResponse> {
    let email = normalize_email(&req.email);
    if !is_valid_email(&email) {
        warn!("invalid email");
        return Err(ApiError::validation("Invalid email"));
    }

    let Some(user) = state.store.find_user_by_email(&email).await? else {
        warn!("login unknown email");
        return Err(ApiError::InvalidCredentials);
    };
    if !verify_password(&req.password, user.password_hash.as_deref())? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    let token = issue(state, &user)?;
    info!(user_id = %user.id, "user logged in");
    Ok(AuthResponse { token, user })
}

pub async fn current_user(state: &AppState, user_id: Uuid) -> ApiResult<User> {
    state
        .store
        .find_user(user_id)
        .await?
        .ok_or(ApiError::NotFound("User"))
}

pub fn authorize(state: &AppState, mobile: bool) -> ApiResult<AuthorizeResponse> {
    let csrf = oauth::new_state();
    let url = oauth::authorize_url(&state.config.oauth, mobile, &csrf)?;
    Ok(AuthorizeResponse {
        url: url.into(),
        state: csrf,
    })
}

/// Exchanges a provider code and finds or creates the matching local account.
/// Lookup order: external id, then provider email (linking the existing
/// account), then a new `pending` user.
#[instrument(skip(state, code))]
pub async fn oauth_exchange(
    state: &AppState,
    code: &str,
    mobile: bool,
) -> ApiResult<OAuthTokenResponse> {
    if code.trim().is_empty() {
        return Err(ApiError::validation("Authorization code is required"));
    }
    let redirect = oauth::redirect_uri(&state.config.oauth, mobile);
    let access_token = state.provider.exchange_code(code, redirect).await?;
    let profile = state.provider.fetch_profile(&access_token).await?;
    let external_id = profile.id.to_string();

    let user = match state.store.find_user_by_external_id(&external_id).await? {
        Some(user) => user,
        None => find_or_create_from_profile(state, &profile, &external_id).await?,
    };

    let token = issue(state, &user)?;
    let is_new_user = !user.profile_completed;
    info!(user_id = %user.id, is_new_user, "oauth login");
    Ok(OAuthTokenResponse {
        token,
        is_new_user,
        user,
    })
}

async fn find_or_create_from_profile(
    state: &AppState,
    profile: &ProviderProfile,
    external_id: &str,
) -> ApiResult<User> {
    let email = normalize_email(&profile.email);

    if let Some(existing) = state.store.find_user_by_email(&email).await? {
        if existing.external_id.is_some() {
            warn!(user_id = %existing.id, "email already linked to another provider account");
            return Err(ApiError::conflict(
                "Email is already linked to another 42 account",
            ));
        }
        let linked = state
            .store
            .link_external_id(existing.id, external_id, profile.picture().as_deref())
            .await?
            .ok_or(ApiError::NotFound("User"))?;
        info!(user_id = %linked.id, "provider identity linked to existing account");
        return Ok(linked);
    }

    let username = pick_username(state, &profile.login, profile.id).await?;
    let user = state
        .store
        .create_account(NewUser {
            username,
            full_name: profile.full_name(),
            email,
            password_hash: None,
            role: Role::Pending,
            external_id: Some(external_id.to_string()),
            profile_image: profile.picture(),
            profile_completed: false,
        })
        .await?;
    info!(user_id = %user.id, "user created from provider profile");
    Ok(user)
}

const USERNAME_ATTEMPTS: usize = 5;

/// `<base>_<suffix>`, with `base` cut so the whole name stays within 32 chars.
fn with_suffix(base: &str, suffix: &str) -> String {
    let keep = 32usize.saturating_sub(suffix.len() + 1);
    let head: String = base.chars().take(keep).collect();
    format!("{head}_{suffix}")
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Provider login when free and well-formed, then `<login>_<providerId>`,
/// then a few random suffixes.
async fn pick_username(state: &AppState, login: &str, provider_id: u64) -> ApiResult<String> {
    let base: String = login
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .take(20)
        .collect();
    let base = if base.len() < 3 {
        format!("ft_{base}")
    } else {
        base
    };

    let candidates = std::iter::once(base.clone())
        .chain(std::iter::once(with_suffix(&base, &provider_id.to_string())))
        .chain((0..USERNAME_ATTEMPTS).map(|_| with_suffix(&base, &random_suffix())));
    for candidate in candidates {
        if USERNAME_RE.is_match(&candidate)
            && state.store.find_user_by_username(&candidate).await?.is_none()
        {
            return Ok(candidate);
        }
    }
    warn!(%provider_id, "no free username for provider login");
    Err(ApiError::DuplicateUsername)
}

#[instrument(skip(state, req))]
pub async fn complete_profile(
    state: &AppState,
    user_id: Uuid,
    req: CompleteProfileRequest,
) -> ApiResult<AuthResponse> {
    let username = req.username.trim().to_string();
    validate_username(&username)?;
    let role = require_concrete_role(req.role)?;

    let current = current_user(state, user_id).await?;
    if current.role != Role::Pending || current.profile_completed {
        warn!(%user_id, role = %current.role, "profile already completed");
        return Err(ApiError::conflict("Profile is already completed"));
    }

    if let Some(other) = state.store.find_user_by_username(&username).await? {
        if other.id != user_id {
            return Err(ApiError::DuplicateUsername);
        }
    }

    // None here means a concurrent completion won.
    let user = state
        .store
        .complete_profile(user_id, &username, role)
        .await?
        .ok_or_else(|| ApiError::conflict("Profile is already completed"))?;

    let token = issue(state, &user)?;
    info!(user_id = %user.id, role = %user.role, "profile completed");
    Ok(AuthResponse { token, user })
}
