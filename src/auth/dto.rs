use serde::{Deserialize, Serialize};

use crate::users::repo_types::{Role, User};

/// Request body for user registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    pub email: String,
    pub password: String,
    #[serde(alias = "userType")]
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Token plus the public view of the account it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeQuery {
    #[serde(default)]
    pub mobile: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub url: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    /// Provider echo; logged, not checked.
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokenRequest {
    pub code: String,
    #[serde(default)]
    pub mobile: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthTokenResponse {
    pub token: String,
    /// True while the account still has to pick a role.
    pub is_new_user: bool,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteProfileRequest {
    pub username: String,
    #[serde(alias = "userType")]
    pub role: Role,
}
