//! External identity provider (42 intra) integration: authorize URL
//! construction, code-for-token exchange and profile fetch.

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Url;
use serde::Deserialize;

use crate::config::OAuthConfig;
use crate::error::ApiError;

mod fortytwo;

pub use fortytwo::FortyTwoClient;

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("invalid provider URL: {0}")]
    InvalidUrl(String),
    #[error("request to identity provider failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("identity provider rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
}

impl From<OAuthError> for ApiError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::NotConfigured(_) | OAuthError::InvalidUrl(_) => {
                ApiError::Configuration(err.to_string())
            }
            OAuthError::Http(ref e) => ApiError::Upstream {
                status: e.status().map(|s| s.as_u16()),
                message: err.to_string(),
            },
            OAuthError::Rejected { status, .. } => ApiError::Upstream {
                status: Some(status),
                message: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderImage {
    pub link: Option<String>,
}

/// Subset of the provider's `/v2/me` document we rely on.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderProfile {
    pub id: u64,
    pub login: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image: Option<ProviderImage>,
}

impl ProviderProfile {
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.login.clone()
        } else {
            name.to_string()
        }
    }

    pub fn picture(&self) -> Option<String> {
        self.image
            .as_ref()
            .and_then(|i| i.link.clone())
            .or_else(|| self.image_url.clone())
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchanges an authorization code for a provider access token.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String, OAuthError>;
    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, OAuthError>;
}

/// Random anti-replay value for the `state` parameter.
pub fn new_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub fn redirect_uri(cfg: &OAuthConfig, mobile: bool) -> &str {
    if mobile {
        &cfg.mobile_redirect_uri
    } else {
        &cfg.redirect_uri
    }
}

pub fn authorize_url(cfg: &OAuthConfig, mobile: bool, state: &str) -> Result<Url, OAuthError> {
    let client_id = cfg
        .client_id
        .as_deref()
        .ok_or(OAuthError::NotConfigured("FT_CLIENT_ID"))?;
    Url::parse_with_params(
        &cfg.authorize_url,
        &[
            ("client_id", client_id),
            ("redirect_uri", redirect_uri(cfg, mobile)),
            ("response_type", "code"),
            ("scope", cfg.scope.as_str()),
            ("state", state),
        ],
    )
    .map_err(|e| OAuthError::InvalidUrl(e.to_string()))
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Provider double: accepts one code and returns a fixed profile.
    pub struct StubProvider {
        pub code: String,
        pub profile: ProviderProfile,
    }

    impl StubProvider {
        pub fn new(code: &str, id: u64, login: &str, email: &str) -> Self {
            Self {
                code: code.to_string(),
                profile: ProviderProfile {
                    id,
                    login: login.to_string(),
                    email: email.to_string(),
                    first_name: "Ada".into(),
                    last_name: "Lovelace".into(),
                    image_url: None,
                    image: Some(ProviderImage {
                        link: Some(format!("https://cdn.example/{login}.jpg")),
                    }),
                },
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> Result<String, OAuthError> {
            if code == self.code {
                Ok(format!("access-{code}"))
            } else {
                Err(OAuthError::Rejected {
                    status: 401,
                    body: r#"{"error":"invalid_grant"}"#.into(),
                })
            }
        }

        async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, OAuthError> {
            if access_token == format!("access-{}", self.code) {
                Ok(self.profile.clone())
            } else {
                Err(OAuthError::Rejected {
                    status: 401,
                    body: "bad token".into(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(client_id: Option<&str>) -> OAuthConfig {
        OAuthConfig {
            client_id: client_id.map(str::to_string),
            client_secret: Some("secret".into()),
            redirect_uri: "http://localhost:4200/oauth-callback".into(),
            mobile_redirect_uri: "jobconsult://oauth-callback".into(),
            authorize_url: "https://api.intra.42.fr/oauth/authorize".into(),
            token_url: "https://api.intra.42.fr/oauth/token".into(),
            profile_url: "https://api.intra.42.fr/v2/me".into(),
            scope: "public".into(),
        }
    }

    #[test]
    fn authorize_url_carries_client_redirect_state_and_scope() {
        let url = authorize_url(&cfg(Some("u-abc")), false, "xyz").unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "u-abc");
        assert_eq!(pairs["redirect_uri"], "http://localhost:4200/oauth-callback");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["scope"], "public");
        assert_eq!(pairs["state"], "xyz");
    }

    #[test]
    fn authorize_url_uses_mobile_redirect() {
        let url = authorize_url(&cfg(Some("u-abc")), true, "s").unwrap();
        assert!(url
            .query_pairs()
            .any(|(k, v)| k == "redirect_uri" && v == "jobconsult://oauth-callback"));
    }

    #[test]
    fn authorize_url_requires_client_id() {
        let err = authorize_url(&cfg(None), false, "s").unwrap_err();
        assert!(matches!(err, OAuthError::NotConfigured("FT_CLIENT_ID")));
        assert!(matches!(ApiError::from(err), ApiError::Configuration(_)));
    }

    #[test]
    fn states_are_random_and_alphanumeric() {
        let a = new_state();
        let b = new_state();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn profile_prefers_image_link_and_falls_back_to_login() {
        let p: ProviderProfile = serde_json::from_str(
            r#"{"id":7,"login":"ada","email":"ada@42.fr","image":{"link":"https://x/ada.jpg"},"image_url":"https://old"}"#,
        )
        .unwrap();
        assert_eq!(p.picture().as_deref(), Some("https://x/ada.jpg"));
        assert_eq!(p.full_name(), "ada");
    }
}
