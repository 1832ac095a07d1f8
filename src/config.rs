use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Identity provider settings. Credentials stay optional here: a missing
/// client id or secret only fails the OAuth endpoints, not startup.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub mobile_redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub scope: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub oauth: OAuthConfig,
    pub frontend_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store = match env_or("STORE_BACKEND", "postgres").to_lowercase().as_str() {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => anyhow::bail!("unknown STORE_BACKEND {other:?} (expected postgres or memory)"),
        };
        let database_url = std::env::var("DATABASE_URL").ok();
        if store == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when STORE_BACKEND=postgres");
        }

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET")?,
            issuer: env_or("JWT_ISSUER", "jobconsult"),
            audience: env_or("JWT_AUDIENCE", "jobconsult-users"),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 3),
        };

        let oauth = OAuthConfig {
            client_id: non_empty_var("FT_CLIENT_ID"),
            client_secret: non_empty_var("FT_CLIENT_SECRET"),
            redirect_uri: env_or("FT_REDIRECT_URI", "http://localhost:4200/oauth-callback"),
            mobile_redirect_uri: env_or("FT_MOBILE_REDIRECT_URI", "jobconsult://oauth-callback"),
            authorize_url: env_or("FT_AUTHORIZE_URL", "https://api.intra.42.fr/oauth/authorize"),
            token_url: env_or("FT_TOKEN_URL", "https://api.intra.42.fr/oauth/token"),
            profile_url: env_or("FT_PROFILE_URL", "https://api.intra.42.fr/v2/me"),
            scope: env_or("FT_SCOPE", "public"),
        };

        Ok(Self {
            store,
            database_url,
            jwt,
            oauth,
            frontend_url: env_or("FRONTEND_URL", "http://localhost:4200"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
