//! Client application shell: the session cache, the HTTP client and the route
//! guards a frontend drives the API with.

pub mod api;
pub mod guards;
pub mod session;
pub mod shell;

pub use api::ApiClient;
pub use guards::{auth_guard, market_guard, GuardOutcome, Route};
pub use session::{Session, SessionStore};
pub use shell::AuthShell;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Non-2xx answer; `msg` is the server's `{"msg"}` or the raw body.
    #[error("{msg} (HTTP {status})")]
    Api { status: u16, msg: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("session file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not logged in")]
    NotLoggedIn,
}
