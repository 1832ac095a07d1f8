use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::db::StoreError;

/// Boundary error for every handler. Rendered as `{"msg": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("User already exists")]
    DuplicateEmail,
    #[error("Username already taken")]
    DuplicateUsername,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Conflict(String),
    #[error("identity provider error: {message}")]
    Upstream { status: Option<u16>, message: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        ApiError::Unauthorized(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError::Conflict(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::DuplicateEmail
            | ApiError::DuplicateUsername
            | ApiError::InvalidCredentials
            | ApiError::Conflict(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Upstream { status: Some(s), .. } if (400..500).contains(s) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Upstream { .. } | ApiError::Configuration(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let msg = match &self {
            ApiError::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                "Server error".to_string()
            }
            ApiError::Configuration(detail) => {
                tracing::error!(%detail, "configuration error");
                "Server is not configured for this operation".to_string()
            }
            ApiError::Upstream { status, message } => {
                tracing::error!(?status, %message, "identity provider failure");
                self.to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "msg": msg }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate("email") => ApiError::DuplicateEmail,
            StoreError::Duplicate("username") => ApiError::DuplicateUsername,
            StoreError::Duplicate(field) => ApiError::Conflict(format!("{field} already linked")),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!(status = %rejection.status(), "rejected request body");
        ApiError::Validation(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// `Json` extractor whose rejections render like every other `ApiError`.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

/// Path ids that do not parse cannot name an existing record.
pub fn parse_id(raw: &str, what: &'static str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let res = err.into_response();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn taxonomy_maps_to_status_codes() {
        assert_eq!(ApiError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("Job").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::unauthorized("no").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::conflict("taken").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Upstream { status: Some(401), message: "bad code".into() }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Upstream { status: None, message: "timeout".into() }.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_details() {
        let (status, body) = body_json(ApiError::Internal(anyhow::anyhow!("pool exhausted"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["msg"], "Server error");
    }

    #[tokio::test]
    async fn store_duplicates_become_domain_errors() {
        assert!(matches!(
            ApiError::from(StoreError::Duplicate("email")),
            ApiError::DuplicateEmail
        ));
        let (_, body) = body_json(StoreError::Duplicate("username").into()).await;
        assert_eq!(body["msg"], "Username already taken");
    }

    #[test]
    fn malformed_ids_are_not_found() {
        assert!(matches!(parse_id("not-a-uuid", "Job"), Err(ApiError::NotFound("Job"))));
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string(), "Job").unwrap(), id);
    }
}
