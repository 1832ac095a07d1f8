use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::ClientError;
use crate::auth::dto::{
    AuthResponse, AuthorizeResponse, CompleteProfileRequest, LoginRequest, OAuthTokenRequest,
    OAuthTokenResponse, RegisterRequest,
};
use crate::auth::extractors::TOKEN_HEADER;
use crate::jobs::dto::{CreateJobRequest, JobView};
use crate::messages::dto::{Conversation, MarkReadResponse, MessageView, UnreadCount};
use crate::users::dto::{ProfileUpsertRequest, ProfileView, SellerDirectoryEntry, UserComposite};
use crate::users::repo_types::User;

/// Attempts per request: the original plus one retry.
const ATTEMPTS: usize = 2;

#[derive(Deserialize)]
struct ErrorBody {
    msg: String,
}

/// Typed HTTP client for the REST API. Every call is retried once on any
/// failure, whatever its kind.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// `base_url` includes the `/api` prefix, e.g. `http://localhost:3000/api`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ClientError> {
        let mut req = self
            .http
            .request(method.clone(), format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            req = req.header(TOKEN_HEADER, token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let res = req.send().await?;
        let status = res.status();
        if status.is_success() {
            return Ok(res.json::<T>().await?);
        }
        let text = res.text().await.unwrap_or_default();
        let msg = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.msg)
            .unwrap_or(text);
        Err(ClientError::Api {
            status: status.as_u16(),
            msg,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        let mut last = None;
        for attempt in 1..=ATTEMPTS {
            match self.attempt(&method, path, body.as_ref()).await {
                Ok(v) => {
                    debug!(%method, path, attempt, "api call succeeded");
                    return Ok(v);
                }
                Err(e) => {
                    warn!(%method, path, attempt, error = %e, "api call failed");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or(ClientError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            msg: "request was not attempted".into(),
        }))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request(Method::GET, path, None).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.request(Method::POST, path, Some(serde_json::to_value(body)?))
            .await
    }

    async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.request(Method::PUT, path, Some(serde_json::to_value(body)?))
            .await
    }

    // auth
    pub async fn register(&self, req: &RegisterRequest) -> Result<AuthResponse, ClientError> {
        self.post("/auth/register", req).await
    }

    pub async fn login(&self, req: &LoginRequest) -> Result<AuthResponse, ClientError> {
        self.post("/auth/login", req).await
    }

    pub async fn current_user(&self) -> Result<User, ClientError> {
        self.get("/auth/user").await
    }

    pub async fn oauth_authorize_url(&self, mobile: bool) -> Result<AuthorizeResponse, ClientError> {
        self.get(&format!("/auth/ft/login?mobile={mobile}")).await
    }

    pub async fn oauth_token(&self, req: &OAuthTokenRequest) -> Result<OAuthTokenResponse, ClientError> {
        self.post("/auth/ft/token", req).await
    }

    pub async fn complete_profile(
        &self,
        req: &CompleteProfileRequest,
    ) -> Result<AuthResponse, ClientError> {
        self.post("/auth/complete-profile", req).await
    }

    // jobs
    pub async fn create_job(&self, req: &CreateJobRequest) -> Result<JobView, ClientError> {
        self.post("/jobs", req).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobView>, ClientError> {
        self.get("/jobs").await
    }

    pub async fn get_job(&self, id: Uuid) -> Result<JobView, ClientError> {
        self.get(&format!("/jobs/{id}")).await
    }

    pub async fn assign_job(&self, id: Uuid, answer: Option<&str>) -> Result<JobView, ClientError> {
        self.put(&format!("/jobs/{id}/assign"), &json!({ "answer": answer }))
            .await
    }

    pub async fn complete_job(&self, id: Uuid) -> Result<JobView, ClientError> {
        self.put(&format!("/jobs/{id}/complete"), &json!({})).await
    }

    // messages
    pub async fn send_message(&self, receiver: Uuid, content: &str) -> Result<MessageView, ClientError> {
        self.post("/messages", &json!({ "receiver": receiver, "content": content }))
            .await
    }

    pub async fn conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        self.get("/messages").await
    }

    pub async fn thread(&self, other: Uuid) -> Result<Vec<MessageView>, ClientError> {
        self.get(&format!("/messages/{other}")).await
    }

    pub async fn mark_read(&self, from: Uuid) -> Result<MarkReadResponse, ClientError> {
        self.put(&format!("/messages/read/{from}"), &json!({})).await
    }

    pub async fn unread_count(&self) -> Result<UnreadCount, ClientError> {
        self.get("/messages/unread/count").await
    }

    pub async fn send_job_message(
        &self,
        job_id: Uuid,
        receiver: Option<Uuid>,
        content: &str,
    ) -> Result<MessageView, ClientError> {
        self.post(
            "/messages/job",
            &json!({ "jobId": job_id, "receiver": receiver, "content": content }),
        )
        .await
    }

    pub async fn job_messages(&self, job_id: Uuid) -> Result<Vec<MessageView>, ClientError> {
        self.get(&format!("/messages/job/{job_id}")).await
    }

    // users
    pub async fn profile(&self) -> Result<ProfileView, ClientError> {
        self.get("/users/profile").await
    }

    pub async fn upsert_profile(&self, req: &ProfileUpsertRequest) -> Result<ProfileView, ClientError> {
        self.post("/users/profile", req).await
    }

    pub async fn update_profile(&self, req: &ProfileUpsertRequest) -> Result<ProfileView, ClientError> {
        self.put("/users/profile", req).await
    }

    pub async fn public_profile(&self, user_id: Uuid) -> Result<ProfileView, ClientError> {
        self.get(&format!("/users/profile/{user_id}")).await
    }

    pub async fn sellers(&self) -> Result<Vec<SellerDirectoryEntry>, ClientError> {
        self.get("/users/sellers").await
    }

    pub async fn user(&self, id: Uuid) -> Result<UserComposite, ClientError> {
        self.get(&format!("/users/{id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::spawn;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn error_bodies_become_api_errors() {
        let (base, _state) = spawn().await;
        let api = ApiClient::new(&base);
        let err = api.current_user().await.unwrap_err();
        match err {
            ClientError::Api { status, msg } => {
                assert_eq!(status, 401);
                assert_eq!(msg, "No token, authorization denied");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn every_call_is_retried_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().route(
            "/api/jobs",
            axum::routing::get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err((StatusCode::SERVICE_UNAVAILABLE, "busy"))
                    } else {
                        Ok(axum::Json(Vec::<JobView>::new()))
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let api = ApiClient::new(format!("http://{addr}/api"));
        assert!(api.list_jobs().await.unwrap().is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Persistent failures are retried exactly once, then surfaced.
        let err = api.get_job(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 404, .. }));
    }
}
