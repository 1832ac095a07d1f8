use tracing::{info, warn};

use super::api::ApiClient;
use super::guards::{market_guard, GuardOutcome};
use super::session::{Session, SessionStore};
use super::ClientError;
use crate::auth::dto::{CompleteProfileRequest, LoginRequest, OAuthTokenRequest, RegisterRequest};
use crate::users::repo_types::{Role, User};

/// Auth flows that keep the API client's token and the session file in step.
pub struct AuthShell {
    api: ApiClient,
    store: SessionStore,
}

impl AuthShell {
    pub fn new(mut api: ApiClient, store: SessionStore) -> Self {
        api.set_token(store.token().map(str::to_string));
        Self { api, store }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> Option<&Session> {
        self.store.current()
    }

    fn remember(&mut self, token: String, user: &User) -> Result<Session, ClientError> {
        let session = Session::new(token, user);
        self.store.save(session.clone())?;
        self.api.set_token(Some(session.token.clone()));
        Ok(session)
    }

    pub async fn register(&mut self, req: RegisterRequest) -> Result<Session, ClientError> {
        let res = self.api.register(&req).await?;
        info!(user_id = %res.user.id, "registered");
        self.remember(res.token, &res.user)
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<Session, ClientError> {
        let res = self
            .api
            .login(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;
        info!(user_id = %res.user.id, "logged in");
        self.remember(res.token, &res.user)
    }

    /// Finishes the OAuth redirect dance with the code the provider handed
    /// back. The session's role tells whether onboarding is still due.
    pub async fn login_with_code(&mut self, code: &str, mobile: bool) -> Result<Session, ClientError> {
        let res = self
            .api
            .oauth_token(&OAuthTokenRequest {
                code: code.to_string(),
                mobile,
            })
            .await?;
        info!(user_id = %res.user.id, is_new_user = res.is_new_user, "oauth login");
        self.remember(res.token, &res.user)
    }

    pub async fn complete_profile(&mut self, username: &str, role: Role) -> Result<Session, ClientError> {
        if !self.store.is_logged_in() {
            return Err(ClientError::NotLoggedIn);
        }
        let res = self
            .api
            .complete_profile(&CompleteProfileRequest {
                username: username.to_string(),
                role,
            })
            .await?;
        self.remember(res.token, &res.user)
    }

    /// Re-reads the current user. A rejected token ends the session.
    pub async fn refresh_user(&mut self) -> Result<Session, ClientError> {
        let token = self
            .store
            .token()
            .map(str::to_string)
            .ok_or(ClientError::NotLoggedIn)?;
        match self.api.current_user().await {
            Ok(user) => self.remember(token, &user),
            Err(ClientError::Api { status: 401, msg }) => {
                warn!(%msg, "stored token rejected; logging out");
                self.logout()?;
                Err(ClientError::Api { status: 401, msg })
            }
            Err(e) => Err(e),
        }
    }

    /// Adopts a token handed over in a redirect query string and stores the
    /// user it belongs to.
    pub async fn adopt_token(&mut self, token: &str) -> Result<Session, ClientError> {
        let previous = self.api.token().map(str::to_string);
        self.api.set_token(Some(token.to_string()));
        match self.api.current_user().await {
            Ok(user) => self.remember(token.to_string(), &user),
            Err(e) => {
                self.api.set_token(previous);
                Err(e)
            }
        }
    }

    /// Market entry: adopts a query token when it differs from the stored
    /// one, then applies the market guard.
    pub async fn enter_market(&mut self, token_query: Option<&str>) -> Result<GuardOutcome, ClientError> {
        if let Some(token) = token_query.filter(|t| !t.is_empty()) {
            if self.store.token() != Some(token) {
                self.adopt_token(token).await?;
            }
        }
        Ok(market_guard(self.store.current(), token_query))
    }

    pub fn logout(&mut self) -> Result<(), ClientError> {
        self.api.set_token(None);
        self.store.clear()?;
        info!("logged out");
        Ok(())
    }
}
