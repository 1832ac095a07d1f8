use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, instrument};

use super::{IdentityProvider, OAuthError, ProviderProfile};
use crate::config::OAuthConfig;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// reqwest-backed client for the 42 intra OAuth endpoints. No retries and no
/// timeout beyond the HTTP client's defaults.
#[derive(Clone)]
pub struct FortyTwoClient {
    http: reqwest::Client,
    config: OAuthConfig,
}

impl FortyTwoClient {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn credentials(&self) -> Result<(&str, &str), OAuthError> {
        let id = self
            .config
            .client_id
            .as_deref()
            .ok_or(OAuthError::NotConfigured("FT_CLIENT_ID"))?;
        let secret = self
            .config
            .client_secret
            .as_deref()
            .ok_or(OAuthError::NotConfigured("FT_CLIENT_SECRET"))?;
        Ok((id, secret))
    }
}

async fn rejected(res: reqwest::Response) -> OAuthError {
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    error!(status, %body, "identity provider returned an error");
    OAuthError::Rejected { status, body }
}

#[async_trait]
impl IdentityProvider for FortyTwoClient {
    #[instrument(skip(self, code))]
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String, OAuthError> {
        let (client_id, client_secret) = self.credentials()?;
        let res = self
            .http
            .post(&self.config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(rejected(res).await);
        }
        let token: TokenResponse = res.json().await?;
        debug!("provider access token received");
        Ok(token.access_token)
    }

    #[instrument(skip(self, access_token))]
    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, OAuthError> {
        let res = self
            .http
            .get(&self.config.profile_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(rejected(res).await);
        }
        let profile: ProviderProfile = res.json().await?;
        debug!(provider_id = profile.id, login = %profile.login, "provider profile fetched");
        Ok(profile)
    }
}
