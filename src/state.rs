use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::{self, Store};
use crate::oauth::{FortyTwoClient, IdentityProvider};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub provider: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let store = db::connect(&config).await?;
        let provider =
            Arc::new(FortyTwoClient::new(config.oauth.clone())) as Arc<dyn IdentityProvider>;

        Ok(Self {
            store,
            config,
            provider,
        })
    }

    pub fn from_parts(
        store: Arc<dyn Store>,
        config: Arc<AppConfig>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            store,
            config,
            provider,
        }
    }

    /// In-memory store, fixed JWT settings and a stub provider that accepts
    /// the code `good-code` for the 42 user `ada` (id 4242).
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::{JwtConfig, OAuthConfig, StoreBackend};
        use crate::db::MemoryStore;
        use crate::oauth::testing::StubProvider;

        let config = Arc::new(AppConfig {
            store: StoreBackend::Memory,
            database_url: None,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 60,
            },
            oauth: OAuthConfig {
                client_id: Some("test-client".into()),
                client_secret: Some("test-secret".into()),
                redirect_uri: "http://localhost:4200/oauth-callback".into(),
                mobile_redirect_uri: "jobconsult://oauth-callback".into(),
                authorize_url: "https://provider.test/oauth/authorize".into(),
                token_url: "https://provider.test/oauth/token".into(),
                profile_url: "https://provider.test/v2/me".into(),
                scope: "public".into(),
            },
            frontend_url: "http://localhost:4200".into(),
        });

        Self {
            store: Arc::new(MemoryStore::default()),
            config,
            provider: Arc::new(StubProvider::new("good-code", 4242, "ada", "ada@42.fr")),
        }
    }
}
