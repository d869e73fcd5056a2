use std::sync::Arc;

use crate::billing::stripe_integration::StripeClient;
use crate::core::config::AppConfig;
use crate::email::EmailClient;
use crate::leads::store::{LeadStore, PgLeadStore};
use crate::security::jwt::JwtManager;
use crate::shared::utils::DbPool;
use crate::storage::UploadSigner;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub jwt: Arc<JwtManager>,
    pub leads: Arc<dyn LeadStore>,
    pub stripe: Option<StripeClient>,
    pub email: Option<EmailClient>,
    pub storage: Option<UploadSigner>,
    pub http: reqwest::Client,
}

impl AppState {
    pub async fn new(config: AppConfig, conn: DbPool) -> Self {
        let http = reqwest::Client::new();

        let stripe = config.stripe.as_ref().map(|stripe| {
            StripeClient::new(
                http.clone(),
                stripe.secret_key.clone(),
                stripe.webhook_secret.clone(),
            )
        });

        let email = config
            .email
            .as_ref()
            .map(|email| EmailClient::new(http.clone(), email.api_key.clone(), email.from.clone()));

        let storage = match config.storage.as_ref() {
            Some(storage) => Some(UploadSigner::from_config(storage).await),
            None => None,
        };

        Self {
            jwt: Arc::new(JwtManager::new(&config.jwt)),
            leads: Arc::new(PgLeadStore::new(conn.clone())),
            conn,
            config,
            stripe,
            email,
            storage,
            http,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("conn", &"DbPool")
            .field("config", &self.config.server)
            .field("stripe", &self.stripe.is_some())
            .field("email", &self.email.is_some())
            .field("storage", &self.storage.is_some())
            .finish()
    }
}
