//! Control-plane client supplying retention settings and storage credentials

use crate::config::ControlPlaneConfig;
use crate::models::error::FetchError;
use crate::models::types::BackupDetails;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use tokio::sync::RwLock;
use tracing::info;

const API_KEY_HEADER: &str = "BACKUP-API-KEY";

/// Supplies the remote backup configuration, cached per instance.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn backup_details(&self) -> Result<BackupDetails, FetchError>;

    /// Drops the cached details so the next fetch hits the control plane.
    async fn invalidate(&self);
}

/// Fetches backup details over HTTP, authenticated with an API key header
/// and optional basic auth.
pub struct HttpConfigProvider {
    http_client: Client,
    settings: ControlPlaneConfig,
    cached: RwLock<Option<BackupDetails>>,
}

impl HttpConfigProvider {
    pub fn new(settings: ControlPlaneConfig) -> Self {
        let http_client = Client::builder()
            .timeout(settings.api_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            settings,
            cached: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> Result<BackupDetails, FetchError> {
        let (base_url, api_key, repo_name) = match (
            self.settings.base_url.as_deref(),
            self.settings.api_key.as_ref(),
            self.settings.repo_name.as_deref(),
        ) {
            (Some(url), Some(key), Some(repo)) if !url.is_empty() && !repo.is_empty() => {
                (url, key, repo)
            }
            _ => return Err(FetchError::Unconfigured),
        };

        let url = format!(
            "{}/backup/{}",
            base_url.trim_end_matches('/'),
            repo_name.trim_matches('/')
        );

        let mut request = self
            .http_client
            .get(&url)
            .header(API_KEY_HEADER, api_key.expose_secret());

        if let (Some(username), Some(password)) =
            (&self.settings.username, &self.settings.password)
        {
            request = request.basic_auth(username, Some(password.expose_secret()));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        let details: BackupDetails = serde_json::from_str(&body)?;

        info!(repo = %repo_name, "Fetched backup details");
        Ok(details)
    }
}

#[async_trait]
impl ConfigProvider for HttpConfigProvider {
    async fn backup_details(&self) -> Result<BackupDetails, FetchError> {
        if let Some(details) = self.cached.read().await.clone() {
            return Ok(details);
        }

        let details = self.fetch().await?;
        *self.cached.write().await = Some(details.clone());
        Ok(details)
    }

    async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}
