//! Backup lifecycle orchestration
//!
//! On each invocation the scheduler evaluates every scheduled cadence
//! against its last-run record, generates the due ones, and advances the
//! records to the invocation time. Evaluating all cadences unconditionally
//! keeps catch-up semantics correct: after a long outage a single run
//! performs at most one backup per cadence, not one per missed period.

use crate::config::ControlPlaneConfig;
use crate::models::error::{ConfigError, GenerationError};
use crate::models::types::{BackupDetails, Cadence, RetentionPolicy};
use crate::services::generator::ArtifactGenerator;
use crate::services::provider::ConfigProvider;
use crate::stores::timestamp::TimestampStore;
use chrono::{DateTime, Duration, Months, Utc};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// The instant a cadence becomes due again after a run at `last_run`.
/// Monthly uses calendar arithmetic: one month after Jan 31 is the last
/// day of February, not 30 days later.
fn next_due(cadence: Cadence, last_run: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match cadence {
        Cadence::Daily => Some(last_run + Duration::days(1)),
        Cadence::Weekly => Some(last_run + Duration::weeks(1)),
        Cadence::Monthly => last_run.checked_add_months(Months::new(1)),
        Cadence::Custom => None,
    }
}

pub struct BackupScheduler {
    provider: Arc<dyn ConfigProvider>,
    timestamps: Arc<dyn TimestampStore>,
    generator: Arc<dyn ArtifactGenerator>,
    settings: ControlPlaneConfig,
    retention: RwLock<Option<RetentionPolicy>>,
}

impl BackupScheduler {
    pub fn new(
        provider: Arc<dyn ConfigProvider>,
        timestamps: Arc<dyn TimestampStore>,
        generator: Arc<dyn ArtifactGenerator>,
        settings: ControlPlaneConfig,
    ) -> Self {
        Self {
            provider,
            timestamps,
            generator,
            settings,
            retention: RwLock::new(None),
        }
    }

    /// Fetches and validates the upstream backup settings, then snapshots
    /// the retention counts for this engine lifetime.
    pub async fn initialize(&self) -> Result<(), ConfigError> {
        let details = self.provider.backup_details().await?;
        let retention = self.validate(&details)?;

        self.generator.set_retention(retention.clone());
        *self.retention.write().await = Some(retention);
        Ok(())
    }

    /// Re-runs initialization against fresh upstream data, picking up
    /// retention or credential changes without recreating the engine.
    pub async fn reinitialize(&self) -> Result<(), ConfigError> {
        self.provider.invalidate().await;
        self.initialize().await
    }

    fn validate(&self, details: &BackupDetails) -> Result<RetentionPolicy, ConfigError> {
        if !details.active {
            return Err(ConfigError::Inactive);
        }

        if self.settings.base_url.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Incomplete("base_url"));
        }
        if self
            .settings
            .api_key
            .as_ref()
            .map_or(true, |key| key.expose_secret().is_empty())
        {
            return Err(ConfigError::Incomplete("api_key"));
        }
        if self.settings.repo_name.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Incomplete("repo_name"));
        }
        if details
            .key
            .as_ref()
            .map_or(true, |key| key.expose_secret().is_empty())
        {
            return Err(ConfigError::Incomplete("key"));
        }
        if details
            .secret
            .as_ref()
            .map_or(true, |secret| secret.expose_secret().is_empty())
        {
            return Err(ConfigError::Incomplete("secret"));
        }
        if details.endpoint.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Incomplete("endpoint"));
        }

        Ok(RetentionPolicy::from(details))
    }

    async fn retention_snapshot(&self) -> Result<RetentionPolicy, ConfigError> {
        self.retention
            .read()
            .await
            .clone()
            .ok_or(ConfigError::Uninitialized)
    }

    /// Evaluates daily, weekly, and monthly in that order, generating each
    /// cadence that is due and stamping its last-run record on success.
    ///
    /// A generation failure is logged and leaves that cadence's record
    /// untouched, so the next invocation retries it; the remaining
    /// cadences are still evaluated.
    pub async fn run_scheduled_backups(&self) -> Result<(), ConfigError> {
        let retention = self.retention_snapshot().await?;

        self.generator.clean_up().await;

        let now = self.timestamps.now();
        for cadence in Cadence::SCHEDULED {
            if !self.due(cadence, &retention, now).await {
                continue;
            }

            match self.generator.generate(cadence, now, None).await {
                Ok(()) => {
                    self.timestamps.set_last_run(cadence, now).await;
                    info!(cadence = %cadence, "Backup generated");
                }
                Err(e) => {
                    error!(cadence = %cadence, error = %e, "Backup generation failed");
                }
            }
        }

        self.generator.clean_up().await;
        Ok(())
    }

    async fn due(&self, cadence: Cadence, retention: &RetentionPolicy, now: DateTime<Utc>) -> bool {
        if !retention.is_enabled(cadence) {
            return false;
        }

        let Some(last_run) = self.timestamps.last_run(cadence).await else {
            // Never ran: due immediately.
            return true;
        };

        match next_due(cadence, last_run) {
            Some(due) => now >= due,
            None => false,
        }
    }

    /// Unconditionally generates one custom backup expiring after the
    /// given number of days. Last-run records are not consulted or
    /// mutated.
    pub async fn run_custom_backup(&self, retention_days: u32) -> Result<(), GenerationError> {
        self.generator.clean_up().await;

        let now = self.timestamps.now();
        let expiration = now + Duration::days(i64::from(retention_days));
        self.generator
            .generate(Cadence::Custom, now, Some(expiration))
            .await?;

        info!(days = retention_days, "Custom backup generated");
        Ok(())
    }

    /// Deletes every artifact group whose expiration tag is strictly in
    /// the past. Groups without a readable tag are left untouched.
    pub async fn sweep_expired(&self) -> Result<(), GenerationError> {
        let now = self.timestamps.now();
        let folders = self.generator.list_objects(None, true).await?;

        for folder in folders {
            let Some(expires) = self.generator.expire_timestamp_of(&folder.key).await else {
                continue;
            };

            if expires < now {
                self.generator.delete_object(&folder.key).await?;
                info!(backup = %folder.key, "Removed expired backup");
            }
        }

        Ok(())
    }
}
