//! Last-run timestamp persistence

use crate::models::types::Cadence;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, warn};

/// Tracks the last successful backup per cadence and supplies "now".
///
/// `now` is the sole time source the engine is permitted to call, so tests
/// can substitute a fixed clock.
#[async_trait]
pub trait TimestampStore: Send + Sync {
    /// Returns `None` when the cadence never ran or the stored value is
    /// unparsable.
    async fn last_run(&self, cadence: Cadence) -> Option<DateTime<Utc>>;

    async fn set_last_run(&self, cadence: Cadence, time: DateTime<Utc>);

    fn now(&self) -> DateTime<Utc>;
}

/// JSON-file-backed store, one `{cadence}_last_timestamp` entry per cadence.
pub struct FileTimestampStore {
    path: PathBuf,
}

impl FileTimestampStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read_entries(&self) -> HashMap<String, Value> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "Timestamp state is unreadable, treating as empty");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        }
    }

    async fn write_entries(&self, entries: &HashMap<String, Value>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so a crash mid-write cannot corrupt the state.
        let staged = self.path.with_extension("tmp");
        let content = serde_json::to_string_pretty(entries)?;
        fs::write(&staged, content).await?;
        fs::rename(&staged, &self.path).await
    }
}

#[async_trait]
impl TimestampStore for FileTimestampStore {
    async fn last_run(&self, cadence: Cadence) -> Option<DateTime<Utc>> {
        let entries = self.read_entries().await;
        let timestamp = entries.get(&cadence.timestamp_key())?.as_i64()?;
        Utc.timestamp_opt(timestamp, 0).single()
    }

    async fn set_last_run(&self, cadence: Cadence, time: DateTime<Utc>) {
        let mut entries = self.read_entries().await;
        entries.insert(cadence.timestamp_key(), Value::from(time.timestamp()));
        if let Err(e) = self.write_entries(&entries).await {
            error!(path = %self.path.display(), cadence = %cadence, error = %e, "Failed to persist last-run timestamp");
        }
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
