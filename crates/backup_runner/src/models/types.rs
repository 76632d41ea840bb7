//! Core backup domain types

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// The recurrence class of a backup.
///
/// `Custom` is never scheduled automatically; it is only produced on
/// explicit request and carries an explicit expiration instead of a
/// derived one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl Cadence {
    /// The automatically scheduled cadences, in evaluation order.
    pub const SCHEDULED: [Cadence; 3] = [Cadence::Daily, Cadence::Weekly, Cadence::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
            Cadence::Custom => "custom",
        }
    }

    /// Key under which the last successful run of this cadence is persisted.
    pub fn timestamp_key(&self) -> String {
        format!("{}_last_timestamp", self.as_str())
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// The control plane reports disabled cadences as `false`, `null`, or by
// omitting the field entirely; only a number enables the cadence.
fn deserialize_retention<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Count(u32),
        Flag(bool),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Count(days)) => Some(days),
        Some(Raw::Flag(_)) | None => None,
    })
}

fn default_active() -> bool {
    true
}

/// Backup settings fetched from the control plane, cached for the
/// lifetime of the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupDetails {
    #[serde(default, deserialize_with = "deserialize_retention")]
    pub daily: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_retention")]
    pub weekly: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_retention")]
    pub monthly: Option<u32>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub key: Option<SecretString>,
    #[serde(default)]
    pub secret: Option<SecretString>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Retention counts in days for the scheduled cadences. `None` and
/// `Some(0)` both mean the cadence is disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub daily: Option<u32>,
    pub weekly: Option<u32>,
    pub monthly: Option<u32>,
}

impl RetentionPolicy {
    pub fn days_for(&self, cadence: Cadence) -> Option<u32> {
        match cadence {
            Cadence::Daily => self.daily,
            Cadence::Weekly => self.weekly,
            Cadence::Monthly => self.monthly,
            Cadence::Custom => None,
        }
    }

    pub fn is_enabled(&self, cadence: Cadence) -> bool {
        matches!(self.days_for(cadence), Some(days) if days > 0)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily: Some(1),
            weekly: Some(7),
            monthly: Some(30),
        }
    }
}

impl From<&BackupDetails> for RetentionPolicy {
    fn from(details: &BackupDetails) -> Self {
        Self {
            daily: details.daily,
            weekly: details.weekly,
            monthly: details.monthly,
        }
    }
}

/// A single object row returned by a storage listing.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: Option<i64>,
}

impl ObjectSummary {
    /// Folder markers are zero-byte objects with a trailing separator.
    pub fn is_folder(&self) -> bool {
        self.key.ends_with('/')
    }
}
