use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

// Custom deserializer for Duration that accepts integer seconds
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub control_plane: ControlPlaneConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub backup: BackupConfig,
    pub state: StateConfig,
}

/// Where backup retention settings and storage credentials are fetched from.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    /// The repository (space) name this site backs up into.
    #[serde(default)]
    pub repo_name: Option<String>,
    #[serde(
        default = "default_api_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub api_timeout: Duration,
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Overrides the space name as the bucket to upload into.
    #[serde(default)]
    pub bucket_name: Option<String>,
    /// Optional deployment suffix appended to group keys (e.g. "staging").
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_path_style")]
    pub force_path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_path_style() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket_name: None,
            environment: None,
            region: default_region(),
            force_path_style: default_path_style(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    /// Scheduled runs are a no-op unless explicitly enabled.
    #[serde(default)]
    pub enable_backups: bool,
    /// Where dump and archive artifacts are staged before upload.
    pub working_dir: PathBuf,
    /// Root of the managed file tree to archive.
    pub files_root: PathBuf,
    /// Command producing a plain SQL dump on stdout; run through `sh -c`.
    pub database_dump_command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Path of the JSON file holding per-cadence last-run timestamps.
    pub path: PathBuf,
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let config_path = path.unwrap_or("/etc/backup-runner/config.yaml");
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path))
            .add_source(config::Environment::with_prefix("BACKUP"))
            .build()?;

        settings.try_deserialize()
    }
}
