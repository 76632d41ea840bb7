use thiserror::Error;

/// Fatal configuration problems. These abort a run before any cadence is
/// evaluated.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required backup setting \"{0}\" is missing or empty")]
    Incomplete(&'static str),

    #[error("the project is not active")]
    Inactive,

    #[error("scheduler has not been initialized")]
    Uninitialized,

    #[error("failed to fetch backup details: {0}")]
    Fetch(#[from] FetchError),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Errors talking to the control plane.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("control plane settings are not set up")]
    Unconfigured,

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("control plane returned HTTP {0}")]
    Status(u16),

    #[error("invalid control plane response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors producing or uploading one backup artifact group. Fatal to that
/// attempt only; the scheduler keeps evaluating the remaining cadences.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("a custom backup requires an explicit expiration timestamp")]
    MissingExpiration,

    #[error("database dump failed: {0}")]
    DumpFailed(String),

    #[error("could not compress the files tree: {0}")]
    ArchiveFailed(String),

    #[error("object storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
