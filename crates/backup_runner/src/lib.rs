//! Backup Runner Library
//!
//! A cron-triggered agent that generates, uploads, and expires backups of
//! a site's database and managed file tree, against an S3-compatible
//! object store, governed by retention settings fetched from a control
//! plane.

// Configuration
pub mod config;

// Domain types and errors
pub mod models;

// Engine services
pub mod services;

// Persistence
pub mod stores;

// Re-export commonly used types
pub use config::Config;
pub use models::error::{ConfigError, FetchError, GenerationError};
pub use models::types::{BackupDetails, Cadence, ObjectSummary, RetentionPolicy};
pub use services::generator::{ArtifactGenerator, S3ArtifactGenerator};
pub use services::provider::{ConfigProvider, HttpConfigProvider};
pub use services::scheduler::BackupScheduler;
pub use stores::timestamp::{FileTimestampStore, TimestampStore};
