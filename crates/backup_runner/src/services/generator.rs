//! Backup artifact group generation and object storage operations

use crate::config::Config;
use crate::models::error::{ConfigError, GenerationError};
use crate::models::types::{BackupDetails, Cadence, ObjectSummary, RetentionPolicy};
use crate::services::archiver::{BackupArchiver, DATABASE_ARTIFACT, FILES_ARTIFACT};
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Duration, TimeZone, Utc};
use secrecy::ExposeSecret;
use std::sync::RwLock;
use tokio::fs;
use tracing::{info, warn};

/// Object metadata key carrying the expiration Unix timestamp. Travels on
/// the wire as `x-amz-meta-timestamp-expires`.
pub const METADATA_EXPIRES: &str = "timestamp-expires";

/// Produces backup artifact groups and owns every object-store operation
/// the engine performs.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    /// Configures the retention counts used to derive expiration
    /// timestamps for the scheduled cadences.
    fn set_retention(&self, policy: RetentionPolicy);

    /// Generates one artifact group: database dump, files archive, and the
    /// folder marker, all stamped with the same expiration metadata.
    ///
    /// A `Custom` cadence requires `explicit_expiration`; the scheduled
    /// cadences derive theirs from the retention policy.
    async fn generate(
        &self,
        cadence: Cadence,
        base_time: DateTime<Utc>,
        explicit_expiration: Option<DateTime<Utc>>,
    ) -> Result<(), GenerationError>;

    /// Removes staged local artifacts. Never errors on absence.
    async fn clean_up(&self);

    async fn list_objects(
        &self,
        prefix: Option<&str>,
        only_folders: bool,
    ) -> Result<Vec<ObjectSummary>, GenerationError>;

    /// Reads the expiration metadata of an object. `None` when the object
    /// or its tag is missing or unparsable.
    async fn expire_timestamp_of(&self, key: &str) -> Option<DateTime<Utc>>;

    /// Deletes a single object or everything under a prefix.
    async fn delete_object(&self, key: &str) -> Result<(), GenerationError>;

    /// Verifies bucket reachability and local filesystem access without
    /// producing any artifact.
    async fn self_test(&self) -> Result<(), GenerationError>;
}

#[derive(Debug)]
pub struct S3ArtifactGenerator {
    s3_client: S3Client,
    archiver: BackupArchiver,
    space: String,
    environment: Option<String>,
    bucket_override: Option<String>,
    bucket_name: RwLock<Option<String>>,
    retention: RwLock<RetentionPolicy>,
}

impl S3ArtifactGenerator {
    /// Builds the storage client from the fetched backup details. Fails
    /// fast when the store credentials are absent.
    pub fn new(config: &Config, details: &BackupDetails) -> Result<Self, ConfigError> {
        let key = details.key.as_ref().ok_or(ConfigError::Incomplete("key"))?;
        let secret = details
            .secret
            .as_ref()
            .ok_or(ConfigError::Incomplete("secret"))?;
        let endpoint = details
            .endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or(ConfigError::Incomplete("endpoint"))?;

        let credentials = Credentials::new(
            key.expose_secret(),
            secret.expose_secret(),
            None,
            None,
            "backup-runner",
        );

        let s3_config = aws_sdk_s3::config::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.storage.region.clone()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(config.storage.force_path_style)
            .build();

        Ok(Self {
            s3_client: S3Client::from_conf(s3_config),
            archiver: BackupArchiver::new(&config.backup),
            space: config.control_plane.repo_name.clone().unwrap_or_default(),
            environment: config.storage.environment.clone(),
            bucket_override: config.storage.bucket_name.clone(),
            bucket_name: RwLock::new(None),
            retention: RwLock::new(RetentionPolicy::default()),
        })
    }

    /// Ensures the target bucket exists, creating it when the existence
    /// check reports not-found. The resolved name is cached for the
    /// lifetime of the generator.
    async fn prepare_bucket(&self) -> Result<String, GenerationError> {
        if let Some(name) = self.bucket_name.read().unwrap().clone() {
            return Ok(name);
        }

        let name = self
            .bucket_override
            .clone()
            .unwrap_or_else(|| self.space.clone());

        match self.s3_client.head_bucket().bucket(&name).send().await {
            Ok(_) => {}
            Err(err) if err.as_service_error().map(|e| e.is_not_found()) == Some(true) => {
                self.s3_client
                    .create_bucket()
                    .bucket(&name)
                    .send()
                    .await
                    .map_err(|e| {
                        GenerationError::Storage(format!("failed to create bucket {}: {}", name, e))
                    })?;
                info!(bucket = %name, "Created backup bucket");
            }
            Err(err) => {
                return Err(GenerationError::Storage(format!(
                    "failed to access bucket {}: {}",
                    name, err
                )));
            }
        }

        *self.bucket_name.write().unwrap() = Some(name.clone());
        Ok(name)
    }

    /// Derives the expiration timestamp for one group: verbatim for
    /// custom backups, base time plus the retention count otherwise.
    fn expiration_for(
        &self,
        cadence: Cadence,
        base_time: DateTime<Utc>,
        explicit_expiration: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>, GenerationError> {
        if cadence == Cadence::Custom {
            return explicit_expiration.ok_or(GenerationError::MissingExpiration);
        }

        let days = self
            .retention
            .read()
            .unwrap()
            .days_for(cadence)
            .unwrap_or(0);
        Ok(base_time + Duration::days(i64::from(days)))
    }

    /// Group key prefix, without the trailing separator:
    /// `{space}[-{environment}]-{cadence}-{Y-m-d (H:i:s)}`.
    fn folder_name(&self, cadence: Cadence, base_time: DateTime<Utc>) -> String {
        let date = base_time.format("%Y-%m-%d (%H:%M:%S)");
        match &self.environment {
            Some(environment) => format!("{}-{}-{}-{}", self.space, environment, cadence, date),
            None => format!("{}-{}-{}", self.space, cadence, date),
        }
    }

    async fn upload(
        &self,
        bucket: &str,
        key: String,
        body: Option<Vec<u8>>,
        expire_timestamp: i64,
    ) -> Result<(), GenerationError> {
        let mut request = self
            .s3_client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .metadata(METADATA_EXPIRES, expire_timestamp.to_string());

        if let Some(data) = body {
            request = request.body(ByteStream::from(data));
        }

        request
            .send()
            .await
            .map_err(|e| GenerationError::Storage(format!("failed to upload {}: {}", key, e)))?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactGenerator for S3ArtifactGenerator {
    fn set_retention(&self, policy: RetentionPolicy) {
        *self.retention.write().unwrap() = policy;
    }

    async fn generate(
        &self,
        cadence: Cadence,
        base_time: DateTime<Utc>,
        explicit_expiration: Option<DateTime<Utc>>,
    ) -> Result<(), GenerationError> {
        let expire_timestamp = self
            .expiration_for(cadence, base_time, explicit_expiration)?
            .timestamp();

        let database_path = self.archiver.ensure_database_dump().await?;
        let files_path = self.archiver.ensure_files_archive().await?;
        let bucket = self.prepare_bucket().await?;

        let folder_name = self.folder_name(cadence, base_time);

        // Marker first: a dangling folder object is harmless, a dump
        // without its folder is invisible to the expiration sweep.
        self.upload(&bucket, format!("{}/", folder_name), None, expire_timestamp)
            .await?;

        let database = fs::read(&database_path).await?;
        self.upload(
            &bucket,
            format!("{}/{}", folder_name, DATABASE_ARTIFACT),
            Some(database),
            expire_timestamp,
        )
        .await?;

        let files = fs::read(&files_path).await?;
        self.upload(
            &bucket,
            format!("{}/{}", folder_name, FILES_ARTIFACT),
            Some(files),
            expire_timestamp,
        )
        .await?;

        info!(backup = %folder_name, expires = expire_timestamp, "Created a new backup");
        Ok(())
    }

    async fn clean_up(&self) {
        self.archiver.clean_up().await;
    }

    async fn list_objects(
        &self,
        prefix: Option<&str>,
        only_folders: bool,
    ) -> Result<Vec<ObjectSummary>, GenerationError> {
        let bucket = self.prepare_bucket().await?;

        let mut summaries = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self.s3_client.list_objects_v2().bucket(&bucket);
            if let Some(prefix) = prefix {
                request = request.prefix(prefix);
            }
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| GenerationError::Storage(format!("failed to list objects: {}", e)))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                if only_folders && !key.ends_with('/') {
                    continue;
                }
                summaries.push(ObjectSummary {
                    key: key.to_string(),
                    size: object.size(),
                });
            }

            continuation = response
                .next_continuation_token()
                .map(|token| token.to_string());
            if continuation.is_none() {
                break;
            }
        }

        Ok(summaries)
    }

    async fn expire_timestamp_of(&self, key: &str) -> Option<DateTime<Utc>> {
        let bucket = match self.prepare_bucket().await {
            Ok(bucket) => bucket,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not resolve bucket for metadata read");
                return None;
            }
        };

        let head = match self
            .s3_client
            .head_object()
            .bucket(&bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => head,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not read object metadata");
                return None;
            }
        };

        let raw = head.metadata()?.get(METADATA_EXPIRES)?;
        let timestamp: i64 = raw.parse().ok()?;
        Utc.timestamp_opt(timestamp, 0).single()
    }

    async fn delete_object(&self, key: &str) -> Result<(), GenerationError> {
        let bucket = self.prepare_bucket().await?;
        let objects = self.list_objects(Some(key), false).await?;

        if objects.is_empty() {
            return Ok(());
        }

        // DeleteObjects accepts at most 1000 keys per request.
        for chunk in objects.chunks(1000) {
            let identifiers = chunk
                .iter()
                .map(|object| ObjectIdentifier::builder().key(&object.key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| GenerationError::Storage(format!("invalid object key: {}", e)))?;

            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .build()
                .map_err(|e| GenerationError::Storage(format!("invalid delete request: {}", e)))?;

            self.s3_client
                .delete_objects()
                .bucket(&bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| {
                    GenerationError::Storage(format!("failed to delete {}: {}", key, e))
                })?;
        }

        Ok(())
    }

    async fn self_test(&self) -> Result<(), GenerationError> {
        self.prepare_bucket().await?;
        self.archiver.verify_local_access().await
    }
}
