//! Scheduler scenarios driven through mock collaborators: a pinned clock,
//! an in-memory timestamp store, and a recording generator.

use async_trait::async_trait;
use backup_runner::config::ControlPlaneConfig;
use backup_runner::models::error::{ConfigError, FetchError, GenerationError};
use backup_runner::models::types::{BackupDetails, Cadence, ObjectSummary, RetentionPolicy};
use backup_runner::services::generator::ArtifactGenerator;
use backup_runner::services::provider::ConfigProvider;
use backup_runner::services::scheduler::BackupScheduler;
use backup_runner::stores::memory::MemoryTimestampStore;
use backup_runner::stores::timestamp::TimestampStore;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

const SPACE: &str = "test-space";

fn details() -> BackupDetails {
    BackupDetails {
        daily: Some(3),
        weekly: Some(7),
        monthly: Some(30),
        active: true,
        key: Some("Test".to_string().into()),
        secret: Some("Test".to_string().into()),
        endpoint: Some("http://storage.test".to_string()),
    }
}

fn settings() -> ControlPlaneConfig {
    ControlPlaneConfig {
        base_url: Some("http://test.local".to_string()),
        api_key: Some("SomeKey".to_string().into()),
        username: None,
        password: None,
        repo_name: Some(SPACE.to_string()),
        api_timeout: Duration::from_secs(5),
    }
}

fn day(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

/// Provider returning whatever details the test currently holds.
struct StaticProvider {
    details: RwLock<BackupDetails>,
}

impl StaticProvider {
    fn new(details: BackupDetails) -> Self {
        Self {
            details: RwLock::new(details),
        }
    }

    fn set_details(&self, details: BackupDetails) {
        *self.details.write().unwrap() = details;
    }
}

#[async_trait]
impl ConfigProvider for StaticProvider {
    async fn backup_details(&self) -> Result<BackupDetails, FetchError> {
        Ok(self.details.read().unwrap().clone())
    }

    async fn invalidate(&self) {}
}

#[derive(Debug, Clone, PartialEq)]
struct Generated {
    cadence: Cadence,
    name: String,
    expiration: Option<DateTime<Utc>>,
}

/// Generator that records calls instead of touching any storage.
#[derive(Default)]
struct RecordingGenerator {
    generated: Mutex<Vec<Generated>>,
    failing: Mutex<HashSet<String>>,
    clean_ups: AtomicUsize,
    objects: Mutex<Vec<(String, Option<i64>)>>,
    deleted: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    fn fail_for(&self, cadence: Cadence) {
        self.failing
            .lock()
            .unwrap()
            .insert(cadence.as_str().to_string());
    }

    fn seed_object(&self, key: &str, expires: Option<i64>) {
        self.objects
            .lock()
            .unwrap()
            .push((key.to_string(), expires));
    }

    fn generated(&self) -> Vec<Generated> {
        self.generated.lock().unwrap().clone()
    }

    fn generated_names(&self) -> Vec<String> {
        self.generated().into_iter().map(|g| g.name).collect()
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactGenerator for RecordingGenerator {
    fn set_retention(&self, _policy: RetentionPolicy) {}

    async fn generate(
        &self,
        cadence: Cadence,
        base_time: DateTime<Utc>,
        explicit_expiration: Option<DateTime<Utc>>,
    ) -> Result<(), GenerationError> {
        if self.failing.lock().unwrap().contains(cadence.as_str()) {
            return Err(GenerationError::Storage("induced failure".to_string()));
        }
        if cadence == Cadence::Custom && explicit_expiration.is_none() {
            return Err(GenerationError::MissingExpiration);
        }

        self.generated.lock().unwrap().push(Generated {
            cadence,
            name: format!("{}-{}-{}", SPACE, cadence, base_time.format("%Y-%m-%d")),
            expiration: explicit_expiration,
        });
        Ok(())
    }

    async fn clean_up(&self) {
        self.clean_ups.fetch_add(1, Ordering::SeqCst);
    }

    async fn list_objects(
        &self,
        prefix: Option<&str>,
        only_folders: bool,
    ) -> Result<Vec<ObjectSummary>, GenerationError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| prefix.map_or(true, |p| key.starts_with(p)))
            .filter(|(key, _)| !only_folders || key.ends_with('/'))
            .map(|(key, _)| ObjectSummary {
                key: key.clone(),
                size: Some(0),
            })
            .collect())
    }

    async fn expire_timestamp_of(&self, key: &str) -> Option<DateTime<Utc>> {
        let objects = self.objects.lock().unwrap();
        let (_, expires) = objects.iter().find(|(k, _)| k == key)?;
        let timestamp = (*expires)?;
        Utc.timestamp_opt(timestamp, 0).single()
    }

    async fn delete_object(&self, key: &str) -> Result<(), GenerationError> {
        self.deleted.lock().unwrap().push(key.to_string());
        self.objects.lock().unwrap().retain(|(k, _)| !k.starts_with(key));
        Ok(())
    }

    async fn self_test(&self) -> Result<(), GenerationError> {
        Ok(())
    }
}

struct World {
    provider: Arc<StaticProvider>,
    timestamps: Arc<MemoryTimestampStore>,
    generator: Arc<RecordingGenerator>,
    scheduler: BackupScheduler,
}

fn world_with(details: BackupDetails) -> World {
    let provider = Arc::new(StaticProvider::new(details));
    let timestamps = Arc::new(MemoryTimestampStore::new());
    let generator = Arc::new(RecordingGenerator::default());
    let scheduler = BackupScheduler::new(
        provider.clone(),
        timestamps.clone(),
        generator.clone(),
        settings(),
    );
    World {
        provider,
        timestamps,
        generator,
        scheduler,
    }
}

fn world() -> World {
    world_with(details())
}

#[tokio::test]
async fn occurrence_backups_follow_their_periods() {
    let world = world();
    let first = day(2021, 1, 1);
    world.timestamps.set_now(first);

    // Weekly and monthly already ran at `first`; daily never did.
    world.timestamps.set_last_run(Cadence::Weekly, first).await;
    world.timestamps.set_last_run(Cadence::Monthly, first).await;

    world.scheduler.initialize().await.unwrap();
    world.scheduler.run_scheduled_backups().await.unwrap();

    assert_eq!(
        world.generator.generated_names(),
        vec!["test-space-daily-2021-01-01"]
    );
    for cadence in Cadence::SCHEDULED {
        assert_eq!(world.timestamps.last_run(cadence).await, Some(first));
    }

    // Same instant again: nothing new is generated.
    world.scheduler.run_scheduled_backups().await.unwrap();
    assert_eq!(world.generator.generated().len(), 1);

    // Next day: only the daily cadence regenerates.
    let second = day(2021, 1, 2);
    world.timestamps.set_now(second);
    world.scheduler.run_scheduled_backups().await.unwrap();
    assert_eq!(
        world.generator.generated_names(),
        vec!["test-space-daily-2021-01-01", "test-space-daily-2021-01-02"]
    );
    assert_eq!(world.timestamps.last_run(Cadence::Daily).await, Some(second));
    assert_eq!(world.timestamps.last_run(Cadence::Weekly).await, Some(first));
    assert_eq!(world.timestamps.last_run(Cadence::Monthly).await, Some(first));

    // Day eight: the weekly period has elapsed as well.
    let eighth = day(2021, 1, 8);
    world.timestamps.set_now(eighth);
    world.scheduler.run_scheduled_backups().await.unwrap();
    assert_eq!(
        &world.generator.generated_names()[2..],
        [
            "test-space-daily-2021-01-08".to_string(),
            "test-space-weekly-2021-01-08".to_string()
        ]
    );
    assert_eq!(world.timestamps.last_run(Cadence::Daily).await, Some(eighth));
    assert_eq!(world.timestamps.last_run(Cadence::Weekly).await, Some(eighth));
    assert_eq!(world.timestamps.last_run(Cadence::Monthly).await, Some(first));

    // Next calendar month: every cadence is due.
    let next_month = day(2021, 2, 1);
    world.timestamps.set_now(next_month);
    world.scheduler.run_scheduled_backups().await.unwrap();
    assert_eq!(
        &world.generator.generated_names()[4..],
        [
            "test-space-daily-2021-02-01".to_string(),
            "test-space-weekly-2021-02-01".to_string(),
            "test-space-monthly-2021-02-01".to_string()
        ]
    );
    for cadence in Cadence::SCHEDULED {
        assert_eq!(world.timestamps.last_run(cadence).await, Some(next_month));
    }
}

#[tokio::test]
async fn catch_up_after_outage_generates_once_per_cadence() {
    let world = world();
    let first = day(2021, 1, 1);
    world.timestamps.set_now(first);
    for cadence in Cadence::SCHEDULED {
        world.timestamps.set_last_run(cadence, first).await;
    }
    world.scheduler.initialize().await.unwrap();

    // Forty days offline: one backup per cadence, records land on `now`,
    // not on the crossed period boundaries.
    let resumed = day(2021, 2, 10);
    world.timestamps.set_now(resumed);
    world.scheduler.run_scheduled_backups().await.unwrap();

    assert_eq!(world.generator.generated().len(), 3);
    for cadence in Cadence::SCHEDULED {
        assert_eq!(world.timestamps.last_run(cadence).await, Some(resumed));
    }
}

#[tokio::test]
async fn custom_backup_expires_after_the_requested_days() {
    let world = world();
    let now = day(2021, 1, 1);
    world.timestamps.set_now(now);
    world.scheduler.initialize().await.unwrap();

    world.scheduler.run_custom_backup(10).await.unwrap();

    let generated = world.generator.generated();
    assert_eq!(generated.len(), 1);
    assert_eq!(generated[0].cadence, Cadence::Custom);
    assert_eq!(generated[0].name, "test-space-custom-2021-01-01");
    assert_eq!(generated[0].expiration, Some(day(2021, 1, 11)));

    // Custom backups never touch the last-run records.
    for cadence in Cadence::SCHEDULED {
        assert!(world.timestamps.last_run(cadence).await.is_none());
    }
}

#[tokio::test]
async fn custom_backup_single_day_retention() {
    let world = world();
    let now = day(2021, 1, 1);
    world.timestamps.set_now(now);
    world.scheduler.initialize().await.unwrap();

    world.scheduler.run_custom_backup(1).await.unwrap();
    assert_eq!(
        world.generator.generated()[0].expiration,
        Some(day(2021, 1, 2))
    );
}

#[tokio::test]
async fn disabled_cadences_are_skipped_until_reenabled() {
    let mut all_disabled = details();
    all_disabled.daily = None;
    all_disabled.weekly = Some(0);
    all_disabled.monthly = None;

    let world = world_with(all_disabled);
    world.timestamps.set_now(day(2021, 1, 1));
    world.scheduler.initialize().await.unwrap();
    world.scheduler.run_scheduled_backups().await.unwrap();

    assert!(world.generator.generated().is_empty());
    for cadence in Cadence::SCHEDULED {
        assert!(world.timestamps.last_run(cadence).await.is_none());
    }

    // The control plane re-enables daily; reinitialize picks it up.
    let mut daily_only = details();
    daily_only.daily = Some(1);
    daily_only.weekly = None;
    daily_only.monthly = None;
    world.provider.set_details(daily_only);

    world.scheduler.reinitialize().await.unwrap();
    world.scheduler.run_scheduled_backups().await.unwrap();

    assert_eq!(
        world.generator.generated_names(),
        vec!["test-space-daily-2021-01-01"]
    );
    assert!(world.timestamps.last_run(Cadence::Weekly).await.is_none());
    assert!(world.timestamps.last_run(Cadence::Monthly).await.is_none());
}

#[tokio::test]
async fn one_failing_cadence_does_not_stop_the_others() {
    let world = world();
    world.timestamps.set_now(day(2021, 1, 1));
    world.generator.fail_for(Cadence::Daily);
    world.scheduler.initialize().await.unwrap();

    world.scheduler.run_scheduled_backups().await.unwrap();

    assert_eq!(
        world.generator.generated_names(),
        vec![
            "test-space-weekly-2021-01-01",
            "test-space-monthly-2021-01-01"
        ]
    );
    // The failed cadence keeps its missing record and is retried next run.
    assert!(world.timestamps.last_run(Cadence::Daily).await.is_none());
    assert!(world.timestamps.last_run(Cadence::Weekly).await.is_some());

    world.generator.failing.lock().unwrap().clear();
    world.scheduler.run_scheduled_backups().await.unwrap();
    assert!(world
        .generator
        .generated_names()
        .contains(&"test-space-daily-2021-01-01".to_string()));
}

#[tokio::test]
async fn clean_up_runs_before_and_after_every_scheduled_pass() {
    let mut all_disabled = details();
    all_disabled.daily = None;
    all_disabled.weekly = None;
    all_disabled.monthly = None;

    let world = world_with(all_disabled);
    world.timestamps.set_now(day(2021, 1, 1));
    world.scheduler.initialize().await.unwrap();
    world.scheduler.run_scheduled_backups().await.unwrap();

    assert_eq!(world.generator.clean_ups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn scheduled_run_requires_initialization() {
    let world = world();
    world.timestamps.set_now(day(2021, 1, 1));

    assert!(matches!(
        world.scheduler.run_scheduled_backups().await,
        Err(ConfigError::Uninitialized)
    ));
    assert!(world.generator.generated().is_empty());
}

#[tokio::test]
async fn inactive_project_refuses_to_initialize() {
    let mut inactive = details();
    inactive.active = false;

    let world = world_with(inactive);
    assert!(matches!(
        world.scheduler.initialize().await,
        Err(ConfigError::Inactive)
    ));
}

#[tokio::test]
async fn missing_store_credentials_fail_initialization() {
    let mut incomplete = details();
    incomplete.secret = None;
    let world = world_with(incomplete);
    assert!(matches!(
        world.scheduler.initialize().await,
        Err(ConfigError::Incomplete("secret"))
    ));

    let mut incomplete = details();
    incomplete.endpoint = None;
    let world = world_with(incomplete);
    assert!(matches!(
        world.scheduler.initialize().await,
        Err(ConfigError::Incomplete("endpoint"))
    ));
}

#[tokio::test]
async fn missing_retention_counts_do_not_fail_initialization() {
    let mut no_retention = details();
    no_retention.daily = None;
    no_retention.weekly = None;
    no_retention.monthly = None;

    let world = world_with(no_retention);
    assert!(world.scheduler.initialize().await.is_ok());
}

#[tokio::test]
async fn sweep_deletes_only_strictly_expired_groups() {
    let world = world();
    let now = day(2021, 2, 1);
    world.timestamps.set_now(now);
    world.scheduler.initialize().await.unwrap();

    world
        .generator
        .seed_object("test-space-daily-2021-01-01 (00:00:00)/", Some(day(2021, 1, 2).timestamp()));
    world
        .generator
        .seed_object("test-space-weekly-2021-01-25 (00:00:00)/", Some(now.timestamp()));
    world
        .generator
        .seed_object("test-space-monthly-2021-01-01 (00:00:00)/", Some(day(2021, 3, 1).timestamp()));
    world.generator.seed_object("untagged-backup/", None);
    // Non-folder keys are not considered groups.
    world
        .generator
        .seed_object("test-space-daily-2021-01-01 (00:00:00)/database.sql.gz", Some(0));

    world.scheduler.sweep_expired().await.unwrap();

    assert_eq!(
        world.generator.deleted(),
        vec!["test-space-daily-2021-01-01 (00:00:00)/"]
    );
    // The group with an unreadable tag and the unexpired ones survive.
    let remaining = world.generator.objects.lock().unwrap().clone();
    assert!(remaining.iter().any(|(k, _)| k == "untagged-backup/"));
    assert!(remaining
        .iter()
        .any(|(k, _)| k == "test-space-weekly-2021-01-25 (00:00:00)/"));
}
