//! In-memory timestamp store with a settable clock

use crate::models::types::Cadence;
use crate::stores::timestamp::TimestampStore;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Keeps last-run records in memory. The clock can be pinned to a fixed
/// instant, which makes due-time evaluation deterministic in tests.
pub struct MemoryTimestampStore {
    entries: RwLock<HashMap<String, i64>>,
    fixed_now: RwLock<Option<DateTime<Utc>>>,
}

impl MemoryTimestampStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fixed_now: RwLock::new(None),
        }
    }

    /// Pins `now` to the given instant until changed again.
    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.fixed_now.write().unwrap() = Some(now);
    }
}

impl Default for MemoryTimestampStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimestampStore for MemoryTimestampStore {
    async fn last_run(&self, cadence: Cadence) -> Option<DateTime<Utc>> {
        let entries = self.entries.read().unwrap();
        let timestamp = *entries.get(&cadence.timestamp_key())?;
        Utc.timestamp_opt(timestamp, 0).single()
    }

    async fn set_last_run(&self, cadence: Cadence, time: DateTime<Utc>) {
        self.entries
            .write()
            .unwrap()
            .insert(cadence.timestamp_key(), time.timestamp());
    }

    fn now(&self) -> DateTime<Utc> {
        self.fixed_now.read().unwrap().unwrap_or_else(Utc::now)
    }
}
