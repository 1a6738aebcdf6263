use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::TrackingStore;

/// Removes tracking entries older than the retention window, at most once
/// per `interval` unless asked explicitly.
#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn TrackingStore>,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn TrackingStore>, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sweep if the last sweep is older than the interval.
    /// Returns `None` when no sweep was due.
    pub async fn maybe_sweep(&self, now: DateTime<Utc>) -> Result<Option<usize>> {
        if let Some(last) = self.store.last_sweep().await? {
            if now - last < self.interval {
                debug!(last = %last, "sweep not due");
                return Ok(None);
            }
        }
        self.sweep_now(now).await.map(Some)
    }

    pub async fn sweep_now(&self, now: DateTime<Utc>) -> Result<usize> {
        self.store.sweep(now, self.retention).await
    }
}
