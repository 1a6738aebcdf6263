pub mod sweep;
pub mod types;

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use types::{MessageCoordinate, TrackingEntry};

// Key prefixes (no trailing slashes, cnidarium convention)
const ENTRY_PREFIX: &str = "tracking/entry";
const SWEEP_PREFIX: &str = "tracking/sweep";

fn entry_key(message: &MessageCoordinate) -> String {
    format!("{}/{}", ENTRY_PREFIX, message.key())
}
fn last_sweep_key() -> String {
    format!("{}/last", SWEEP_PREFIX)
}

/// Durable map from announcement message to the record it announced.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Insert or overwrite the entry for `entry.message`.
    async fn put(&self, entry: TrackingEntry) -> Result<()>;

    async fn get(&self, message: &MessageCoordinate) -> Result<Option<TrackingEntry>>;

    /// Returns whether an entry was present.
    async fn remove(&self, message: &MessageCoordinate) -> Result<bool>;

    /// Remove every entry created before `now - retention`. Returns the count.
    async fn sweep(&self, now: DateTime<Utc>, retention: Duration) -> Result<usize>;

    async fn len(&self) -> Result<usize>;

    async fn last_sweep(&self) -> Result<Option<DateTime<Utc>>>;
}

/// Re-key the entry of `from` to the message `to`, used when an
/// announcement had to be posted as a new message. Returns false if `from`
/// had no entry.
pub async fn move_entry(store: &dyn TrackingStore, from: &MessageCoordinate, to: MessageCoordinate) -> Result<bool> {
    let Some(mut entry) = store.get(from).await? else {
        return Ok(false);
    };
    entry.message = to;
    store.put(entry).await?;
    store.remove(from).await?;
    debug!(%from, %to, "Tracking entry moved");
    Ok(true)
}

pub struct KvTrackingStore {
    storage: Storage,
    /// Commits must fork the latest snapshot, so writers take turns.
    write_lock: Mutex<()>,
}

impl KvTrackingStore {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let prefixes = vec![ENTRY_PREFIX.to_string(), SWEEP_PREFIX.to_string()];
        let storage = Storage::load(data_dir.to_path_buf(), prefixes)
            .await
            .context("Failed to init cnidarium storage")?;
        Ok(Self {
            storage,
            write_lock: Mutex::new(()),
        })
    }

    /// Flush and release the on-disk database.
    pub async fn close(self) {
        self.storage.release().await;
    }

    async fn entries(&self) -> Result<Vec<(String, TrackingEntry)>> {
        let snapshot = self.storage.latest_snapshot();
        collect_entries(snapshot.prefix_raw(ENTRY_PREFIX)).await
    }
}

/// Decodes a prefix scan. A failed read aborts the scan; an undecodable
/// value is skipped.
async fn collect_entries<S>(mut stream: S) -> Result<Vec<(String, TrackingEntry)>>
where
    S: Stream<Item = Result<(String, Vec<u8>)>> + Unpin,
{
    let mut results = Vec::new();
    while let Some(entry) = stream.next().await {
        let (key, value) = entry.context("reading tracking entries")?;
        match serde_json::from_slice::<TrackingEntry>(&value) {
            Ok(parsed) => results.push((key, parsed)),
            Err(e) => warn!(key = %key, "Skipping unreadable tracking entry: {}", e),
        }
    }
    Ok(results)
}

#[async_trait]
impl TrackingStore for KvTrackingStore {
    async fn put(&self, entry: TrackingEntry) -> Result<()> {
        let value = serde_json::to_vec(&entry).context("serialize tracking entry")?;

        let _guard = self.write_lock.lock().await;
        let mut delta = StateDelta::new(self.storage.latest_snapshot());
        delta.put_raw(entry_key(&entry.message), value);
        self.storage.commit(delta).await?;

        debug!(
            message = %entry.message,
            record_id = %entry.record.record_id,
            "tracking entry stored"
        );
        Ok(())
    }

    async fn get(&self, message: &MessageCoordinate) -> Result<Option<TrackingEntry>> {
        let snapshot = self.storage.latest_snapshot();
        let Some(bytes) = snapshot.get_raw(&entry_key(message)).await? else {
            return Ok(None);
        };
        let entry = serde_json::from_slice(&bytes)
            .with_context(|| format!("corrupt tracking entry for {}", message))?;
        Ok(Some(entry))
    }

    async fn remove(&self, message: &MessageCoordinate) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.storage.latest_snapshot();
        let key = entry_key(message);
        if snapshot.get_raw(&key).await?.is_none() {
            return Ok(false);
        }

        let mut delta = StateDelta::new(snapshot);
        delta.delete(key);
        self.storage.commit(delta).await?;
        debug!(%message, "tracking entry removed");
        Ok(true)
    }

    async fn sweep(&self, now: DateTime<Utc>, retention: Duration) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let expired: Vec<String> = self
            .entries()
            .await?
            .into_iter()
            .filter(|(_, entry)| entry.is_expired(now, retention))
            .map(|(key, _)| key)
            .collect();

        let mut delta = StateDelta::new(self.storage.latest_snapshot());
        for key in &expired {
            delta.delete(key.clone());
        }
        delta.put_raw(last_sweep_key(), now.to_rfc3339().into_bytes());
        self.storage.commit(delta).await?;

        info!(removed = expired.len(), retention_days = retention.num_days(), "tracking sweep complete");
        Ok(expired.len())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries().await?.len())
    }

    async fn last_sweep(&self) -> Result<Option<DateTime<Utc>>> {
        let snapshot = self.storage.latest_snapshot();
        let Some(bytes) = snapshot.get_raw(&last_sweep_key()).await? else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes).context("last sweep timestamp is not UTF-8")?;
        let at = DateTime::parse_from_rfc3339(&text)
            .context("invalid last sweep timestamp")?
            .with_timezone(&Utc);
        Ok(Some(at))
    }
}
