use std::sync::Arc;

use tracing::{error, warn};

use super::types::{CreateRecord, RecordCoordinate, RecordMetadata};
use super::{Ledger, LedgerError};
use crate::errors::ReceiptError;
use crate::receipts::cancel::Cancellation;
use crate::receipts::retry::{RetryError, RetryPolicy};
use crate::receipts::types::ExtractionResult;
use crate::tracking::types::MessageCoordinate;

/// Stable key for one unit of work: the same announcement and the same
/// bytes always produce the same key.
pub fn idempotency_key(announcement: MessageCoordinate, payload: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(announcement.key().as_bytes());
    hasher.update(b"\0");
    hasher.update(payload);
    hasher.finalize().to_hex().to_string()
}

/// Creates ledger rows and hands back the identity the ledger minted.
#[derive(Clone)]
pub struct RecordIssuer {
    ledger: Arc<dyn Ledger>,
    policy: RetryPolicy,
}

impl RecordIssuer {
    pub fn new(ledger: Arc<dyn Ledger>, policy: RetryPolicy) -> Self {
        Self { ledger, policy }
    }

    pub async fn create_record(
        &self,
        result: &ExtractionResult,
        meta: &RecordMetadata,
        cancel: &Cancellation,
    ) -> Result<RecordCoordinate, ReceiptError> {
        let record = CreateRecord::new(result, meta);

        let outcome = self
            .policy
            .run("ledger create", cancel, LedgerError::is_transient, |_| {
                self.ledger.create(&record)
            })
            .await;

        match outcome {
            Ok(coordinate) => Ok(coordinate),
            Err(RetryError::Permanent { error: LedgerError::Ambiguous(reason), .. }) => {
                warn!(group = %meta.group, submitter = meta.submitter_id, %reason, "Ledger create outcome unknown");
                Err(ReceiptError::LedgerOutcomeUnknown(LedgerError::Ambiguous(reason)))
            }
            Err(RetryError::Permanent { attempts, error }) | Err(RetryError::Exhausted { attempts, last: error }) => {
                error!(group = %meta.group, attempts, error = %error, "Ledger create failed");
                Err(ReceiptError::LedgerUnavailable { attempts, cause: error })
            }
            Err(RetryError::Cancelled { .. }) => Err(ReceiptError::Cancelled),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ledger::types::{ArchiveFile, ArchivedFile, NoteUpdate};
    use crate::receipts::extract::tests::test_policy;
    use crate::routing::RoutingGroup;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    /// In-memory ledger. Mints a fresh uuid per create; fails the first
    /// `fail_creates` creates with the given error. Archives land in
    /// `folder-{submitter}`.
    #[derive(Default)]
    pub(crate) struct FakeLedger {
        pub fail_creates: Mutex<Vec<LedgerError>>,
        pub update_errors: Mutex<Vec<LedgerError>>,
        pub archive_errors: Mutex<Vec<LedgerError>>,
        pub creates: Mutex<Vec<(CreateRecord, RecordCoordinate)>>,
        pub updates: Mutex<Vec<NoteUpdate>>,
        pub archives: Mutex<Vec<ArchiveFile>>,
        pub create_calls: AtomicU32,
        pub update_calls: AtomicU32,
    }

    impl FakeLedger {
        pub(crate) fn update_calls(&self) -> u32 {
            self.update_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Ledger for FakeLedger {
        async fn create(&self, record: &CreateRecord) -> Result<RecordCoordinate, LedgerError> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut failures = self.fail_creates.lock().unwrap();
                if !failures.is_empty() {
                    return Err(failures.remove(0));
                }
            }
            let coordinate = RecordCoordinate {
                record_id: Uuid::new_v4(),
                container_id: format!("sheet-{}", record.group.0),
                sub_container_id: "0".into(),
            };
            self.creates.lock().unwrap().push((record.clone(), coordinate.clone()));
            Ok(coordinate)
        }

        async fn update_note(&self, update: &NoteUpdate) -> Result<(), LedgerError> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut errors = self.update_errors.lock().unwrap();
                if !errors.is_empty() {
                    return Err(errors.remove(0));
                }
            }
            self.updates.lock().unwrap().push(update.clone());
            Ok(())
        }

        async fn archive(&self, file: &ArchiveFile) -> Result<Option<ArchivedFile>, LedgerError> {
            {
                let mut errors = self.archive_errors.lock().unwrap();
                if !errors.is_empty() {
                    return Err(errors.remove(0));
                }
            }
            let mut archives = self.archives.lock().unwrap();
            archives.push(file.clone());
            Ok(Some(ArchivedFile {
                file_id: format!("file-{}", archives.len()),
                folder_id: format!("folder-{}", file.submitter_id),
            }))
        }
    }

    fn meta() -> RecordMetadata {
        RecordMetadata {
            submitter_id: 42,
            submitter_name: "ana".into(),
            source_url: Some("https://cdn/receipt.jpg".into()),
            group: RoutingGroup(0),
            idempotency_key: None,
        }
    }

    fn issuer(ledger: Arc<FakeLedger>) -> RecordIssuer {
        RecordIssuer::new(ledger, test_policy())
    }

    #[tokio::test]
    async fn returns_ledger_minted_identity() {
        let ledger = Arc::new(FakeLedger::default());
        let coordinate = issuer(ledger.clone())
            .create_record(&ExtractionResult::default(), &meta(), &Cancellation::new())
            .await
            .unwrap();

        let creates = ledger.creates.lock().unwrap();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].1, coordinate);
        assert_eq!(creates[0].0.user_id, 42);
    }

    #[tokio::test]
    async fn transient_create_is_retried() {
        let ledger = Arc::new(FakeLedger::default());
        *ledger.fail_creates.lock().unwrap() = vec![LedgerError::Transient("503".into())];
        issuer(ledger.clone())
            .create_record(&ExtractionResult::default(), &meta(), &Cancellation::new())
            .await
            .unwrap();
        assert_eq!(ledger.create_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ambiguous_create_is_not_retried() {
        let ledger = Arc::new(FakeLedger::default());
        *ledger.fail_creates.lock().unwrap() = vec![LedgerError::Ambiguous("timeout".into())];
        let err = issuer(ledger.clone())
            .create_record(&ExtractionResult::default(), &meta(), &Cancellation::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ReceiptError::LedgerOutcomeUnknown(_)));
        assert_eq!(ledger.create_calls.load(Ordering::SeqCst), 1);
        assert!(ledger.creates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_create_is_unavailable() {
        let ledger = Arc::new(FakeLedger::default());
        *ledger.fail_creates.lock().unwrap() = vec![LedgerError::Transient("down".into()); 10];
        let err = issuer(ledger.clone())
            .create_record(&ExtractionResult::default(), &meta(), &Cancellation::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ReceiptError::LedgerUnavailable { attempts: 5, .. }));
    }

    #[test]
    fn idempotency_key_is_stable_per_unit() {
        let a = MessageCoordinate::new(1, 2);
        let b = MessageCoordinate::new(1, 3);
        assert_eq!(idempotency_key(a, b"bytes"), idempotency_key(a, b"bytes"));
        assert_ne!(idempotency_key(a, b"bytes"), idempotency_key(b, b"bytes"));
        assert_ne!(idempotency_key(a, b"bytes"), idempotency_key(a, b"other"));
    }
}
