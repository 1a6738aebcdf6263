pub mod cancel;
pub mod extract;
pub mod normalize;
pub mod notes;
pub mod parse;
pub mod prompts;
pub mod render;
pub mod retry;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use tracing::{info, warn};

use crate::errors::ReceiptError;
use crate::ledger::archive::Archiver;
use crate::ledger::identity::{idempotency_key, RecordIssuer};
use crate::ledger::types::{ArchivedFile, RecordCoordinate, RecordMetadata};
use crate::routing::RoutingGroup;
use crate::tracking::sweep::RetentionSweeper;
use crate::tracking::types::{MessageCoordinate, TrackingEntry};
use crate::tracking::TrackingStore;
use cancel::Cancellation;
use extract::ExtractionOrchestrator;
use normalize::{DocumentPayload, NormalizeError, NormalizedDocument, Normalizer, PageWarning};
use types::ExtractionResult;

/// One uploaded document plus everything needed to record it.
#[derive(Debug, Clone)]
pub struct ReceiptSubmission {
    pub payload: DocumentPayload,
    /// The bot message that will announce the result.
    pub announcement: MessageCoordinate,
    /// Chat attachment URL, recorded when the upload could not be archived.
    pub source_url: Option<String>,
    pub group: RoutingGroup,
    pub submitter_id: u64,
    pub submitter_name: String,
}

#[derive(Debug, Clone)]
pub struct ProcessedReceipt {
    pub record: RecordCoordinate,
    pub result: ExtractionResult,
    pub pages_analyzed: usize,
    pub truncated_from: Option<usize>,
    pub warnings: Vec<PageWarning>,
    pub archived: Option<ArchivedFile>,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub normalize_timeout: Duration,
    pub store_timeout: Duration,
    /// Send an idempotency key with ledger creates so they can be retried.
    pub idempotent_create: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            normalize_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(10),
            idempotent_create: true,
        }
    }
}

/// Normalize → archive → extract → create record → track, for one receipt.
#[derive(Clone)]
pub struct ReceiptPipeline {
    normalizer: Normalizer,
    archiver: Archiver,
    orchestrator: ExtractionOrchestrator,
    issuer: RecordIssuer,
    store: Arc<dyn TrackingStore>,
    sweeper: RetentionSweeper,
    settings: PipelineSettings,
}

impl ReceiptPipeline {
    pub fn new(
        normalizer: Normalizer,
        archiver: Archiver,
        orchestrator: ExtractionOrchestrator,
        issuer: RecordIssuer,
        store: Arc<dyn TrackingStore>,
        sweeper: RetentionSweeper,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            normalizer,
            archiver,
            orchestrator,
            issuer,
            store,
            sweeper,
            settings,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub async fn process(
        &self,
        submission: ReceiptSubmission,
        cancel: &Cancellation,
    ) -> Result<ProcessedReceipt, ReceiptError> {
        let ReceiptSubmission {
            payload,
            announcement,
            source_url,
            group,
            submitter_id,
            submitter_name,
        } = submission;

        let key = self
            .settings
            .idempotent_create
            .then(|| idempotency_key(announcement, &payload.bytes));
        let archive_request = Archiver::request(&payload, group, submitter_id, &submitter_name, Utc::now());

        let document = self.normalize(payload).await?;
        if cancel.is_cancelled() {
            return Err(ReceiptError::Cancelled);
        }

        let archived = match self.archiver.archive(&archive_request, cancel).await {
            Ok(archived) => archived,
            Err(ReceiptError::Cancelled) => return Err(ReceiptError::Cancelled),
            Err(e) => {
                warn!(%announcement, error = %e, "Keeping the chat link, archive upload failed");
                None
            }
        };
        if cancel.is_cancelled() {
            return Err(ReceiptError::Cancelled);
        }

        let result = self.orchestrator.extract(&document, cancel).await?;
        if cancel.is_cancelled() {
            return Err(ReceiptError::Cancelled);
        }

        let meta = RecordMetadata {
            submitter_id,
            submitter_name,
            source_url: archived.as_ref().map(ArchivedFile::file_url).or(source_url),
            group,
            idempotency_key: key,
        };
        let record = self.issuer.create_record(&result, &meta, cancel).await?;

        // The row exists now: track it even if the unit was cancelled meanwhile.
        let entry = TrackingEntry::new(announcement, record.clone(), group, submitter_id);
        match tokio::time::timeout(self.settings.store_timeout, self.store.put(entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(cause)) => {
                return Err(ReceiptError::TrackingWriteFailed {
                    record_id: record.record_id,
                    cause,
                })
            }
            Err(_) => {
                return Err(ReceiptError::TrackingWriteFailed {
                    record_id: record.record_id,
                    cause: anyhow!("tracking write timed out after {:?}", self.settings.store_timeout),
                })
            }
        }

        info!(
            %announcement,
            record_id = %record.record_id,
            %group,
            pages = document.pages().len(),
            "Receipt recorded"
        );

        if let Err(e) = self.sweeper.maybe_sweep(Utc::now()).await {
            warn!("Opportunistic sweep failed: {:#}", e);
        }

        Ok(ProcessedReceipt {
            record,
            result,
            pages_analyzed: document.pages().len(),
            truncated_from: document.truncated_from,
            warnings: document.warnings,
            archived,
        })
    }

    async fn normalize(&self, payload: DocumentPayload) -> Result<NormalizedDocument, ReceiptError> {
        let normalizer = self.normalizer.clone();
        let task = tokio::task::spawn_blocking(move || normalizer.normalize(&payload));

        match tokio::time::timeout(self.settings.normalize_timeout, task).await {
            Ok(Ok(result)) => result.map_err(ReceiptError::from),
            Ok(Err(join_error)) => Err(ReceiptError::Normalize(NormalizeError::UnsupportedFormat(format!(
                "decoder failed: {join_error}"
            )))),
            Err(_) => Err(ReceiptError::TimedOut("reading the document")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::identity::tests::FakeLedger;
    use crate::ledger::types::{ArchiveFile, CreateRecord, NoteUpdate};
    use crate::ledger::{Ledger, LedgerError};
    use crate::receipts::extract::tests::{test_policy, ScriptedService};
    use crate::receipts::extract::{ExtractionMode, ServiceError};
    use crate::receipts::normalize::tests::{jpeg, pdf};
    use crate::receipts::notes::{KeywordTable, NoteAttacher, DEFAULT_KEYWORDS};
    use crate::receipts::types::CurrencyCode;
    use crate::tracking::KvTrackingStore;
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use iso_currency::Currency;
    use std::str::FromStr;

    fn receipt() -> ExtractionResult {
        ExtractionResult {
            total_amount: BigDecimal::from_str("42.50").ok(),
            currency: Some(CurrencyCode::Iso(Currency::USD)),
            items: vec!["Coffee".into(), "Bagel".into()],
            ..ExtractionResult::default()
        }
    }

    fn submission(user: u64, announcement: MessageCoordinate, bytes: Vec<u8>, mime: &str) -> ReceiptSubmission {
        ReceiptSubmission {
            payload: DocumentPayload {
                declared_mime: Some(mime.to_string()),
                filename: None,
                bytes,
            },
            announcement,
            source_url: None,
            group: RoutingGroup(0),
            submitter_id: user,
            submitter_name: format!("user-{user}"),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<KvTrackingStore>,
        service: Arc<ScriptedService>,
        ledger: Arc<dyn Ledger>,
    }

    impl Fixture {
        async fn new(service: ScriptedService, ledger: Arc<dyn Ledger>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(KvTrackingStore::open(dir.path()).await.unwrap());
            Self {
                _dir: dir,
                store,
                service: Arc::new(service),
                ledger,
            }
        }

        fn pipeline(&self) -> ReceiptPipeline {
            let sweeper = RetentionSweeper::new(
                self.store.clone(),
                chrono::Duration::days(14),
                chrono::Duration::hours(72),
            );
            ReceiptPipeline::new(
                Normalizer::default(),
                Archiver::new(self.ledger.clone(), test_policy()),
                ExtractionOrchestrator::new(self.service.clone(), test_policy()),
                RecordIssuer::new(self.ledger.clone(), test_policy()),
                self.store.clone(),
                sweeper,
                PipelineSettings::default(),
            )
        }
    }

    #[tokio::test]
    async fn multi_page_pdf_end_to_end() {
        let ledger = Arc::new(FakeLedger::default());
        let fx = Fixture::new(ScriptedService::new(vec![Ok(receipt())]), ledger.clone()).await;
        let announcement = MessageCoordinate::new(100, 1);

        let processed = fx
            .pipeline()
            .process(
                submission(7, announcement, pdf(&[Some(10), Some(20), Some(30)]), "application/pdf"),
                &Cancellation::new(),
            )
            .await
            .unwrap();

        assert_eq!(processed.pages_analyzed, 3);
        assert_eq!(*fx.service.modes.lock().unwrap(), vec![(ExtractionMode::Batch, 3)]);
        assert_eq!(processed.result, receipt());

        let created = ledger.creates.lock().unwrap()[0].1.clone();
        assert_eq!(processed.record, created);
        let tracked = fx.store.get(&announcement).await.unwrap().unwrap();
        assert_eq!(tracked.record, created);

        let attacher = NoteAttacher::new(
            fx.store.clone(),
            ledger.clone(),
            test_policy(),
            Arc::new(KeywordTable::parse(DEFAULT_KEYWORDS).unwrap()),
            chrono::Duration::days(14),
            true,
        );
        let attached = attacher.attach_note(announcement, 7, "REP lunch with client").await.unwrap();
        assert_eq!(attached.record, created);
        assert_eq!(attached.note.body, "lunch with client");
        assert_eq!(attached.note.category_label().as_deref(), Some("Company"));
    }

    #[tokio::test]
    async fn concurrent_receipts_do_not_cross_contaminate() {
        let ledger = Arc::new(FakeLedger::default());
        let fx = Fixture::new(ScriptedService::new(vec![Ok(receipt())]), ledger.clone()).await;
        let pipeline = fx.pipeline();
        let (a, b) = (MessageCoordinate::new(1, 11), MessageCoordinate::new(2, 22));

        let (cancel_a, cancel_b) = (Cancellation::new(), Cancellation::new());
        let (first, second) = tokio::join!(
            pipeline.process(submission(1, a, jpeg(10, 10), "image/jpeg"), &cancel_a),
            pipeline.process(submission(2, b, jpeg(12, 12), "image/jpeg"), &cancel_b),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_ne!(first.record.record_id, second.record.record_id);
        assert_eq!(fx.store.get(&a).await.unwrap().unwrap().record, first.record);
        assert_eq!(fx.store.get(&b).await.unwrap().unwrap().record, second.record);

        let creates = ledger.creates.lock().unwrap();
        for (record, coordinate) in creates.iter() {
            let expected = if record.user_id == 1 { &first.record } else { &second.record };
            assert_eq!(coordinate, expected);
        }
    }

    #[tokio::test]
    async fn cancelled_unit_leaves_no_state() {
        let ledger = Arc::new(FakeLedger::default());
        let fx = Fixture::new(ScriptedService::new(vec![Ok(receipt())]), ledger.clone()).await;
        let cancel = Cancellation::new();
        cancel.cancel();
        let announcement = MessageCoordinate::new(3, 33);

        let err = fx
            .pipeline()
            .process(submission(3, announcement, jpeg(10, 10), "image/jpeg"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ReceiptError::Cancelled));
        assert!(ledger.creates.lock().unwrap().is_empty());
        assert!(ledger.archives.lock().unwrap().is_empty());
        assert_eq!(fx.store.get(&announcement).await.unwrap(), None);
    }

    #[tokio::test]
    async fn record_links_the_archived_upload() {
        let ledger = Arc::new(FakeLedger::default());
        let fx = Fixture::new(ScriptedService::new(vec![Ok(receipt())]), ledger.clone()).await;
        let mut upload = submission(8, MessageCoordinate::new(8, 80), jpeg(10, 10), "image/jpeg");
        upload.source_url = Some("https://cdn.discordapp.com/attachments/x/receipt.jpg".into());

        let processed = fx.pipeline().process(upload, &Cancellation::new()).await.unwrap();

        let archived = processed.archived.clone().unwrap();
        assert_eq!(archived.folder_id, "folder-8");
        let creates = ledger.creates.lock().unwrap();
        assert_eq!(creates[0].0.image_url, Some(archived.file_url()));
        assert_eq!(ledger.archives.lock().unwrap()[0].mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn failed_archive_falls_back_to_chat_link() {
        let ledger = Arc::new(FakeLedger::default());
        *ledger.archive_errors.lock().unwrap() = vec![LedgerError::Permanent("quota".into())];
        let fx = Fixture::new(ScriptedService::new(vec![Ok(receipt())]), ledger.clone()).await;
        let mut upload = submission(9, MessageCoordinate::new(9, 90), jpeg(10, 10), "image/jpeg");
        upload.source_url = Some("https://cdn/receipt.jpg".into());

        let processed = fx.pipeline().process(upload, &Cancellation::new()).await.unwrap();

        assert!(processed.archived.is_none());
        let creates = ledger.creates.lock().unwrap();
        assert_eq!(creates[0].0.image_url.as_deref(), Some("https://cdn/receipt.jpg"));
    }

    /// Cancels the unit while the create is in flight.
    struct CancellingLedger {
        inner: FakeLedger,
        cancel: Cancellation,
    }

    #[async_trait]
    impl Ledger for CancellingLedger {
        async fn create(&self, record: &CreateRecord) -> Result<RecordCoordinate, LedgerError> {
            self.cancel.cancel();
            self.inner.create(record).await
        }

        async fn update_note(&self, update: &NoteUpdate) -> Result<(), LedgerError> {
            self.inner.update_note(update).await
        }

        async fn archive(&self, file: &ArchiveFile) -> Result<Option<ArchivedFile>, LedgerError> {
            self.inner.archive(file).await
        }
    }

    #[tokio::test]
    async fn committed_record_is_tracked_despite_cancellation() {
        let cancel = Cancellation::new();
        let ledger = Arc::new(CancellingLedger {
            inner: FakeLedger::default(),
            cancel: cancel.clone(),
        });
        let fx = Fixture::new(ScriptedService::new(vec![Ok(receipt())]), ledger).await;
        let announcement = MessageCoordinate::new(4, 44);

        let processed = fx
            .pipeline()
            .process(submission(4, announcement, jpeg(10, 10), "image/jpeg"), &cancel)
            .await
            .unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(fx.store.get(&announcement).await.unwrap().unwrap().record, processed.record);
    }

    #[tokio::test]
    async fn normalization_failure_stops_before_extraction() {
        let fx = Fixture::new(
            ScriptedService::new(vec![Ok(receipt())]),
            Arc::new(FakeLedger::default()),
        )
        .await;

        let err = fx
            .pipeline()
            .process(
                submission(5, MessageCoordinate::new(5, 55), b"not an image".to_vec(), "image/heic"),
                &Cancellation::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ReceiptError::Normalize(NormalizeError::UnsupportedFormat(_))));
        assert_eq!(fx.service.calls(), 0);
    }

    #[tokio::test]
    async fn failed_extraction_creates_nothing() {
        let ledger = Arc::new(FakeLedger::default());
        let fx = Fixture::new(
            ScriptedService::new(vec![Err(ServiceError::Transient("503".into()))]),
            ledger.clone(),
        )
        .await;
        let announcement = MessageCoordinate::new(6, 66);

        let err = fx
            .pipeline()
            .process(submission(6, announcement, jpeg(10, 10), "image/jpeg"), &Cancellation::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ReceiptError::ExtractionFailed { attempts: 5, .. }));
        assert!(ledger.creates.lock().unwrap().is_empty());
        assert_eq!(fx.store.get(&announcement).await.unwrap(), None);
    }
}
