use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::warn;

use super::types::{ArchiveFile, ArchivedFile};
use super::{Ledger, LedgerError};
use crate::errors::ReceiptError;
use crate::receipts::cancel::Cancellation;
use crate::receipts::normalize::{DocumentPayload, MIME_PDF};
use crate::receipts::retry::{RetryError, RetryPolicy};
use crate::routing::RoutingGroup;

/// `{user}_{hour}_{minute}_{month}_{day}_{year}.{ext}`, the naming used in
/// the archive folders.
pub fn archive_file_name(submitter_id: u64, payload: &DocumentPayload, now: DateTime<Utc>) -> String {
    let extension = payload
        .filename
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .or_else(|| extension_for(payload.declared_mime.as_deref()?).map(String::from));

    let stem = format!(
        "{}_{}_{}_{}_{}_{}",
        submitter_id,
        now.hour(),
        now.minute(),
        now.month(),
        now.day(),
        now.year()
    );
    match extension {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

fn extension_for(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/bmp" => Some("bmp"),
        "image/tiff" => Some("tiff"),
        MIME_PDF => Some("pdf"),
        _ => None,
    }
}

/// Stores original uploads through the ledger with the shared retry policy.
#[derive(Clone)]
pub struct Archiver {
    ledger: Arc<dyn Ledger>,
    policy: RetryPolicy,
}

impl Archiver {
    pub fn new(ledger: Arc<dyn Ledger>, policy: RetryPolicy) -> Self {
        Self { ledger, policy }
    }

    pub fn request(
        payload: &DocumentPayload,
        group: RoutingGroup,
        submitter_id: u64,
        submitter_name: &str,
        now: DateTime<Utc>,
    ) -> ArchiveFile {
        ArchiveFile {
            group,
            submitter_id,
            submitter_name: submitter_name.to_string(),
            file_name: archive_file_name(submitter_id, payload, now),
            mime_type: payload
                .declared_mime
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            bytes: payload.bytes.clone(),
        }
    }

    pub async fn archive(
        &self,
        file: &ArchiveFile,
        cancel: &Cancellation,
    ) -> Result<Option<ArchivedFile>, ReceiptError> {
        let outcome = self
            .policy
            .run("archive upload", cancel, LedgerError::is_transient, |_| {
                self.ledger.archive(file)
            })
            .await;

        match outcome {
            Ok(archived) => Ok(archived),
            Err(RetryError::Permanent { attempts, error }) | Err(RetryError::Exhausted { attempts, last: error }) => {
                warn!(file = %file.file_name, group = %file.group, attempts, error = %error, "Archive upload failed");
                Err(ReceiptError::LedgerUnavailable { attempts, cause: error })
            }
            Err(RetryError::Cancelled { .. }) => Err(ReceiptError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::identity::tests::FakeLedger;
    use crate::receipts::extract::tests::test_policy;
    use chrono::TimeZone;

    fn payload(filename: Option<&str>, mime: Option<&str>) -> DocumentPayload {
        DocumentPayload {
            declared_mime: mime.map(String::from),
            filename: filename.map(String::from),
            bytes: vec![1, 2, 3],
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap()
    }

    #[test]
    fn file_name_encodes_user_and_time() {
        assert_eq!(
            archive_file_name(42, &payload(Some("Scan.PDF"), Some(MIME_PDF)), at()),
            "42_14_5_3_9_2024.pdf"
        );
    }

    #[test]
    fn extension_falls_back_to_declared_type() {
        assert_eq!(archive_file_name(1, &payload(None, Some("image/jpeg")), at()), "1_14_5_3_9_2024.jpg");
        assert_eq!(archive_file_name(1, &payload(None, None), at()), "1_14_5_3_9_2024");
    }

    #[tokio::test]
    async fn transient_upload_failure_is_retried() {
        let ledger = Arc::new(FakeLedger::default());
        *ledger.archive_errors.lock().unwrap() = vec![LedgerError::Transient("503".into())];
        let archiver = Archiver::new(ledger.clone(), test_policy());
        let file = Archiver::request(&payload(Some("r.jpg"), Some("image/jpeg")), RoutingGroup(0), 7, "ana", at());

        let archived = archiver.archive(&file, &Cancellation::new()).await.unwrap().unwrap();

        assert_eq!(archived.folder_id, "folder-7");
        assert_eq!(ledger.archives.lock().unwrap().len(), 1);
        assert_eq!(ledger.archives.lock().unwrap()[0].file_name, "7_14_5_3_9_2024.jpg");
    }

    #[tokio::test]
    async fn permanent_upload_failure_is_reported() {
        let ledger = Arc::new(FakeLedger::default());
        *ledger.archive_errors.lock().unwrap() = vec![LedgerError::Permanent("quota".into())];
        let archiver = Archiver::new(ledger.clone(), test_policy());
        let file = Archiver::request(&payload(None, None), RoutingGroup(0), 7, "ana", at());

        let err = archiver.archive(&file, &Cancellation::new()).await.unwrap_err();
        assert!(matches!(err, ReceiptError::LedgerUnavailable { attempts: 1, .. }));
    }
}
