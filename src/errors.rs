use thiserror::Error;
use uuid::Uuid;

use crate::ledger::LedgerError;
use crate::receipts::extract::ServiceError;
use crate::receipts::normalize::NormalizeError;

/// Why a reply could not be matched to a tracked receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryKind {
    /// The entry exists but is older than the retention window.
    Expired,
    /// No entry for the replied-to message.
    Unknown,
}

/// Terminal outcome of one receipt or note unit of work.
#[derive(Error, Debug)]
pub enum ReceiptError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("extraction failed after {attempts} attempts: {cause}")]
    ExtractionFailed {
        attempts: u32,
        #[source]
        cause: ServiceError,
    },

    #[error("extraction service rejected the document: {0}")]
    ExtractionRejected(#[source] ServiceError),

    #[error("ledger unavailable after {attempts} attempts: {cause}")]
    LedgerUnavailable {
        attempts: u32,
        #[source]
        cause: LedgerError,
    },

    #[error("ledger create outcome unknown: {0}")]
    LedgerOutcomeUnknown(#[source] LedgerError),

    #[error("no tracked receipt for this message ({0:?})")]
    RecordExpiredOrUnknown(ExpiryKind),

    #[error("record {0} no longer exists in the ledger")]
    RecordNotFoundInLedger(Uuid),

    #[error("{0} timed out")]
    TimedOut(&'static str),

    #[error("cancelled")]
    Cancelled,

    #[error("tracking store: {0:#}")]
    Storage(anyhow::Error),

    #[error("record {record_id} created but tracking write failed: {cause:#}")]
    TrackingWriteFailed { record_id: Uuid, cause: anyhow::Error },
}

impl ReceiptError {
    /// The one user-facing message for this outcome.
    pub fn user_message(&self) -> String {
        match self {
            ReceiptError::Normalize(NormalizeError::UnsupportedFormat(_)) => {
                "❌ Unsupported file type. Please send a photo (JPG, PNG, WEBP, GIF, BMP, TIFF) or a PDF."
                    .to_string()
            }
            ReceiptError::Normalize(NormalizeError::SizeLimitExceeded { limit, .. }) => format!(
                "❌ File too large. The maximum size is {}.",
                human_bytes(*limit)
            ),
            ReceiptError::Normalize(NormalizeError::PageLimitExceeded { pages, limit }) => format!(
                "❌ Too many pages ({pages}). Please send at most {limit} pages per receipt."
            ),
            ReceiptError::Normalize(NormalizeError::NoUsablePages) => {
                "❌ I couldn't read any page of this document. Try sending a photo of the receipt instead."
                    .to_string()
            }
            ReceiptError::ExtractionFailed { attempts, .. } => format!(
                "❌ I couldn't analyze the receipt after {attempts} attempts. Please try again later."
            ),
            ReceiptError::ExtractionRejected(_) => {
                "❌ The receipt could not be analyzed. Make sure the image is a clear, readable receipt."
                    .to_string()
            }
            ReceiptError::LedgerUnavailable { .. } => {
                "❌ The ledger is unreachable right now, so the receipt was not saved. Please resend it later."
                    .to_string()
            }
            ReceiptError::LedgerOutcomeUnknown(_) => {
                "⚠️ I lost contact with the ledger while saving. The receipt may or may not have been recorded; please check before resending."
                    .to_string()
            }
            ReceiptError::RecordExpiredOrUnknown(ExpiryKind::Expired) => {
                "⌛ This receipt is too old to add a note to. Notes can only be added for a limited time."
                    .to_string()
            }
            ReceiptError::RecordExpiredOrUnknown(ExpiryKind::Unknown) => {
                "🤔 That message isn't a receipt I recorded, so I can't attach a note to it.".to_string()
            }
            ReceiptError::RecordNotFoundInLedger(_) => {
                "❌ This receipt no longer exists in the ledger (it may have been deleted).".to_string()
            }
            ReceiptError::TimedOut(stage) => format!("❌ Processing timed out while {stage}. Please try again."),
            ReceiptError::Cancelled => "🛑 Processing cancelled.".to_string(),
            ReceiptError::Storage(_) => "❌ Internal storage error. Please try again later.".to_string(),
            ReceiptError::TrackingWriteFailed { record_id, .. } => format!(
                "⚠️ The receipt was saved (record `{record_id}`), but I won't be able to attach notes to it."
            ),
        }
    }
}

fn human_bytes(bytes: usize) -> String {
    const MIB: usize = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{} MB", bytes / MIB)
    } else if bytes >= 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{bytes} bytes")
    }
}
