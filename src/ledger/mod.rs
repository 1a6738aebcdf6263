pub mod archive;
pub mod client;
pub mod identity;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

use types::{ArchiveFile, ArchivedFile, CreateRecord, NoteUpdate, RecordCoordinate};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Safe to retry: the request did not take effect.
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// The request may have been applied but no usable answer came back.
    #[error("outcome unknown: {0}")]
    Ambiguous(String),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient(_))
    }
}

/// External spreadsheet-like record store. Records are addressed by the
/// id the ledger minted, never by row position.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn create(&self, record: &CreateRecord) -> Result<RecordCoordinate, LedgerError>;

    async fn update_note(&self, update: &NoteUpdate) -> Result<(), LedgerError>;

    /// Store the original upload in the submitter's folder. `None` when the
    /// group has no archive configured.
    async fn archive(&self, file: &ArchiveFile) -> Result<Option<ArchivedFile>, LedgerError>;
}
