use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::receipts::types::ExtractionResult;
use crate::routing::RoutingGroup;

/// Where a receipt lives in the ledger. The record id is minted by the
/// ledger and is the only handle used for later updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordCoordinate {
    pub record_id: Uuid,
    /// Ledger instance (spreadsheet id).
    pub container_id: String,
    /// Table within the instance (sheet id).
    pub sub_container_id: String,
}

/// Who submitted a receipt and where the original file can be found.
#[derive(Debug, Clone)]
pub struct RecordMetadata {
    pub submitter_id: u64,
    pub submitter_name: String,
    pub source_url: Option<String>,
    pub group: RoutingGroup,
    pub idempotency_key: Option<String>,
}

/// Body of a ledger `create` call.
#[derive(Debug, Clone, Serialize)]
pub struct CreateRecord {
    pub user_id: u64,
    pub username: String,
    pub total_amount: Option<serde_json::Number>,
    pub currency: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub items: String,
    pub image_url: Option<String>,
    pub group: RoutingGroup,
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

impl CreateRecord {
    pub fn new(result: &ExtractionResult, meta: &RecordMetadata) -> Self {
        Self {
            user_id: meta.submitter_id,
            username: meta.submitter_name.clone(),
            total_amount: result
                .total_amount
                .as_ref()
                .and_then(|amount| amount.to_string().parse().ok()),
            currency: result.currency.as_ref().map(|c| c.to_string()),
            date: result.date.map(|d| d.format("%Y-%m-%d").to_string()),
            time: result.time.map(|t| t.format("%H:%M").to_string()),
            items: result.items.join(", "),
            image_url: meta.source_url.clone(),
            group: meta.group,
            idempotency_key: meta.idempotency_key.clone(),
        }
    }
}

/// Note update addressed by record identity, never by row position.
#[derive(Debug, Clone)]
pub struct NoteUpdate {
    pub record: RecordCoordinate,
    pub group: RoutingGroup,
    pub note: String,
    pub category: Option<String>,
}

const DRIVE_FILE_URL: &str = "https://drive.google.com/file/d";
const DRIVE_FOLDER_URL: &str = "https://drive.google.com/drive/folders";

/// Original upload to store in the submitter's archive folder.
#[derive(Debug, Clone)]
pub struct ArchiveFile {
    pub group: RoutingGroup,
    pub submitter_id: u64,
    pub submitter_name: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Where an archived upload landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedFile {
    pub file_id: String,
    pub folder_id: String,
}

impl ArchivedFile {
    pub fn file_url(&self) -> String {
        format!("{}/{}/view", DRIVE_FILE_URL, self.file_id)
    }

    pub fn folder_url(&self) -> String {
        format!("{}/{}", DRIVE_FOLDER_URL, self.folder_id)
    }
}
