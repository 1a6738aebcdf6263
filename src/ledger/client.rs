//! JSON-over-HTTP ledger endpoint (one URL per routing group).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{ArchiveFile, ArchivedFile, CreateRecord, NoteUpdate, RecordCoordinate};
use super::{Ledger, LedgerError};
use crate::routing::{RoutingGroup, RoutingTable};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    record_id: Option<String>,
    #[serde(default)]
    spreadsheet_id: Option<String>,
    #[serde(default)]
    sheet_id: Option<serde_json::Value>,
    #[serde(default)]
    found: bool,
    #[serde(default)]
    folder_id: Option<String>,
    #[serde(default)]
    file_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Create { idempotent: bool },
    Update,
    /// Folder lookups and uploads. A repeated upload only duplicates the archived copy.
    Archive,
}

pub struct HttpLedger {
    client: reqwest::Client,
    routes: Arc<RoutingTable>,
    /// Archive folder per (group, user), filled on first upload.
    folders: Mutex<HashMap<(RoutingGroup, u64), String>>,
}

impl HttpLedger {
    pub fn new(routes: Arc<RoutingTable>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create ledger HTTP client")?;
        Ok(Self {
            client,
            routes,
            folders: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, group: RoutingGroup) -> Result<&str, LedgerError> {
        self.routes
            .ledger_url(group)
            .ok_or_else(|| LedgerError::Permanent(format!("no ledger configured for {group}")))
    }

    async fn post(&self, group: RoutingGroup, body: serde_json::Value, call: Call) -> Result<LedgerResponse, LedgerError> {
        let url = self.url(group)?;
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(&e, call))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| lost_response(format!("failed to read response: {e}"), call))?;

        if !status.is_success() {
            let snippet: String = text.chars().take(200).collect();
            return Err(classify_status(status, format!("HTTP {}: {}", status.as_u16(), snippet), call));
        }

        let parsed: LedgerResponse = serde_json::from_str(&text)
            .map_err(|e| lost_response(format!("invalid response JSON: {e}"), call))?;
        accept(parsed, call)
    }

    /// The submitter's archive folder: cached, looked up by name, or created.
    async fn user_folder(&self, file: &ArchiveFile, parent: &str) -> Result<String, LedgerError> {
        let cache_key = (file.group, file.submitter_id);
        if let Some(folder_id) = self.folders.lock().await.get(&cache_key) {
            return Ok(folder_id.clone());
        }

        let folder_name = format!("{}_{}", file.submitter_id, file.submitter_name);
        let lookup = json!({
            "action": "getFolderByName",
            "parentFolderId": parent,
            "folderName": folder_name,
        });
        let existing = match self.post(file.group, lookup, Call::Archive).await {
            Ok(resp) if resp.found => resp.folder_id,
            Ok(_) => None,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                warn!(folder = %folder_name, error = %e, "Folder lookup failed, creating it");
                None
            }
        };

        let folder_id = match existing {
            Some(id) => id,
            None => {
                let create = json!({
                    "action": "createFolder",
                    "parentFolderId": parent,
                    "folderName": folder_name,
                });
                let resp = self.post(file.group, create, Call::Archive).await?;
                let id = resp
                    .folder_id
                    .ok_or_else(|| LedgerError::Transient("createFolder returned no folderId".into()))?;
                info!(folder = %folder_name, folder_id = %id, group = %file.group, "Archive folder created");
                id
            }
        };

        self.folders.lock().await.insert(cache_key, folder_id.clone());
        Ok(folder_id)
    }
}

/// Interprets a 200 answer. An `error` field always fails the call, and a
/// note update only counts once the ledger says `success`.
fn accept(parsed: LedgerResponse, call: Call) -> Result<LedgerResponse, LedgerError> {
    if let Some(error) = parsed.error.clone() {
        return Err(match call {
            Call::Update => classify_error_text(error),
            _ => LedgerError::Permanent(error),
        });
    }
    if call == Call::Update && !parsed.success {
        // Overwriting the same note again is harmless.
        return Err(LedgerError::Transient("ledger did not confirm the note update".into()));
    }
    Ok(parsed)
}

/// A create whose request may have reached the ledger is ambiguous unless it
/// carries an idempotency key. Updates overwrite, so repeating them is safe.
fn lost_response(message: String, call: Call) -> LedgerError {
    match call {
        Call::Create { idempotent: false } => LedgerError::Ambiguous(message),
        _ => LedgerError::Transient(message),
    }
}

fn classify_send_error(err: &reqwest::Error, call: Call) -> LedgerError {
    let message = format!("request failed: {err}");
    if err.is_connect() || err.is_builder() {
        // Never left the client.
        LedgerError::Transient(message)
    } else {
        lost_response(message, call)
    }
}

fn classify_status(status: StatusCode, message: String, call: Call) -> LedgerError {
    match status.as_u16() {
        404 if call == Call::Update => LedgerError::RecordNotFound(message),
        408 | 429 | 503 => LedgerError::Transient(message),
        500..=599 => lost_response(message, call),
        _ => LedgerError::Permanent(message),
    }
}

fn classify_error_text(error: String) -> LedgerError {
    if error.to_ascii_lowercase().contains("not found") {
        LedgerError::RecordNotFound(error)
    } else {
        LedgerError::Permanent(error)
    }
}

fn sheet_id_text(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn create(&self, record: &CreateRecord) -> Result<RecordCoordinate, LedgerError> {
        let call = Call::Create {
            idempotent: record.idempotency_key.is_some(),
        };
        let mut body = json!({
            "action": "createExpenseRecord",
            "data": record,
        });
        if let Some(key) = &record.idempotency_key {
            body["idempotencyKey"] = json!(key);
        }

        let resp = self.post(record.group, body, call).await?;

        // The row exists at this point, so a malformed answer is not retryable.
        let record_id = resp
            .record_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| LedgerError::Ambiguous(format!("invalid record id {:?}", resp.record_id)))?;
        let container_id = resp
            .spreadsheet_id
            .ok_or_else(|| LedgerError::Ambiguous("missing spreadsheetId".into()))?;
        let sub_container_id =
            sheet_id_text(resp.sheet_id).ok_or_else(|| LedgerError::Ambiguous("missing sheetId".into()))?;

        info!(%record_id, %container_id, group = %record.group, "Ledger record created");
        Ok(RecordCoordinate {
            record_id,
            container_id,
            sub_container_id,
        })
    }

    async fn update_note(&self, update: &NoteUpdate) -> Result<(), LedgerError> {
        let body = json!({
            "action": "updateReceiptNoteByRecordId",
            "recordId": update.record.record_id.to_string(),
            "note": update.note,
            "category": update.category,
            "spreadsheetId": update.record.container_id,
            "sheetId": update.record.sub_container_id,
        });
        self.post(update.group, body, Call::Update).await?;
        debug!(record_id = %update.record.record_id, "Ledger note updated");
        Ok(())
    }

    async fn archive(&self, file: &ArchiveFile) -> Result<Option<ArchivedFile>, LedgerError> {
        let Some(parent) = self.routes.archive_folder(file.group) else {
            return Ok(None);
        };
        let folder_id = self.user_folder(file, parent).await?;

        let body = json!({
            "action": "uploadFile",
            "folderId": folder_id,
            "fileName": file.file_name,
            "fileContent": BASE64.encode(&file.bytes),
            "mimeType": file.mime_type,
        });
        let resp = self.post(file.group, body, Call::Archive).await?;
        let file_id = resp
            .file_id
            .ok_or_else(|| LedgerError::Transient("uploadFile returned no fileId".into()))?;

        info!(file = %file.file_name, %file_id, group = %file.group, "Upload archived");
        Ok(Some(ArchivedFile { file_id, folder_id }))
    }
}
