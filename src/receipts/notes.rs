use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tracing::{error, info, warn};

use super::cancel::Cancellation;
use super::retry::{RetryError, RetryPolicy};
use crate::errors::{ExpiryKind, ReceiptError};
use crate::ledger::types::{NoteUpdate, RecordCoordinate};
use crate::ledger::{Ledger, LedgerError};
use crate::tracking::types::MessageCoordinate;
use crate::tracking::TrackingStore;

pub const DEFAULT_KEYWORDS: &str = "MY=Reimbursement,REP=Company";
const CATEGORY_SEPARATOR: &str = ", ";

/// Immutable keyword → category lookup, built once at startup.
#[derive(Debug, Clone)]
pub struct KeywordTable {
    labels: HashMap<String, String>,
    pattern: Option<Regex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedNote {
    pub body: String,
    pub categories: BTreeSet<String>,
}

impl ClassifiedNote {
    /// Sorted, de-duplicated labels, or `None` when no keyword matched.
    pub fn category_label(&self) -> Option<String> {
        if self.categories.is_empty() {
            None
        } else {
            Some(self.categories.iter().cloned().collect::<Vec<_>>().join(CATEGORY_SEPARATOR))
        }
    }
}

impl KeywordTable {
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let labels: HashMap<String, String> = pairs
            .into_iter()
            .map(|(keyword, label)| (keyword.to_lowercase(), label))
            .collect();

        let pattern = if labels.is_empty() {
            None
        } else {
            let mut keywords: Vec<&String> = labels.keys().collect();
            // Longest first so overlapping keywords prefer the longer match.
            keywords.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
            let alternation = keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).context("invalid keyword pattern")?)
        };

        Ok(Self { labels, pattern })
    }

    /// Parse `KEYWORD=Label,KEYWORD=Label`.
    pub fn parse(table: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for part in table.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((keyword, label)) = part.split_once('=') else {
                bail!("keyword entry '{}' is not KEYWORD=Label", part);
            };
            let (keyword, label) = (keyword.trim(), label.trim());
            if keyword.is_empty() || label.is_empty() {
                bail!("keyword entry '{}' has an empty side", part);
            }
            pairs.push((keyword.to_string(), label.to_string()));
        }
        Self::new(pairs)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Keyword/label pairs sorted by keyword, for help text.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .labels
            .iter()
            .map(|(k, v)| (k.to_uppercase(), v.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    /// Whole-word, case-insensitive keyword match. Matched keywords are
    /// removed from the body.
    pub fn classify(&self, text: &str) -> ClassifiedNote {
        let Some(pattern) = &self.pattern else {
            return ClassifiedNote {
                body: tidy(text),
                categories: BTreeSet::new(),
            };
        };

        let categories = pattern
            .find_iter(text)
            .filter_map(|m| self.labels.get(&m.as_str().to_lowercase()).cloned())
            .collect();
        let stripped = pattern.replace_all(text, "");

        ClassifiedNote {
            body: tidy(&stripped),
            categories,
        }
    }
}

fn tidy(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct AttachedNote {
    pub record: RecordCoordinate,
    pub note: ClassifiedNote,
}

/// Resolves a reply to its tracked record and writes the note to the ledger.
#[derive(Clone)]
pub struct NoteAttacher {
    store: Arc<dyn TrackingStore>,
    ledger: Arc<dyn Ledger>,
    policy: RetryPolicy,
    keywords: Arc<KeywordTable>,
    retention: Duration,
    retain_after_attach: bool,
}

impl NoteAttacher {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        ledger: Arc<dyn Ledger>,
        policy: RetryPolicy,
        keywords: Arc<KeywordTable>,
        retention: Duration,
        retain_after_attach: bool,
    ) -> Self {
        Self {
            store,
            ledger,
            policy,
            keywords,
            retention,
            retain_after_attach,
        }
    }

    pub fn keywords(&self) -> &KeywordTable {
        &self.keywords
    }

    /// Attach `text` to the record announced by `message`. Only the user who
    /// submitted the receipt can reach its entry.
    pub async fn attach_note(
        &self,
        message: MessageCoordinate,
        replier_id: u64,
        text: &str,
    ) -> Result<AttachedNote, ReceiptError> {
        self.attach_note_at(message, replier_id, text, Utc::now()).await
    }

    pub async fn attach_note_at(
        &self,
        message: MessageCoordinate,
        replier_id: u64,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<AttachedNote, ReceiptError> {
        let entry = match self.store.get(&message).await.map_err(ReceiptError::Storage)? {
            None => return Err(ReceiptError::RecordExpiredOrUnknown(ExpiryKind::Unknown)),
            Some(entry) if entry.submitter_id != replier_id => {
                warn!(%message, replier_id, submitter_id = entry.submitter_id, "Note from someone other than the submitter");
                return Err(ReceiptError::RecordExpiredOrUnknown(ExpiryKind::Unknown));
            }
            Some(entry) if entry.is_expired(now, self.retention) => {
                return Err(ReceiptError::RecordExpiredOrUnknown(ExpiryKind::Expired));
            }
            Some(entry) => entry,
        };

        let note = self.keywords.classify(text);
        let update = NoteUpdate {
            record: entry.record.clone(),
            group: entry.group,
            note: note.body.clone(),
            category: note.category_label(),
        };

        // Nothing cancels a note reply; the retry loop still wants a handle.
        let cancel = Cancellation::new();
        let outcome = self
            .policy
            .run("ledger note", &cancel, LedgerError::is_transient, |_| {
                self.ledger.update_note(&update)
            })
            .await;

        let record_id = entry.record.record_id;
        match outcome {
            Ok(()) => {}
            Err(RetryError::Permanent {
                error: LedgerError::RecordNotFound(reason),
                ..
            }) => {
                warn!(%message, %record_id, %reason, "Note target missing from ledger");
                return Err(ReceiptError::RecordNotFoundInLedger(record_id));
            }
            Err(RetryError::Permanent { attempts, error }) | Err(RetryError::Exhausted { attempts, last: error }) => {
                error!(%message, %record_id, attempts, error = %error, "Note update failed");
                return Err(ReceiptError::LedgerUnavailable { attempts, cause: error });
            }
            Err(RetryError::Cancelled { .. }) => return Err(ReceiptError::Cancelled),
        }

        info!(
            %message,
            %record_id,
            category = update.category.as_deref().unwrap_or("-"),
            "Note attached"
        );

        if !self.retain_after_attach {
            if let Err(e) = self.store.remove(&message).await {
                warn!(%message, "Failed to drop tracking entry after note: {:#}", e);
            }
        }

        Ok(AttachedNote {
            record: entry.record,
            note,
        })
    }
}
