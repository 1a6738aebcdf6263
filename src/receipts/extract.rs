use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use super::cancel::Cancellation;
use super::normalize::{NormalizedDocument, NormalizedPage};
use super::retry::{RetryError, RetryPolicy};
use super::types::ExtractionResult;
use crate::errors::ReceiptError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// Timeouts, rate limiting, 5xx, malformed replies.
    #[error("transient: {0}")]
    Transient(String),
    /// Rejected content, auth failures.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    Single,
    /// All pages belong to one logical receipt.
    Batch,
}

/// Vision capability turning page images into structured receipt data.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(&self, pages: &[NormalizedPage], mode: ExtractionMode) -> Result<ExtractionResult, ServiceError>;
}

/// Calls the extraction service with the retry policy applied. Stateless
/// apart from its configuration, so one instance serves every unit.
#[derive(Clone)]
pub struct ExtractionOrchestrator {
    service: Arc<dyn ExtractionService>,
    policy: RetryPolicy,
}

impl ExtractionOrchestrator {
    pub fn new(service: Arc<dyn ExtractionService>, policy: RetryPolicy) -> Self {
        Self { service, policy }
    }

    pub async fn extract(
        &self,
        document: &NormalizedDocument,
        cancel: &Cancellation,
    ) -> Result<ExtractionResult, ReceiptError> {
        let pages = document.pages();
        let mode = if document.is_multi_page() {
            ExtractionMode::Batch
        } else {
            ExtractionMode::Single
        };

        let outcome = self
            .policy
            .run("extraction", cancel, ServiceError::is_transient, |_| {
                self.service.extract(pages, mode)
            })
            .await;

        match outcome {
            Ok(result) => {
                info!(
                    source = %document.source,
                    pages = pages.len(),
                    ?mode,
                    items = result.items.len(),
                    "Receipt extracted"
                );
                Ok(result)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(source = %document.source, attempts, error = %last, "Extraction retries exhausted");
                Err(ReceiptError::ExtractionFailed { attempts, cause: last })
            }
            Err(RetryError::Permanent { error, .. }) => {
                error!(source = %document.source, error = %error, "Extraction rejected");
                Err(ReceiptError::ExtractionRejected(error))
            }
            Err(RetryError::Cancelled { .. }) => Err(ReceiptError::Cancelled),
        }
    }
}
