use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::receipts::extract::{ExtractionMode, ExtractionService, ServiceError};
use crate::receipts::normalize::NormalizedPage;
use crate::receipts::parse::parse_receipt;
use crate::receipts::prompts;
use crate::receipts::types::ExtractionResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: serde_json::Value,
}

/// OpenAI-compatible vision client.
pub struct VisionClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl VisionClient {
    pub fn new(base_url: String, model: String, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            model,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    fn messages(pages: &[NormalizedPage], mode: ExtractionMode) -> Vec<Message> {
        let mut content = vec![json!({
            "type": "text",
            "text": prompts::user_prompt(mode),
        })];
        for page in pages {
            content.push(json!({
                "type": "image_url",
                "image_url": {
                    "url": format!("data:{};base64,{}", page.encoding.mime(), STANDARD.encode(&page.bytes)),
                },
            }));
        }

        vec![
            Message {
                role: "system".to_string(),
                content: json!(prompts::SYSTEM_PROMPT),
            },
            Message {
                role: "user".to_string(),
                content: serde_json::Value::Array(content),
            },
        ]
    }

    /// Non-streaming chat completion returning the first choice's text.
    async fn chat(&self, messages: &[Message]) -> Result<String, ServiceError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.3,
            "max_tokens": 1024,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ServiceError::Transient(format!("request failed: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ServiceError::Transient(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            let snippet: String = text.chars().take(200).collect();
            let message = format!("HTTP {}: {}", status.as_u16(), snippet);
            return Err(classify_status(status, message));
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ServiceError::Transient(format!("invalid response JSON: {e}")))?;

        // Extract content from choices[0].message.content (handle null)
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .unwrap_or("")
            .to_string();

        Ok(content)
    }
}

/// Rejected content and auth problems are permanent, the rest retryable.
fn classify_status(status: StatusCode, message: String) -> ServiceError {
    match status.as_u16() {
        400 | 401 | 403 | 404 | 413 | 415 | 422 => ServiceError::Permanent(message),
        _ => ServiceError::Transient(message),
    }
}

#[async_trait]
impl ExtractionService for VisionClient {
    async fn extract(&self, pages: &[NormalizedPage], mode: ExtractionMode) -> Result<ExtractionResult, ServiceError> {
        debug!(pages = pages.len(), ?mode, model = %self.model, "Calling vision model");
        let content = self.chat(&Self::messages(pages, mode)).await?;
        parse_receipt(&content).map_err(|e| ServiceError::Transient(format!("{e:#}")))
    }
}
