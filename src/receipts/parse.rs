//! Parsing of the model's JSON reply into an [`ExtractionResult`].

use std::str::FromStr;

use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;

use super::types::{CurrencyCode, ExtractionResult};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawItems {
    List(Vec<serde_json::Value>),
    Joined(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Number(serde_json::Number),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawReceipt {
    #[serde(default)]
    total_amount: Option<RawAmount>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    items: Option<RawItems>,
}

/// Strip a surrounding markdown code fence, if any.
pub fn strip_code_fence(input: &str) -> &str {
    let trimmed = input.trim();
    let Some(after_fence) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Skip the rest of the opening fence line (language tag).
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(after_fence.len());
    let body = &after_fence[body_start..];
    let end = body.rfind("```").unwrap_or(body.len());
    body[..end].trim()
}

/// Parse the model's reply. Unparseable content is an error; individual
/// fields that do not parse become `None`.
pub fn parse_receipt(content: &str) -> Result<ExtractionResult> {
    let json = strip_code_fence(content);
    if json.is_empty() {
        anyhow::bail!("empty model response");
    }
    let raw: RawReceipt = serde_json::from_str(json).context("model response is not receipt JSON")?;

    Ok(ExtractionResult {
        total_amount: raw.total_amount.and_then(parse_amount),
        currency: raw.currency.as_deref().and_then(CurrencyCode::parse),
        date: raw
            .date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok()),
        time: raw.time.as_deref().and_then(parse_time),
        items: raw.items.map(flatten_items).unwrap_or_default(),
    })
}

fn parse_amount(raw: RawAmount) -> Option<BigDecimal> {
    match raw {
        RawAmount::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        RawAmount::Text(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
                .collect();
            // "1,234.50" vs "42,50"
            let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
                (Some(comma), Some(dot)) if comma < dot => cleaned.replace(',', ""),
                (Some(_), Some(_)) => cleaned.replace('.', "").replace(',', "."),
                (Some(_), None) => cleaned.replace(',', "."),
                _ => cleaned,
            };
            BigDecimal::from_str(&normalized).ok()
        }
    }
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

fn flatten_items(raw: RawItems) -> Vec<String> {
    let names: Vec<String> = match raw {
        RawItems::List(values) => values
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        RawItems::Joined(joined) => joined.split(',').map(str::to_string).collect(),
    };
    names
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
