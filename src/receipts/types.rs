use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveTime};
use iso_currency::Currency;

/// Currency as reported on the receipt. Known ISO 4217 codes are typed,
/// anything else (symbols, local abbreviations) is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrencyCode {
    Iso(Currency),
    Raw(String),
}

impl CurrencyCode {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(match Currency::from_code(&trimmed.to_ascii_uppercase()) {
            Some(code) => CurrencyCode::Iso(code),
            None => CurrencyCode::Raw(trimmed.to_string()),
        })
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CurrencyCode::Iso(code) => write!(f, "{}", code.code()),
            CurrencyCode::Raw(raw) => write!(f, "{}", raw),
        }
    }
}

/// Structured receipt data for one logical receipt.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractionResult {
    pub total_amount: Option<BigDecimal>,
    pub currency: Option<CurrencyCode>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub items: Vec<String>,
}
