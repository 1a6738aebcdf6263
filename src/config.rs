use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::Level;

use crate::receipts::normalize::NormalizeLimits;
use crate::receipts::notes::{KeywordTable, DEFAULT_KEYWORDS};
use crate::receipts::render::DEFAULT_RENDER_DPI;
use crate::receipts::retry::{random_jitter, RetryPolicy};
use crate::routing::RoutingTable;

/// Everything read from the environment at startup.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub discord_token: String,
    pub guild_id: Option<u64>,
    pub admin_ids: HashSet<u64>,
    pub log_level: Level,

    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub llm_timeout: Duration,
    pub ledger_timeout: Duration,
    pub idempotent_create: bool,

    pub limits: NormalizeLimits,
    /// Explicit PDFium shared library; otherwise the usual search paths.
    pub pdfium_library: Option<PathBuf>,
    pub pdf_render_dpi: u32,
    pub retry: RetryPolicy,

    pub tracking_dir: PathBuf,
    pub retention: chrono::Duration,
    pub sweep_interval: chrono::Duration,
    pub store_timeout: Duration,
    pub normalize_timeout: Duration,

    pub keywords: KeywordTable,
    pub retain_after_attach: bool,
    pub routes: RoutingTable,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let Some(discord_token) = get("DISCORD_TOKEN") else {
            bail!("DISCORD_TOKEN must be set");
        };

        let guild_id = get("DISCORD_GUILD_ID")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("DISCORD_GUILD_ID must be a numeric id")?;

        let admin_ids = get("ADMIN_USER_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u64>()
                    .with_context(|| format!("ADMIN_USER_IDS: invalid user id '{}'", s))
            })
            .collect::<Result<HashSet<u64>>>()?;

        let log_level = parse_or(&get, "LOG_LEVEL", Level::INFO)?;

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "RETRY_MAX_ATTEMPTS", 5u32)?,
            base_delay: Duration::from_millis(parse_or(&get, "RETRY_BASE_DELAY_MS", 2000u64)?),
            max_delay: Duration::from_millis(parse_or(&get, "RETRY_MAX_DELAY_MS", 30_000u64)?),
            max_jitter: Duration::from_millis(parse_or(&get, "RETRY_MAX_JITTER_MS", 500u64)?),
            jitter: random_jitter,
        };
        if retry.max_attempts == 0 {
            bail!("RETRY_MAX_ATTEMPTS must be at least 1");
        }
        if retry.base_delay > retry.max_delay {
            bail!("RETRY_BASE_DELAY_MS must not exceed RETRY_MAX_DELAY_MS");
        }

        let limits = NormalizeLimits {
            max_bytes: parse_or(&get, "MAX_FILE_SIZE", 5 * 1024 * 1024usize)?,
            max_pages: parse_or(&get, "MAX_PDF_PAGES", 5usize)?,
            strict_page_limit: parse_bool(&get, "STRICT_PAGE_LIMIT", false)?,
        };
        if limits.max_pages == 0 {
            bail!("MAX_PDF_PAGES must be at least 1");
        }

        let pdf_render_dpi = parse_or(&get, "PDF_RENDER_DPI", DEFAULT_RENDER_DPI)?;
        if !(72..=600).contains(&pdf_render_dpi) {
            bail!("PDF_RENDER_DPI must be between 72 and 600");
        }

        let retention_days: i64 = parse_or(&get, "RETENTION_DAYS", 14)?;
        let sweep_hours: i64 = parse_or(&get, "SWEEP_INTERVAL_HOURS", 72)?;
        if retention_days <= 0 || sweep_hours <= 0 {
            bail!("RETENTION_DAYS and SWEEP_INTERVAL_HOURS must be positive");
        }

        let keywords = KeywordTable::parse(&get("NOTE_KEYWORDS").unwrap_or_else(|| DEFAULT_KEYWORDS.to_string()))
            .context("NOTE_KEYWORDS")?;

        Ok(Self {
            discord_token,
            guild_id,
            admin_ids,
            log_level,
            llm_base_url: get("LLM_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            llm_model: get("LLM_MODEL").unwrap_or_else(|| "gpt-4.1".to_string()),
            llm_api_key: get("LLM_API_KEY"),
            llm_timeout: Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", 60u64)?),
            ledger_timeout: Duration::from_secs(parse_or(&get, "LEDGER_TIMEOUT_SECS", 30u64)?),
            idempotent_create: parse_bool(&get, "LEDGER_IDEMPOTENT_RETRY", true)?,
            limits,
            pdfium_library: get("PDFIUM_DYNAMIC_LIB_PATH").map(PathBuf::from),
            pdf_render_dpi,
            retry,
            tracking_dir: PathBuf::from(get("TRACKING_DIR").unwrap_or_else(|| "./data/tracking".to_string())),
            retention: chrono::Duration::days(retention_days),
            sweep_interval: chrono::Duration::hours(sweep_hours),
            store_timeout: Duration::from_secs(parse_or(&get, "STORE_TIMEOUT_SECS", 10u64)?),
            normalize_timeout: Duration::from_secs(parse_or(&get, "NORMALIZE_TIMEOUT_SECS", 30u64)?),
            keywords,
            retain_after_attach: parse_bool(&get, "NOTE_RETAIN_AFTER_ATTACH", true)?,
            routes: RoutingTable::from_lookup(&get)?,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e)),
    }
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => bail!("{} must be a boolean, got '{}'", key, other),
    }
}
