use crate::receipts::notes::{AttachedNote, KeywordTable};
use crate::receipts::ProcessedReceipt;

pub const SUCCESS_HEADER: &str = "✅ Receipt successfully analyzed and saved!";
pub const ANALYZING: &str = "🔍 Analyzing your receipt. This may take some time...";
pub const NO_ACCESS: &str =
    "⛔ Sorry, you don't have access to this bot. Please contact the administrator if you believe this is an error.";

const MAX_ITEMS_TEXT: usize = 30;
const FOLDER_PLACEHOLDER: &str = "{folder_url}";

/// Reply for uploads that can never be a receipt.
pub fn unsupported(kind: &str) -> String {
    format!(
        "⚠️ Sorry, {} files are not supported.\n\nPlease send receipts as photos or PDF documents.",
        kind
    )
}

/// Kind of attachment we refuse outright, by declared type. `None` means
/// the normalizer decides.
pub fn refused_kind(mime: Option<&str>) -> Option<&'static str> {
    let mime = mime?;
    if mime.starts_with("video/") {
        Some("video")
    } else if mime.starts_with("audio/") {
        Some("audio")
    } else {
        None
    }
}

/// Fill `{folder_url}` with the submitter's archive folder. Lines that need
/// the placeholder are dropped when nothing was archived.
fn render_footer(footer: &str, folder_url: Option<&str>) -> String {
    match folder_url {
        Some(url) => footer.replace(FOLDER_PLACEHOLDER, url),
        None => footer
            .lines()
            .filter(|line| !line.contains(FOLDER_PLACEHOLDER))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Was this bot message a receipt announcement?
pub fn is_announcement(content: &str) -> bool {
    content.starts_with(SUCCESS_HEADER)
}

fn truncate_items(items: &[String]) -> String {
    let joined = items.join(", ");
    if joined.is_empty() {
        return "-".to_string();
    }
    if joined.chars().count() > MAX_ITEMS_TEXT {
        let head: String = joined.chars().take(MAX_ITEMS_TEXT).collect();
        format!("{}...", head)
    } else {
        joined
    }
}

fn reply_hint(keywords: &KeywordTable) -> String {
    let mut hint = String::from("💬 Reply to this message to add a note.");
    let pairs = keywords.pairs();
    if !pairs.is_empty() {
        let options = pairs
            .iter()
            .map(|(keyword, label)| format!("*{}* for {}", keyword, label))
            .collect::<Vec<_>>()
            .join(" or ");
        hint.push_str(&format!(" Add {} to categorize it.", options));
    }
    hint
}

pub fn success(receipt: &ProcessedReceipt, keywords: &KeywordTable, footer: Option<&str>) -> String {
    let result = &receipt.result;
    let amount = match (&result.total_amount, &result.currency) {
        (Some(amount), Some(currency)) => format!("{} {}", amount, currency),
        (Some(amount), None) => amount.to_string(),
        (None, _) => "unknown".to_string(),
    };
    let date = result
        .date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut text = format!(
        "{}\n\n💰 Amount: {}\n📅 Date: {}\n🛒 Items: {}",
        SUCCESS_HEADER,
        amount,
        date,
        truncate_items(&result.items)
    );

    if receipt.pages_analyzed > 1 || receipt.truncated_from.is_some() {
        text.push_str(&format!("\n📄 Pages analyzed: {}", receipt.pages_analyzed));
        if let Some(total) = receipt.truncated_from {
            text.push_str(&format!(" of {} (the rest were skipped)", total));
        }
    }
    if !receipt.warnings.is_empty() {
        let skipped = receipt
            .warnings
            .iter()
            .map(|w| (w.page_index + 1).to_string())
            .collect::<Vec<_>>()
            .join(", ");
        text.push_str(&format!("\n⚠️ Unreadable pages skipped: {}", skipped));
    }

    if let Some(archived) = &receipt.archived {
        text.push_str(&format!("\n📎 Original: {}", archived.file_url()));
    }
    text.push_str(&format!("\n🆔 Record: `{}`", receipt.record.record_id));
    text.push_str("\n\n");
    text.push_str(&reply_hint(keywords));

    let folder_url = receipt.archived.as_ref().map(|a| a.folder_url());
    let footer = footer.map(|f| render_footer(f, folder_url.as_deref()));
    if let Some(footer) = footer.filter(|f| !f.trim().is_empty()) {
        text.push_str("\n\n");
        text.push_str(&footer);
    }
    text
}

pub fn note_added(attached: &AttachedNote) -> String {
    match attached.note.category_label() {
        Some(label) => format!("✅ Note added to the receipt! Category: **{}**", label),
        None => "✅ Note added to the receipt!".to_string(),
    }
}
