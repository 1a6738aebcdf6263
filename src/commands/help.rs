use crate::state::Context;

/// How to submit receipts and add notes
#[poise::command(slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let config = &ctx.data().config;
    let keywords = config
        .keywords
        .pairs()
        .iter()
        .map(|(keyword, label)| format!("• `{}` → {}", keyword, label))
        .collect::<Vec<_>>()
        .join("\n");

    let text = format!(
        "🤖 **Receipt Keeper**\n\n\
         📋 **Sending receipts:**\n\
         • Attach a photo (JPG, PNG, WEBP, GIF, BMP, TIFF) or a PDF to a message\n\
         • Multi-page PDFs are read as one receipt\n\
         • I extract amount, currency, date and items and save them to your ledger\n\n\
         ⚠️ **Limits:**\n\
         • Maximum file size: {} MB\n\
         • PDFs: up to {} pages\n\n\
         📝 **Notes:**\n\
         • Reply to a receipt announcement with text to add a note\n\
         • Notes can be added up to {} days after upload\n\
         • A new note replaces the previous one\n\
         • Keywords set the category:\n{}",
        config.limits.max_bytes / (1024 * 1024),
        config.limits.max_pages,
        config.retention.num_days(),
        if keywords.is_empty() { "• (none configured)".to_string() } else { keywords },
    );

    ctx.say(text).await?;
    Ok(())
}
