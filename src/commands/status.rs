use chrono::Utc;
use tracing::info;

use crate::state::Context;
use crate::tracking::TrackingStore;

async fn require_admin(ctx: Context<'_>) -> Result<bool, anyhow::Error> {
    if ctx.data().is_admin(ctx.author().id.get()) {
        return Ok(true);
    }
    ctx.say("This command is admin-only.").await?;
    Ok(false)
}

/// Tracking store and configuration summary (admin only)
#[poise::command(slash_command)]
pub async fn status(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    if !require_admin(ctx).await? {
        return Ok(());
    }

    let data = ctx.data();
    let tracked = data.store.len().await?;
    let last_sweep = data
        .store
        .last_sweep()
        .await?
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    let config = &data.config;

    ctx.say(format!(
        "**Receipt Keeper status:**\n\
         Tracked receipts: {}\n\
         Last sweep: {}\n\
         Units in flight: {} (chats busy: {})\n\
         Routing groups: {}\n\
         Retention: {} days, sweep every {} h\n\
         Retry: {} attempts, {:?} base, {:?} cap\n\
         Limits: {} bytes, {} pages{}\n\
         Model: `{}`",
        tracked,
        last_sweep,
        data.in_flight.len(),
        data.sequencer.active_chats(),
        data.routes.len(),
        data.sweeper.retention().num_days(),
        data.sweeper.interval().num_hours(),
        config.retry.max_attempts,
        config.retry.base_delay,
        config.retry.max_delay,
        config.limits.max_bytes,
        config.limits.max_pages,
        if config.limits.strict_page_limit { " (strict)" } else { "" },
        config.llm_model,
    ))
    .await?;
    Ok(())
}

/// Remove expired tracking entries now (admin only)
#[poise::command(slash_command)]
pub async fn sweep(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    if !require_admin(ctx).await? {
        return Ok(());
    }

    let removed = ctx.data().sweeper.sweep_now(Utc::now()).await?;
    info!(user = ctx.author().name, removed, "Manual sweep");
    ctx.say(format!("Sweep complete: {} expired entries removed.", removed))
        .await?;
    Ok(())
}
