mod help;
mod status;

use crate::state::Context;

/// Receipt keeper: send a receipt photo or PDF, reply to add a note
#[poise::command(slash_command, subcommands("help::help", "status::status", "status::sweep"))]
pub async fn receipts(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}
