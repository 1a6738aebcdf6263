pub mod announce;
pub mod replies;
pub mod sequencer;
pub mod uploads;

use poise::serenity_prelude as serenity;
use tracing::info;

use crate::state::AppState;
use crate::tracking::types::MessageCoordinate;

pub fn coordinate(message: &serenity::Message) -> MessageCoordinate {
    MessageCoordinate::new(message.channel_id.get(), message.id.get())
}

/// Messages that carry media but nothing we can analyze.
fn unreadable_kind(message: &serenity::Message) -> Option<&'static str> {
    let voice = message
        .flags
        .is_some_and(|flags| flags.contains(serenity::MessageFlags::IS_VOICE_MESSAGE));
    if voice {
        Some("voice message")
    } else if message.attachments.is_empty() && !message.sticker_items.is_empty() {
        Some("sticker")
    } else {
        None
    }
}

/// Gateway events outside slash commands: uploads, note replies, deletions.
pub async fn handle(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    framework: poise::FrameworkContext<'_, AppState, anyhow::Error>,
    data: &AppState,
) -> Result<(), anyhow::Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            if new_message.author.bot {
                return Ok(());
            }
            if let Some(kind) = unreadable_kind(new_message) {
                uploads::handle_unsupported(ctx, new_message, kind, data).await?;
            } else if !new_message.attachments.is_empty() {
                uploads::handle_upload(ctx, new_message, data).await?;
            } else if let Some(replied) = new_message.referenced_message.as_deref() {
                if replied.author.id == framework.bot_id {
                    replies::handle_note(ctx, new_message, replied, data).await?;
                }
            }
        }
        serenity::FullEvent::MessageDelete {
            channel_id,
            deleted_message_id,
            ..
        } => {
            let source = MessageCoordinate::new(channel_id.get(), deleted_message_id.get());
            if data.in_flight.cancel(&source) {
                info!(%source, "Upload deleted, cancelling its unit");
            }
        }
        _ => {}
    }
    Ok(())
}
