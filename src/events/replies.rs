use poise::serenity_prelude as serenity;
use tracing::{info, warn};

use super::{announce, coordinate};
use crate::errors::{ExpiryKind, ReceiptError};
use crate::receipts::notes::AttachedNote;
use crate::state::AppState;

/// A user replied to one of our messages: attach the text as a note.
pub async fn handle_note(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    replied: &serenity::Message,
    data: &AppState,
) -> Result<(), anyhow::Error> {
    if data.routes.group_for(msg.author.id.get()).is_none() {
        msg.reply(ctx, announce::NO_ACCESS).await?;
        return Ok(());
    }
    let text = msg.content.trim();
    if text.is_empty() {
        return Ok(());
    }

    let _turn = data.sequencer.acquire(msg.channel_id.get()).await;
    let target = coordinate(replied);

    let outcome = data.notes.attach_note(target, msg.author.id.get(), text).await;
    if let Err(e) = &outcome {
        warn!(%target, user = %msg.author.name, error = %e, "Note not attached");
    }
    let reply = note_reply(outcome, &replied.content);

    info!(%target, user = %msg.author.name, "Note reply handled");
    msg.reply(ctx, reply).await?;
    Ok(())
}

/// User-facing answer to a note reply. `replied_content` is the text of the
/// bot message that was replied to.
fn note_reply(outcome: Result<AttachedNote, ReceiptError>, replied_content: &str) -> String {
    match outcome {
        Ok(attached) => announce::note_added(&attached),
        // A swept entry looks like one that never existed.
        Err(ReceiptError::RecordExpiredOrUnknown(ExpiryKind::Unknown)) if announce::is_announcement(replied_content) => {
            ReceiptError::RecordExpiredOrUnknown(ExpiryKind::Expired).user_message()
        }
        Err(e) => e.user_message(),
    }
}
