use poise::serenity_prelude as serenity;
use tracing::{error, info, warn};

use super::{announce, coordinate};
use crate::errors::ReceiptError;
use crate::receipts::cancel::Cancellation;
use crate::receipts::normalize::{DocumentPayload, NormalizeError, MIME_PDF};
use crate::receipts::ReceiptSubmission;
use crate::routing::RoutingGroup;
use crate::state::AppState;
use crate::tracking;

/// Declared types worth downloading. Missing types are left to the normalizer.
fn accepted_type(attachment: &serenity::Attachment) -> bool {
    match attachment.content_type.as_deref() {
        None => true,
        Some(mime) => mime.starts_with("image/") || mime.starts_with(MIME_PDF),
    }
}

pub async fn handle_upload(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    data: &AppState,
) -> Result<(), anyhow::Error> {
    let user_id = msg.author.id.get();
    let Some(group) = data.routes.group_for(user_id) else {
        msg.reply(ctx, announce::NO_ACCESS).await?;
        return Ok(());
    };

    // Registered before queueing so a delete also reaches waiting uploads.
    let source = coordinate(msg);
    let unit = data.in_flight.register(source);
    let Some(_turn) = data
        .sequencer
        .acquire_unless_cancelled(msg.channel_id.get(), unit.cancellation())
        .await
    else {
        info!(%source, "Upload deleted while queued");
        return Ok(());
    };

    for attachment in &msg.attachments {
        if unit.cancellation().is_cancelled() {
            info!(%source, "Upload deleted, skipping remaining attachments");
            break;
        }
        process_attachment(ctx, msg, attachment, group, unit.cancellation(), data).await?;
    }
    Ok(())
}

/// A message with no attachment we could read: stickers, voice notes.
pub async fn handle_unsupported(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    kind: &str,
    data: &AppState,
) -> Result<(), anyhow::Error> {
    if data.routes.group_for(msg.author.id.get()).is_none() {
        msg.reply(ctx, announce::NO_ACCESS).await?;
        return Ok(());
    }
    info!(source = %coordinate(msg), user = %msg.author.name, kind, "Unsupported upload");
    msg.reply(ctx, announce::unsupported(kind)).await?;
    Ok(())
}

async fn process_attachment(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    attachment: &serenity::Attachment,
    group: RoutingGroup,
    cancel: &Cancellation,
    data: &AppState,
) -> Result<(), anyhow::Error> {
    let limits = data.pipeline.normalizer().limits();
    let size = attachment.size as usize;
    if size > limits.max_bytes {
        let err = ReceiptError::from(NormalizeError::SizeLimitExceeded {
            size,
            limit: limits.max_bytes,
        });
        msg.reply(ctx, err.user_message()).await?;
        return Ok(());
    }
    if let Some(kind) = announce::refused_kind(attachment.content_type.as_deref()) {
        msg.reply(ctx, announce::unsupported(kind)).await?;
        return Ok(());
    }
    if !accepted_type(attachment) {
        let err = ReceiptError::from(NormalizeError::UnsupportedFormat(
            attachment.content_type.clone().unwrap_or_default(),
        ));
        msg.reply(ctx, err.user_message()).await?;
        return Ok(());
    }

    let source = coordinate(msg);
    let mut status = msg.reply(ctx, announce::ANALYZING).await?;
    let announcement = coordinate(&status);

    info!(
        %source,
        %announcement,
        user = %msg.author.name,
        file = %attachment.filename,
        size,
        "Receipt upload received"
    );

    if cancel.is_cancelled() {
        info!(%source, "Upload deleted before download");
        finish(ctx, msg, &mut status, ReceiptError::Cancelled.user_message(), data).await?;
        return Ok(());
    }

    let bytes = match attachment.download().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(%source, "Attachment download failed: {}", e);
            let text = "❌ I couldn't download the file. Please send it again.".to_string();
            finish(ctx, msg, &mut status, text, data).await?;
            return Ok(());
        }
    };

    let submission = ReceiptSubmission {
        payload: DocumentPayload {
            declared_mime: attachment.content_type.clone(),
            filename: Some(attachment.filename.clone()),
            bytes,
        },
        announcement,
        source_url: Some(attachment.url.clone()),
        group,
        submitter_id: msg.author.id.get(),
        submitter_name: msg.author.name.clone(),
    };

    let text = match data.pipeline.process(submission, cancel).await {
        Ok(receipt) => announce::success(&receipt, data.notes.keywords(), data.routes.footer(group)),
        Err(ReceiptError::Cancelled) => {
            info!(%source, "Receipt unit cancelled");
            ReceiptError::Cancelled.user_message()
        }
        Err(e) => {
            error!(%source, %announcement, error = %e, "Receipt processing failed");
            e.user_message()
        }
    };

    // Edit only after the tracking entry exists, so replies always resolve.
    finish(ctx, msg, &mut status, text, data).await
}

/// Turn the status message into the final text. If the edit fails, the text
/// goes out as a fresh reply and the tracking entry follows it.
async fn finish(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    status: &mut serenity::Message,
    text: String,
    data: &AppState,
) -> Result<(), anyhow::Error> {
    let announcement = coordinate(status);
    let Err(e) = status.edit(ctx, serenity::EditMessage::new().content(text.clone())).await else {
        return Ok(());
    };
    warn!(%announcement, error = %e, "Status edit failed, replying instead");

    let reply = msg.reply(ctx, text).await?;
    let moved_to = coordinate(&reply);
    match tracking::move_entry(data.store.as_ref(), &announcement, moved_to).await {
        Ok(true) => info!(from = %announcement, to = %moved_to, "Announcement re-posted"),
        Ok(false) => {}
        Err(e) => error!(%announcement, error = %e, "Could not follow the re-posted announcement"),
    }
    Ok(())
}
