/// Speech detector job
///
/// Session-scoped poller: once the combined transcript amounts to
/// meaningful speech it creates the conversation, binds the
/// Current-Conversation Pointer and hands over to the conversation job.
/// A session therefore produces 0..N conversations, one detector at a time.
use crate::domain::models::{Conversation, SessionStatus};
use crate::error::Result;
use crate::jobs::{Job, JobContext};
use crate::ports::metadata::MetadataStorePort;
use crate::ports::storage::ConversationStorePort;

pub async fn run(ctx: &JobContext, session_id: &str) -> Result<()> {
    let config = &ctx.config.jobs;
    let mut draining = false;

    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
        let Some(session) = ctx.metadata.session(session_id).await? else {
            log::warn!("Speech detector for unknown session {}", session_id);
            return Ok(());
        };

        if session.transport_disconnected {
            complete_session(ctx, session_id).await?;
            return Ok(());
        }

        if session.transcription_error.is_some() {
            // The transport layer reads the error off the session metadata;
            // nothing to detect until transcription recovers.
            sleep_poll(ctx).await;
            continue;
        }

        let combined = ctx.aggregator.get_combined(session_id).await?;
        if config.speech.is_met(&combined) {
            let conversation = Conversation::new(
                session_id.to_string(),
                session.user_id.clone(),
                session.client_id.clone(),
            );
            ctx.store.create_conversation(&conversation).await?;
            ctx.metadata
                .set_current_conversation(
                    session_id,
                    &conversation.conversation_id,
                    config.pointer_ttl,
                )
                .await?;
            log::info!(
                "Opened conversation {} for session {} ({} words)",
                conversation.conversation_id,
                session_id,
                combined.word_count()
            );
            ctx.queue.enqueue(Job::TrackConversation {
                session_id: session_id.to_string(),
                conversation_id: conversation.conversation_id,
            });
            return Ok(());
        }

        if session.status != SessionStatus::Active {
            // Stream ended without meaningful speech; one more poll picks
            // up trailing finals, then the session completes.
            if draining {
                complete_session(ctx, session_id).await?;
                return Ok(());
            }
            draining = true;
        }

        sleep_poll(ctx).await;
    }
}

async fn sleep_poll(ctx: &JobContext) {
    tokio::select! {
        _ = ctx.cancel.cancelled() => {}
        _ = tokio::time::sleep(ctx.config.jobs.poll_interval) => {}
    }
}

/// Terminal bookkeeping once a session will produce no further
/// conversations: status complete, metadata on its expiry clock.
pub(crate) async fn complete_session(ctx: &JobContext, session_id: &str) -> Result<()> {
    ctx.metadata
        .set_session_status(session_id, SessionStatus::Complete)
        .await?;
    ctx.metadata
        .expire_session(session_id, ctx.config.jobs.session_ttl)
        .await?;
    log::info!("Session {} complete", session_id);
    Ok(())
}
