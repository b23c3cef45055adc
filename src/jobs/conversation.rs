/// Conversation job
///
/// Conversation-scoped state machine `open -> monitoring -> finalizing ->
/// closed`. Monitoring watches for the end triggers; finalizing clears the
/// Current-Conversation Pointer (which makes the persistence worker close
/// and bind the file), waits a bounded time for the Audio File Binding,
/// snapshots the combined transcript as version v1 and hands off to the
/// post-conversation pipeline. Cleanup deletes the result stream and, while
/// the transport is still connected, re-enqueues a fresh speech detector.
use crate::domain::models::{
    ConversationStatus, EndReason, SessionStatus, TranscriptVersion,
};
use crate::error::{AppError, Result};
use crate::jobs::{speech_detector, Job, JobContext};
use crate::ports::log::{results_stream_key, DurableLogPort};
use crate::ports::metadata::MetadataStorePort;
use crate::ports::storage::ConversationStorePort;
use std::time::Instant;

pub async fn run(ctx: &JobContext, session_id: &str, conversation_id: &str) -> Result<()> {
    let Some(conversation) = ctx.store.get_conversation(conversation_id).await? else {
        return Err(AppError::NotFound(format!(
            "conversation {}",
            conversation_id
        )));
    };

    // Reconciliation: resume from whatever state a previous run reached
    match conversation.status {
        ConversationStatus::Open | ConversationStatus::Monitoring => {
            match monitor(ctx, session_id).await? {
                Some(end_reason) => finalize(ctx, session_id, conversation_id, end_reason).await,
                None => Ok(()), // cancelled; a restart resumes monitoring
            }
        }
        ConversationStatus::Finalizing => {
            let end_reason = conversation.end_reason.unwrap_or(EndReason::UserStopped);
            finalize(ctx, session_id, conversation_id, end_reason).await
        }
        ConversationStatus::Closed => Ok(()),
    }
}

/// Watch for the end trigger; returns None only on cancellation
async fn monitor(ctx: &JobContext, session_id: &str) -> Result<Option<EndReason>> {
    let config = &ctx.config.jobs;
    let mut last_fingerprint = (0usize, 0usize);
    let mut last_progress = Instant::now();
    let mut draining = false;

    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(None);
        }

        // The pointer must outlive the conversation; re-arm it every pass
        ctx.metadata
            .extend_current_conversation(session_id, config.pointer_ttl)
            .await?;

        let Some(session) = ctx.metadata.session(session_id).await? else {
            return Ok(Some(EndReason::TransportDisconnect));
        };
        if session.stop_requested {
            return Ok(Some(EndReason::UserStopped));
        }
        if session.transport_disconnected {
            return Ok(Some(EndReason::TransportDisconnect));
        }

        let combined = ctx.aggregator.get_combined(session_id).await?;
        let fingerprint = (combined.chunk_count, combined.words.len());
        if fingerprint != last_fingerprint {
            last_fingerprint = fingerprint;
            last_progress = Instant::now();
            draining = false;
        }

        if session.status != SessionStatus::Active {
            // Clean END: give trailing finals one more poll, then stop
            if draining {
                return Ok(Some(EndReason::UserStopped));
            }
            draining = true;
        } else if last_progress.elapsed() >= config.inactivity_timeout {
            return Ok(Some(EndReason::InactivityTimeout));
        }

        tokio::select! {
            _ = ctx.cancel.cancelled() => {}
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    }
}

async fn finalize(
    ctx: &JobContext,
    session_id: &str,
    conversation_id: &str,
    end_reason: EndReason,
) -> Result<()> {
    let config = &ctx.config.jobs;
    let started = Instant::now();
    ctx.store
        .begin_finalizing(conversation_id, end_reason)
        .await?;
    log::info!(
        "Finalizing conversation {} ({})",
        conversation_id,
        end_reason
    );

    let combined = ctx.aggregator.get_combined(session_id).await?;

    // Clearing the pointer is the rotation signal: the persistence worker
    // closes the file and publishes the Audio File Binding.
    ctx.metadata.clear_current_conversation(session_id).await?;

    let audio_path = loop {
        if let Some(path) = ctx.metadata.audio_file(conversation_id).await? {
            break Some(path);
        }
        if started.elapsed() >= config.audio_ready_timeout {
            break None;
        }
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    };

    match audio_path {
        None => {
            log::error!(
                "Audio file for conversation {} not ready after {:?}",
                conversation_id,
                config.audio_ready_timeout
            );
            ctx.store
                .mark_deleted(conversation_id, EndReason::AudioFileNotReady)
                .await?;
        }
        Some(path) => {
            let version = TranscriptVersion {
                text: combined.text.clone(),
                words: combined.words.clone(),
                segments: combined.segments.clone(),
                provider: combined
                    .provider
                    .clone()
                    .unwrap_or_else(|| ctx.config.asr.provider.clone()),
                processing_time_ms: started.elapsed().as_millis() as u64,
                created_at: chrono::Utc::now().timestamp(),
            };
            ctx.store
                .add_transcript_version(conversation_id, "v1", &version, true)
                .await?;

            if !config.speech.is_met(&combined) {
                // The opening heuristic was wrong in hindsight
                ctx.store
                    .mark_deleted(conversation_id, EndReason::NoMeaningfulSpeech)
                    .await?;
            } else {
                ctx.store
                    .finalize_conversation(
                        conversation_id,
                        Some(&path),
                        end_reason,
                        chrono::Utc::now().timestamp(),
                    )
                    .await?;
                ctx.queue.enqueue(Job::PostProcess {
                    conversation_id: conversation_id.to_string(),
                });
            }
        }
    }

    cleanup(ctx, session_id).await
}

/// Post-close bookkeeping: drop the result stream, bump the conversation
/// counter and either hand the session to a fresh detector or complete it.
async fn cleanup(ctx: &JobContext, session_id: &str) -> Result<()> {
    ctx.log
        .delete_stream(&results_stream_key(session_id))
        .await?;
    if let Err(e) = ctx.metadata.bump_conversation_count(session_id).await {
        log::debug!("Conversation counter not bumped: {}", e);
    }

    match ctx.metadata.session(session_id).await? {
        Some(session)
            if session.status == SessionStatus::Active && !session.transport_disconnected =>
        {
            ctx.queue.enqueue(Job::DetectSpeech {
                session_id: session_id.to_string(),
            });
        }
        Some(_) => speech_detector::complete_session(ctx, session_id).await?,
        None => {}
    }
    Ok(())
}
