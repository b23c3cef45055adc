/// Persistence worker
///
/// One consumer per session in the `audio-persistence` group. Writes raw
/// PCM into a rotating WAV file keyed by the Current-Conversation Pointer:
/// the pointer changing is the rotation signal, and closing a file records
/// its path under the previous conversation's Audio File Binding. Frames
/// that arrive while no conversation is open land in an orphan file that is
/// re-linked on the next rotation. Entries ack only after flush + fsync.
use crate::config::PipelineConfig;
use crate::domain::models::{EntryId, Session};
use crate::error::Result;
use crate::ports::log::{audio_stream_key, DurableLogPort, StreamPayload, PERSISTENCE_GROUP};
use crate::ports::metadata::MetadataStorePort;
use crate::utils::wav::WavSink;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FileState {
    sink: Option<WavSink>,
    /// None while the open file (if any) is an orphan
    conversation: Option<String>,
}

/// Persistence worker for one session
pub struct PersistenceWorker {
    log: Arc<dyn DurableLogPort>,
    metadata: Arc<dyn MetadataStorePort>,
    session: Session,
    config: PipelineConfig,
    binding_ttl: Duration,
    cancel: CancellationToken,
}

impl PersistenceWorker {
    pub fn new(
        log: Arc<dyn DurableLogPort>,
        metadata: Arc<dyn MetadataStorePort>,
        session: Session,
        config: PipelineConfig,
        binding_ttl: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            log,
            metadata,
            session,
            config,
            binding_ttl,
            cancel,
        }
    }

    pub async fn run(self) -> Result<()> {
        let stream = audio_stream_key(&self.session.client_id);
        let consumer = format!("persistence-{}", self.session.session_id);
        let mut state = FileState::default();

        std::fs::create_dir_all(&self.config.recordings_dir)?;

        // Entries delivered to a dead incarnation come back first
        let mut pending = self
            .log
            .claim_idle(&stream, PERSISTENCE_GROUP, &consumer, self.config.claim_idle_after)
            .await?;

        loop {
            if self.cancel.is_cancelled() {
                // Close the file so its samples survive; no ack for
                // anything not yet synced, those entries redeliver.
                if let Some(sink) = state.sink.take() {
                    let _ = sink.finalize();
                }
                return Ok(());
            }

            // The pointer is checked before each read: a change is the
            // rotation signal.
            self.check_rotation(&mut state).await?;

            let batch = if pending.is_empty() {
                self.log
                    .read_group(
                        &stream,
                        PERSISTENCE_GROUP,
                        &consumer,
                        self.config.read_count,
                        self.config.read_block,
                    )
                    .await?
            } else {
                std::mem::take(&mut pending)
            };

            let mut synced_ids: Vec<EntryId> = Vec::new();
            let mut end_id: Option<EntryId> = None;

            for record in batch {
                match record.payload {
                    StreamPayload::Frame { pcm, .. } => {
                        match self.write_frame(&mut state, &pcm).await {
                            Ok(()) => synced_ids.push(record.id),
                            Err(e) => {
                                // Surfaced, not acked: the entry redelivers
                                // once a healthy worker claims it.
                                log::error!(
                                    "Persistence write failed for session {}: {}",
                                    self.session.session_id,
                                    e
                                );
                                self.metadata
                                    .set_persistence_error(
                                        &self.session.session_id,
                                        Some(&e.to_string()),
                                    )
                                    .await?;
                            }
                        }
                    }
                    StreamPayload::End => {
                        end_id = Some(record.id);
                    }
                    StreamPayload::Chunk(_) => {
                        log::warn!("Unexpected transcript chunk on audio stream {}", stream);
                        synced_ids.push(record.id);
                    }
                }
            }

            // Durability point: flush + fsync, then ack the batch
            if !synced_ids.is_empty() {
                if let Some(sink) = state.sink.as_mut() {
                    if let Err(e) = sink.sync() {
                        self.metadata
                            .set_persistence_error(&self.session.session_id, Some(&e.to_string()))
                            .await?;
                        continue; // nothing acked; entries redeliver
                    }
                }
                self.log.ack(&stream, PERSISTENCE_GROUP, &synced_ids).await?;
            }

            if let Some(end_id) = end_id {
                self.close_file(&mut state).await?;
                self.log.ack(&stream, PERSISTENCE_GROUP, &[end_id]).await?;
                self.log
                    .remove_consumer(&stream, PERSISTENCE_GROUP, &consumer)
                    .await?;
                log::info!("Persistence finished for session {}", self.session.session_id);
                return Ok(());
            }
        }
    }

    /// Apply a pointer change: close and bind the previous conversation's
    /// file, re-link an orphan, or open the next file.
    async fn check_rotation(&self, state: &mut FileState) -> Result<()> {
        let pointer = self
            .metadata
            .current_conversation(&self.session.session_id)
            .await?;
        if pointer == state.conversation {
            return Ok(());
        }

        match pointer {
            Some(next) => {
                match (state.sink.take(), state.conversation.take()) {
                    (Some(sink), Some(previous)) => {
                        self.bind_closed_file(sink, &previous).await?;
                        state.sink = Some(WavSink::create(self.conversation_path(&next))?);
                    }
                    (Some(mut sink), None) => {
                        // Orphan re-link: the buffered audio belongs to the
                        // conversation that just opened.
                        sink.rename(self.conversation_path(&next))?;
                        state.sink = Some(sink);
                    }
                    (None, _) => {
                        state.sink = Some(WavSink::create(self.conversation_path(&next))?);
                    }
                }
                log::info!(
                    "Rotated recording for session {} to conversation {}",
                    self.session.session_id,
                    next
                );
                state.conversation = Some(next);
            }
            None => {
                if let Some(previous) = state.conversation.take() {
                    if let Some(sink) = state.sink.take() {
                        self.bind_closed_file(sink, &previous).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn write_frame(&self, state: &mut FileState, pcm: &[u8]) -> Result<()> {
        if state.sink.is_none() {
            // No conversation open yet: capture into an orphan file
            state.sink = Some(WavSink::create(self.orphan_path())?);
        }
        let sink = state.sink.as_mut().expect("sink just ensured");
        if let Err(first) = sink.append_pcm(pcm) {
            log::warn!("Retrying WAV append once: {}", first);
            if let Err(second) = sink.append_pcm(pcm) {
                if let Some(sink) = state.sink.take() {
                    let _ = sink.finalize();
                }
                return Err(second);
            }
        }
        Ok(())
    }

    async fn close_file(&self, state: &mut FileState) -> Result<()> {
        if let Some(sink) = state.sink.take() {
            if let Some(conversation) = state.conversation.take() {
                self.bind_closed_file(sink, &conversation).await?;
            } else {
                // Orphan with no conversation to claim it; finalize and
                // leave it on disk for inspection.
                let path = sink.finalize()?;
                log::debug!("Closed orphan recording {}", path.display());
            }
        }
        Ok(())
    }

    async fn bind_closed_file(&self, sink: WavSink, conversation_id: &str) -> Result<()> {
        let path = sink.finalize()?;
        self.metadata
            .set_audio_file(
                conversation_id,
                &path.to_string_lossy(),
                self.binding_ttl,
            )
            .await?;
        log::info!(
            "Recorded {} for conversation {}",
            path.display(),
            conversation_id
        );
        Ok(())
    }

    fn conversation_path(&self, conversation_id: &str) -> PathBuf {
        self.config.recordings_dir.join(format!(
            "{}_{}_{}.wav",
            chrono::Utc::now().timestamp_millis(),
            self.session.client_id,
            conversation_id
        ))
    }

    fn orphan_path(&self) -> PathBuf {
        self.config.recordings_dir.join(format!(
            "{}_{}_pending-{}.wav",
            chrono::Utc::now().timestamp_millis(),
            self.session.client_id,
            self.session.session_id
        ))
    }
}
