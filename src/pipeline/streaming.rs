/// Streaming transcription worker
///
/// One worker per audio stream in the `streaming-transcription` group.
/// Frames are forwarded to a duplex ASR session as they arrive; interim
/// results go out on the ephemeral channel, final results are appended to
/// the session's result stream and only then are the covered entries acked.
/// Losing the worker before an ack therefore redelivers, giving
/// at-least-once into the result stream.
use crate::config::PipelineConfig;
use crate::domain::models::{frame_offset_secs, EntryId, Session, TranscriptChunk};
use crate::error::{AppError, Result};
use crate::ports::log::{
    audio_stream_key, interim_channel_key, results_stream_key, DurableLogPort, LogRecord,
    StreamPayload, STREAMING_GROUP,
};
use crate::ports::metadata::MetadataStorePort;
use crate::ports::transcription::{
    StreamingSession, StreamingTranscriptionCallback, TranscriptionConfig, TranscriptionOutput,
    TranscriptionServicePort,
};
use crate::utils::backoff::retry_with_backoff;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

enum AsrEvent {
    Interim(TranscriptionOutput),
    Final(TranscriptionOutput),
    Error(String),
    Closed,
}

/// Bridges ASR callbacks into the worker's event loop
struct ChannelCallback {
    tx: mpsc::UnboundedSender<AsrEvent>,
}

#[async_trait]
impl StreamingTranscriptionCallback for ChannelCallback {
    async fn on_final(&self, output: TranscriptionOutput) {
        let _ = self.tx.send(AsrEvent::Final(output));
    }

    async fn on_interim(&self, output: TranscriptionOutput) {
        let _ = self.tx.send(AsrEvent::Interim(output));
    }

    async fn on_error(&self, error: String) {
        let _ = self.tx.send(AsrEvent::Error(error));
    }

    async fn on_close(&self) {
        let _ = self.tx.send(AsrEvent::Closed);
    }
}

enum Outcome {
    Reconnect,
    Finished,
}

/// Per-connection forwarding state
#[derive(Default)]
struct ConnectionState {
    /// Frames forwarded to the ASR but not yet covered by a final
    covered: Vec<EntryId>,
    /// Session-relative offset of the first frame on this connection
    offset_s: Option<f64>,
    /// An END sentinel has been seen; draining remaining finals
    ending: bool,
    end_id: Option<EntryId>,
}

/// Streaming transcription worker for one session
pub struct StreamingTranscriptionWorker {
    log: Arc<dyn DurableLogPort>,
    metadata: Arc<dyn MetadataStorePort>,
    asr: Arc<dyn TranscriptionServicePort>,
    session: Session,
    config: PipelineConfig,
    asr_config: TranscriptionConfig,
    cancel: CancellationToken,
}

impl StreamingTranscriptionWorker {
    pub fn new(
        log: Arc<dyn DurableLogPort>,
        metadata: Arc<dyn MetadataStorePort>,
        asr: Arc<dyn TranscriptionServicePort>,
        session: Session,
        config: PipelineConfig,
        asr_config: TranscriptionConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            log,
            metadata,
            asr,
            session,
            config,
            asr_config,
            cancel,
        }
    }

    pub async fn run(self) -> Result<()> {
        let stream = audio_stream_key(&self.session.client_id);
        let consumer = format!("stt-{}", self.session.session_id);

        let mut failures: u32 = 0;
        let mut backoff = self.config.reconnect_initial;
        let mut error_surfaced = false;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let (tx, mut rx) = mpsc::unbounded_channel();
            let asr_session = self
                .asr
                .start_streaming(&self.asr_config, Box::new(ChannelCallback { tx }))
                .await;

            let mut asr_session = match asr_session {
                Ok(session) => session,
                Err(e) => {
                    failures += 1;
                    log::warn!(
                        "ASR connect failed for session {} (attempt {}): {}",
                        self.session.session_id,
                        failures,
                        e
                    );
                    if failures >= self.config.failure_threshold && !error_surfaced {
                        // Parked: no reads, no acks; the speech detector
                        // surfaces the error to the transport layer.
                        self.metadata
                            .set_transcription_error(
                                &self.session.session_id,
                                Some(&e.to_string()),
                            )
                            .await?;
                        error_surfaced = true;
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = std::cmp::min(backoff * 2, self.config.reconnect_cap);
                    continue;
                }
            };

            if error_surfaced {
                self.metadata
                    .set_transcription_error(&self.session.session_id, None)
                    .await?;
                error_surfaced = false;
            }
            failures = 0;
            backoff = self.config.reconnect_initial;

            match self
                .run_connection(&mut asr_session, &mut rx, &stream, &consumer)
                .await?
            {
                Outcome::Finished => {
                    log::info!(
                        "Streaming transcription finished for session {}",
                        self.session.session_id
                    );
                    return Ok(());
                }
                Outcome::Reconnect => {
                    failures += 1;
                    if failures >= self.config.failure_threshold && !error_surfaced {
                        self.metadata
                            .set_transcription_error(
                                &self.session.session_id,
                                Some("streaming transcription keeps disconnecting"),
                            )
                            .await?;
                        error_surfaced = true;
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = std::cmp::min(backoff * 2, self.config.reconnect_cap);
                }
            }
        }
    }

    async fn run_connection(
        &self,
        asr_session: &mut Box<dyn StreamingSession>,
        rx: &mut mpsc::UnboundedReceiver<AsrEvent>,
        stream: &str,
        consumer: &str,
    ) -> Result<Outcome> {
        let mut state = ConnectionState::default();

        // Entries delivered to a previous incarnation but never acked are
        // replayed into the fresh connection first.
        let reclaimed = self
            .log
            .claim_idle(stream, STREAMING_GROUP, consumer, self.config.claim_idle_after)
            .await?;
        for record in reclaimed {
            if !self.forward(record, asr_session, stream, &mut state).await? {
                return Ok(Outcome::Reconnect);
            }
            if let Some(outcome) = self
                .drain_events(rx, asr_session, stream, consumer, &mut state)
                .await?
            {
                return Ok(outcome);
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                let _ = asr_session.close().await;
                return Ok(Outcome::Finished);
            }

            if let Some(outcome) = self
                .drain_events(rx, asr_session, stream, consumer, &mut state)
                .await?
            {
                return Ok(outcome);
            }

            if state.ending {
                // No more reads; wait for the provider to flush and close
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        let _ = asr_session.close().await;
                        return Ok(Outcome::Finished);
                    }
                    event = rx.recv() => {
                        let event = event.unwrap_or(AsrEvent::Closed);
                        if let Some(outcome) = self
                            .handle_event(event, asr_session, stream, consumer, &mut state)
                            .await?
                        {
                            return Ok(outcome);
                        }
                    }
                }
            } else {
                let batch = self
                    .log
                    .read_group(
                        stream,
                        STREAMING_GROUP,
                        consumer,
                        self.config.read_count,
                        self.config.read_block,
                    )
                    .await?;
                for record in batch {
                    if !self.forward(record, asr_session, stream, &mut state).await? {
                        return Ok(Outcome::Reconnect);
                    }
                    // Finals that landed while forwarding must ack their
                    // exact span before more frames widen it.
                    if let Some(outcome) = self
                        .drain_events(rx, asr_session, stream, consumer, &mut state)
                        .await?
                    {
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    /// Process every queued ASR event without blocking
    async fn drain_events(
        &self,
        rx: &mut mpsc::UnboundedReceiver<AsrEvent>,
        asr_session: &mut Box<dyn StreamingSession>,
        stream: &str,
        consumer: &str,
        state: &mut ConnectionState,
    ) -> Result<Option<Outcome>> {
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    if let Some(outcome) = self
                        .handle_event(event, asr_session, stream, consumer, state)
                        .await?
                    {
                        return Ok(Some(outcome));
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return Ok(None),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return self
                        .handle_event(AsrEvent::Closed, asr_session, stream, consumer, state)
                        .await;
                }
            }
        }
    }

    async fn handle_event(
        &self,
        event: AsrEvent,
        asr_session: &mut Box<dyn StreamingSession>,
        stream: &str,
        consumer: &str,
        state: &mut ConnectionState,
    ) -> Result<Option<Outcome>> {
        match event {
            AsrEvent::Interim(output) => {
                self.publish_interim(output).await;
                Ok(None)
            }
            AsrEvent::Final(output) => {
                self.handle_final(output, stream, state).await?;
                Ok(None)
            }
            AsrEvent::Error(message) => {
                log::warn!(
                    "ASR stream error for session {}: {}",
                    self.session.session_id,
                    message
                );
                let _ = asr_session.close().await;
                Ok(Some(Outcome::Reconnect))
            }
            AsrEvent::Closed => {
                if !state.ending {
                    let _ = asr_session.close().await;
                    return Ok(Some(Outcome::Reconnect));
                }
                // Drained: trailing frames with no final (silence) are
                // acked, the sentinel last.
                if !state.covered.is_empty() {
                    self.log.ack(stream, STREAMING_GROUP, &state.covered).await?;
                    state.covered.clear();
                }
                if let Some(id) = state.end_id {
                    self.log.ack(stream, STREAMING_GROUP, &[id]).await?;
                }
                let _ = asr_session.close().await;
                self.log
                    .remove_consumer(stream, STREAMING_GROUP, consumer)
                    .await?;
                Ok(Some(Outcome::Finished))
            }
        }
    }

    /// Push one log record into the ASR connection. Returns false when the
    /// connection is broken and a reconnect is needed; the record stays
    /// pending and will be claimed back.
    async fn forward(
        &self,
        record: LogRecord,
        asr_session: &mut Box<dyn StreamingSession>,
        stream: &str,
        state: &mut ConnectionState,
    ) -> Result<bool> {
        match record.payload {
            StreamPayload::Frame { seq, pcm } => {
                if state.offset_s.is_none() {
                    state.offset_s = Some(frame_offset_secs(seq));
                }
                if let Err(e) = asr_session.send_audio(&pcm).await {
                    log::warn!(
                        "Failed to forward frame for session {}: {}",
                        self.session.session_id,
                        e
                    );
                    return Ok(false);
                }
                state.covered.push(record.id);
            }
            StreamPayload::End => {
                state.ending = true;
                state.end_id = Some(record.id);
                if let Err(e) = asr_session.finish().await {
                    log::warn!(
                        "Failed to half-close ASR stream for session {}: {}",
                        self.session.session_id,
                        e
                    );
                    return Ok(false);
                }
            }
            StreamPayload::Chunk(_) => {
                log::warn!("Unexpected transcript chunk on audio stream {}", stream);
                self.log.ack(stream, STREAMING_GROUP, &[record.id]).await?;
            }
        }
        Ok(true)
    }

    /// A final result covers everything forwarded since the previous final:
    /// append it to the result stream, then ack the covered entries.
    async fn handle_final(
        &self,
        mut output: TranscriptionOutput,
        stream: &str,
        state: &mut ConnectionState,
    ) -> Result<()> {
        let Some(chunk_id) = state.covered.last().copied() else {
            log::debug!(
                "Dropping final with no covered entries for session {}",
                self.session.session_id
            );
            return Ok(());
        };
        output.shift_timestamps(state.offset_s.unwrap_or(0.0));

        let chunk = TranscriptChunk {
            chunk_id,
            session_id: self.session.session_id.clone(),
            provider: self.asr.provider_name().to_string(),
            text: output.text,
            confidence: output.confidence,
            words: output.words,
            segments: output.segments,
        };
        self.append_result(chunk).await?;
        self.log.ack(stream, STREAMING_GROUP, &state.covered).await?;
        state.covered.clear();
        Ok(())
    }

    async fn publish_interim(&self, output: TranscriptionOutput) {
        let channel = interim_channel_key(&self.session.session_id);
        if let Ok(json) = serde_json::to_string(&output) {
            // Ephemeral channel: delivery is best-effort
            let _ = self.log.publish(&channel, &json).await;
        }
    }

    async fn append_result(&self, chunk: TranscriptChunk) -> Result<EntryId> {
        let results = results_stream_key(&self.session.session_id);
        retry_with_backoff(3, Duration::from_millis(200), Duration::from_secs(2), |_| {
            let payload = StreamPayload::Chunk(chunk.clone());
            let results = results.clone();
            async move { self.log.append(&results, payload).await }
        })
        .await
        .map_err(|e| AppError::LogWrite(e.to_string()))
    }
}
