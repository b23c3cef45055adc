/// Batch transcription worker
///
/// Reads the same audio stream as the streaming path but in the
/// `{provider}-workers` group: frames accumulate until the batch size
/// (~7.5 s) or an END sentinel, one request goes to the batch ASR, and the
/// resulting chunk lands in the result stream with timestamps shifted by the
/// batch's session-relative start offset. Entries ack as a group after the
/// chunk is durable.
use crate::config::PipelineConfig;
use crate::domain::models::{frame_offset_secs, EntryId, Session, TranscriptChunk, SAMPLE_RATE_HZ};
use crate::error::{AppError, Result};
use crate::ports::log::{
    audio_stream_key, batch_group, results_stream_key, DurableLogPort, LogRecord, StreamPayload,
};
use crate::ports::metadata::MetadataStorePort;
use crate::ports::transcription::{TranscriptionConfig, TranscriptionOutput, TranscriptionServicePort};
use crate::utils::backoff::retry_with_backoff;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct BatchBuffer {
    ids: Vec<EntryId>,
    pcm: Vec<u8>,
    first_seq: Option<u64>,
}

impl BatchBuffer {
    fn push(&mut self, id: EntryId, seq: u64, pcm: &[u8]) {
        if self.first_seq.is_none() {
            self.first_seq = Some(seq);
        }
        self.ids.push(id);
        self.pcm.extend_from_slice(pcm);
    }

    fn reset(&mut self) {
        self.ids.clear();
        self.pcm.clear();
        self.first_seq = None;
    }
}

/// Batch transcription worker for one session
pub struct BatchTranscriptionWorker {
    log: Arc<dyn DurableLogPort>,
    metadata: Arc<dyn MetadataStorePort>,
    asr: Arc<dyn TranscriptionServicePort>,
    session: Session,
    config: PipelineConfig,
    asr_config: TranscriptionConfig,
    cancel: CancellationToken,
}

impl BatchTranscriptionWorker {
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
        let group = batch_group(self.asr.provider_name());
        let consumer = format!("batch-{}", self.session.session_id);

        let mut buffer = BatchBuffer::default();
        let mut error_surfaced = false;

        // Entries a previous incarnation left pending go through the same
        // path as fresh reads (they may include the END sentinel)
        let mut pending: Vec<LogRecord> = self
            .log
            .claim_idle(&stream, &group, &consumer, self.config.claim_idle_after)
            .await?;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let batch = if pending.is_empty() {
                self.log
                    .read_group(
                        &stream,
                        &group,
                        &consumer,
                        self.config.read_count,
                        self.config.read_block,
                    )
                    .await?
            } else {
                std::mem::take(&mut pending)
            };

            for record in batch {
                match record.payload {
                    StreamPayload::Frame { seq, pcm } => {
                        buffer.push(record.id, seq, &pcm);
                        if buffer.ids.len() >= self.config.batch_frames {
                            if !self
                                .flush(&stream, &group, &mut buffer, &mut error_surfaced)
                                .await?
                            {
                                return Ok(()); // cancelled mid-flush
                            }
                        }
                    }
                    StreamPayload::End => {
                        // Flush the partial batch regardless of size
                        if !self
                            .flush(&stream, &group, &mut buffer, &mut error_surfaced)
                            .await?
                        {
                            return Ok(());
                        }
                        self.log.ack(&stream, &group, &[record.id]).await?;
                        self.log.remove_consumer(&stream, &group, &consumer).await?;
                        log::info!(
                            "Batch transcription finished for session {}",
                            self.session.session_id
                        );
                        return Ok(());
                    }
                    StreamPayload::Chunk(_) => {
                        log::warn!("Unexpected transcript chunk on audio stream {}", stream);
                        self.log.ack(&stream, &group, &[record.id]).await?;
                    }
                }
            }
        }
    }

    /// Submit the buffered batch. Returns false when cancelled mid-retry.
    async fn flush(
        &self,
        stream: &str,
        group: &str,
        buffer: &mut BatchBuffer,
        error_surfaced: &mut bool,
    ) -> Result<bool> {
        if buffer.ids.is_empty() {
            return Ok(true);
        }

        let mut backoff = self.config.reconnect_initial;
        let mut failures: u32 = 0;
        let output = loop {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            match self
                .asr
                .transcribe_batch(&buffer.pcm, SAMPLE_RATE_HZ, &self.asr_config)
                .await
            {
                Ok(output) => {
                    if *error_surfaced {
                        self.metadata
                            .set_transcription_error(&self.session.session_id, None)
                            .await?;
                        *error_surfaced = false;
                    }
                    break output;
                }
                Err(e) => {
                    failures += 1;
                    log::warn!(
                        "Batch transcription failed for session {} (attempt {}): {}",
                        self.session.session_id,
                        failures,
                        e
                    );
                    if failures >= self.config.failure_threshold && !*error_surfaced {
                        self.metadata
                            .set_transcription_error(&self.session.session_id, Some(&e.to_string()))
                            .await?;
                        *error_surfaced = true;
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(false),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = std::cmp::min(backoff * 2, self.config.reconnect_cap);
                }
            }
        };

        self.publish_chunk(output, buffer).await?;
        self.log.ack(stream, group, &buffer.ids).await?;
        buffer.reset();
        Ok(true)
    }

    async fn publish_chunk(&self, mut output: TranscriptionOutput, buffer: &BatchBuffer) -> Result<()> {
        if output.is_empty() {
            return Ok(()); // silence batches produce no chunk
        }
        output.shift_timestamps(frame_offset_secs(buffer.first_seq.unwrap_or(0)));

        let chunk = TranscriptChunk {
            chunk_id: *buffer.ids.last().expect("non-empty batch"),
            session_id: self.session.session_id.clone(),
            provider: self.asr.provider_name().to_string(),
            text: output.text,
            confidence: output.confidence,
            words: output.words,
            segments: output.segments,
        };

        let results = results_stream_key(&self.session.session_id);
        retry_with_backoff(3, Duration::from_millis(200), Duration::from_secs(2), |_| {
            let payload = StreamPayload::Chunk(chunk.clone());
            let results = results.clone();
            async move { self.log.append(&results, payload).await }
        })
        .await
        .map_err(|e| AppError::LogWrite(e.to_string()))?;
        Ok(())
    }
}
