/// Audio producer
///
/// The ingestion front door: accepts raw PCM from the transport layer,
/// peels off canonical fixed-size frames into the client's audio stream and
/// terminates the stream with an END sentinel. Fixed framing bounds latency
/// and makes downstream timestamping trivial (offset = seq x frame duration).
use crate::config::PipelineConfig;
use crate::domain::models::{EntryId, Session, SessionStatus, TranscriptionMode, BYTES_PER_FRAME};
use crate::error::{AppError, Result};
use crate::ports::log::{audio_stream_key, DurableLogPort, StreamPayload};
use crate::ports::metadata::MetadataStorePort;
use crate::utils::backoff::retry_with_backoff;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct ProducerSession {
    client_id: String,
    buffer: Vec<u8>,
    next_seq: u64,
    finalized: bool,
}

/// Per-process producer state. One instance lives in the transport process;
/// per-session operations serialize behind the session's mutex so append and
/// end cannot interleave.
pub struct AudioProducer {
    log: Arc<dyn DurableLogPort>,
    metadata: Arc<dyn MetadataStorePort>,
    config: PipelineConfig,
    sessions: Mutex<HashMap<String, Arc<Mutex<ProducerSession>>>>,
}

impl AudioProducer {
    pub fn new(
        log: Arc<dyn DurableLogPort>,
        metadata: Arc<dyn MetadataStorePort>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            log,
            metadata,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session and allocate its rolling buffer.
    ///
    /// Idempotent for an existing active session with the same owner; any
    /// other collision is a conflict.
    pub async fn init_session(
        &self,
        session_id: &str,
        user_id: &str,
        client_id: &str,
        provider: &str,
        mode: TranscriptionMode,
    ) -> Result<()> {
        if let Some(existing) = self.metadata.session(session_id).await? {
            if existing.status != SessionStatus::Active || existing.user_id != user_id {
                return Err(AppError::SessionConflict(session_id.to_string()));
            }
        } else {
            let session = Session::new(
                session_id.to_string(),
                user_id.to_string(),
                client_id.to_string(),
                provider.to_string(),
                mode,
            );
            self.metadata.create_session(&session).await?;
        }

        let mut sessions = self.sessions.lock().await;
        sessions.entry(session_id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(ProducerSession {
                client_id: client_id.to_string(),
                buffer: Vec::with_capacity(2 * BYTES_PER_FRAME),
                next_seq: 0,
                finalized: false,
            }))
        });
        log::info!("Session {} initialized for client {}", session_id, client_id);
        Ok(())
    }

    /// Append raw audio; returns the log ids of the frames actually written.
    /// A trailing partial frame stays buffered until more bytes arrive or
    /// the session ends.
    pub async fn append(&self, session_id: &str, bytes: &[u8]) -> Result<Vec<EntryId>> {
        let handle = self.session_handle(session_id).await?;
        let mut session = handle.lock().await;
        if session.finalized {
            return Err(AppError::SessionFinalized(session_id.to_string()));
        }

        session.buffer.extend_from_slice(bytes);
        let stream = audio_stream_key(&session.client_id);

        let mut ids = Vec::new();
        while session.buffer.len() >= BYTES_PER_FRAME {
            let pcm: Vec<u8> = session.buffer.drain(..BYTES_PER_FRAME).collect();
            let seq = session.next_seq;
            let id = self.append_frame(&stream, seq, pcm).await?;
            session.next_seq += 1;
            ids.push(id);
        }

        if !ids.is_empty() {
            self.log
                .trim(&stream, self.config.max_stream_len)
                .await
                .map_err(|e| AppError::LogWrite(e.to_string()))?;
            self.metadata
                .add_frames(session_id, ids.len() as u64)
                .await?;
        }
        Ok(ids)
    }

    /// Flush any partial frame (zero-padded), append the END sentinel and
    /// mark the session finalizing. Subsequent appends fail.
    pub async fn end(&self, session_id: &str) -> Result<()> {
        let handle = self.session_handle(session_id).await?;
        let mut session = handle.lock().await;
        if session.finalized {
            return Ok(());
        }

        let stream = audio_stream_key(&session.client_id);
        if !session.buffer.is_empty() {
            let mut pcm = std::mem::take(&mut session.buffer);
            pcm.resize(BYTES_PER_FRAME, 0);
            let seq = session.next_seq;
            self.append_frame(&stream, seq, pcm).await?;
            session.next_seq += 1;
            self.metadata.add_frames(session_id, 1).await?;
        }

        self.log
            .append(&stream, StreamPayload::End)
            .await
            .map_err(|e| AppError::LogWrite(e.to_string()))?;
        self.metadata
            .set_session_status(session_id, SessionStatus::Finalizing)
            .await?;
        session.finalized = true;
        log::info!("Session {} ended after {} frames", session_id, session.next_seq);
        Ok(())
    }

    /// Transport-level disconnect without an END control frame: flag the
    /// session and terminate its stream so consumers can drain and exit.
    pub async fn mark_disconnected(&self, session_id: &str) -> Result<()> {
        self.metadata.set_transport_disconnected(session_id).await?;
        self.end(session_id).await
    }

    /// Explicit stop request from the transport
    pub async fn request_stop(&self, session_id: &str) -> Result<()> {
        self.metadata.request_stop(session_id).await
    }

    async fn session_handle(&self, session_id: &str) -> Result<Arc<Mutex<ProducerSession>>> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::SessionMissing(session_id.to_string()))
    }

    async fn append_frame(&self, stream: &str, seq: u64, pcm: Vec<u8>) -> Result<EntryId> {
        retry_with_backoff(
            3,
            Duration::from_millis(100),
            Duration::from_secs(1),
            |_| {
                let payload = StreamPayload::Frame {
                    seq,
                    pcm: pcm.clone(),
                };
                async move { self.log.append(stream, payload).await }
            },
        )
        .await
        .map_err(|e| AppError::LogWrite(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::log::InProcessLog;
    use crate::adapters::metadata::InProcessMetadataStore;

    fn producer() -> (AudioProducer, Arc<InProcessLog>, Arc<InProcessMetadataStore>) {
        let log = Arc::new(InProcessLog::default());
        let metadata = Arc::new(InProcessMetadataStore::new());
        let producer = AudioProducer::new(
            log.clone(),
            metadata.clone(),
            PipelineConfig::default(),
        );
        (producer, log, metadata)
    }

    async fn init(producer: &AudioProducer) {
        producer
            .init_session("s1", "user-1", "c1", "deepgram", TranscriptionMode::Streaming)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_framing_peels_whole_frames() {
        let (producer, log, metadata) = producer();
        init(&producer).await;

        // One and a half frames: one entry written, half a frame buffered
        let ids = producer
            .append("s1", &vec![7u8; BYTES_PER_FRAME + BYTES_PER_FRAME / 2])
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(log.stream_len("audio.stream.c1").await.unwrap(), 1);

        // The other half completes the second frame
        let ids = producer
            .append("s1", &vec![7u8; BYTES_PER_FRAME / 2])
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(log.stream_len("audio.stream.c1").await.unwrap(), 2);

        let session = metadata.session("s1").await.unwrap().unwrap();
        assert_eq!(session.frame_count, 2);
    }

    #[tokio::test]
    async fn test_end_pads_partial_and_appends_sentinel() {
        let (producer, log, _) = producer();
        init(&producer).await;

        producer.append("s1", &vec![9u8; 100]).await.unwrap();
        producer.end("s1").await.unwrap();

        let records = log.range_after("audio.stream.c1", None, 10).await.unwrap();
        assert_eq!(records.len(), 2);
        match &records[0].payload {
            StreamPayload::Frame { pcm, seq } => {
                assert_eq!(*seq, 0);
                assert_eq!(pcm.len(), BYTES_PER_FRAME);
                assert_eq!(pcm[99], 9);
                assert_eq!(pcm[100], 0);
            }
            other => panic!("expected frame, got {:?}", other),
        }
        assert!(records[1].payload.is_end());
    }

    #[tokio::test]
    async fn test_append_after_end_fails() {
        let (producer, _, _) = producer();
        init(&producer).await;
        producer.end("s1").await.unwrap();

        let err = producer.append("s1", &[0u8; 10]).await.unwrap_err();
        assert!(matches!(err, AppError::SessionFinalized(_)));

        // end is idempotent
        producer.end("s1").await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_session_fails() {
        let (producer, _, _) = producer();
        let err = producer.append("ghost", &[0u8; 10]).await.unwrap_err();
        assert!(matches!(err, AppError::SessionMissing(_)));
    }

    #[tokio::test]
    async fn test_init_conflict_on_other_user() {
        let (producer, _, _) = producer();
        init(&producer).await;

        // Same owner: idempotent
        producer
            .init_session("s1", "user-1", "c1", "deepgram", TranscriptionMode::Streaming)
            .await
            .unwrap();

        // Different owner: conflict
        let err = producer
            .init_session("s1", "intruder", "c1", "deepgram", TranscriptionMode::Streaming)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionConflict(_)));
    }

    #[tokio::test]
    async fn test_disconnect_flags_and_ends() {
        let (producer, log, metadata) = producer();
        init(&producer).await;
        producer.append("s1", &vec![1u8; BYTES_PER_FRAME]).await.unwrap();

        producer.mark_disconnected("s1").await.unwrap();

        let session = metadata.session("s1").await.unwrap().unwrap();
        assert!(session.transport_disconnected);
        assert_eq!(session.status, SessionStatus::Finalizing);
        let records = log.range_after("audio.stream.c1", None, 10).await.unwrap();
        assert!(records.last().unwrap().payload.is_end());
    }
}
