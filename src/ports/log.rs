/// Durable log port trait
///
/// Defines the interface for the append-only audio/result streams with
/// consumer-group semantics, plus the best-effort interim pub/sub channel.
/// Implementation: in-process log adapter.
use crate::domain::models::{EntryId, TranscriptChunk};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

/// Prefix of all per-client audio streams
pub const AUDIO_STREAM_PREFIX: &str = "audio.stream.";

/// Consumer group of the streaming transcription path
pub const STREAMING_GROUP: &str = "streaming-transcription";

/// Consumer group of the audio persistence path
pub const PERSISTENCE_GROUP: &str = "audio-persistence";

/// Name of the audio stream for a client
pub fn audio_stream_key(client_id: &str) -> String {
    format!("{}{}", AUDIO_STREAM_PREFIX, client_id)
}

/// Name of the transcript result stream for a session
pub fn results_stream_key(session_id: &str) -> String {
    format!("transcript.results.{}", session_id)
}

/// Name of the ephemeral interim channel for a session
pub fn interim_channel_key(session_id: &str) -> String {
    format!("transcript.interim.{}", session_id)
}

/// Consumer group of a batch transcription provider
pub fn batch_group(provider: &str) -> String {
    format!("{}-workers", provider)
}

/// Payload carried by one log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamPayload {
    /// One canonical-size PCM frame with its producer-assigned sequence offset
    Frame {
        seq: u64,
        #[serde(with = "serde_bytes_base64")]
        pcm: Vec<u8>,
    },
    /// Stream terminator; carries no audio
    End,
    /// One transcription result (result streams only)
    Chunk(TranscriptChunk),
}

impl StreamPayload {
    pub fn is_end(&self) -> bool {
        matches!(self, StreamPayload::End)
    }
}

/// PCM payloads cross process boundaries as base64 in networked adapters
mod serde_bytes_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// One delivered log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: EntryId,
    pub payload: StreamPayload,
}

/// Port trait for the durable log: append-only per-stream entries,
/// consumer groups with explicit ack, idle claim, bounded trim)
#[async_trait]
pub trait DurableLogPort: Send + Sync {
    /// Append one entry; returns once the entry is durable
    async fn append(&self, stream: &str, payload: StreamPayload) -> Result<EntryId>;

    /// Read the next unread entries for `consumer` within `group`, blocking
    /// up to `block` when the stream is empty. Groups are created on first
    /// use. Delivered entries stay pending until acked.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<LogRecord>>;

    /// Acknowledge processed entries for a group
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<()>;

    /// Take over pending entries, reassigning them to `consumer`. Entries
    /// already owned by `consumer` (a restarted worker reclaiming its own
    /// in-flight reads) come back immediately; entries owned by another
    /// consumer only after they have been idle for `min_idle`.
    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Vec<LogRecord>>;

    /// Bound the stream to `max_len` entries. Prefers evicting entries every
    /// group has acked; waits briefly for consumers to catch up before
    /// force-evicting the oldest. Returns the number of entries removed.
    async fn trim(&self, stream: &str, max_len: usize) -> Result<usize>;

    /// Read entries after `after` in id order, without group bookkeeping
    async fn range_after(
        &self,
        stream: &str,
        after: Option<EntryId>,
        count: usize,
    ) -> Result<Vec<LogRecord>>;

    /// Number of entries currently in the stream
    async fn stream_len(&self, stream: &str) -> Result<usize>;

    /// Number of delivered-but-unacked entries for a group
    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize>;

    /// Delete a stream wholesale (result streams on conversation close)
    async fn delete_stream(&self, stream: &str) -> Result<()>;

    /// Remove a consumer from a group once its stream has ended
    async fn remove_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<()>;

    /// List stream names with the given prefix (worker discovery scan)
    async fn list_streams(&self, prefix: &str) -> Result<Vec<String>>;

    /// Publish to an ephemeral channel, best-effort; returns receiver count
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    /// Subscribe to an ephemeral channel
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;
}
