/// Metadata store port trait
///
/// Defines the interface for session metadata and the two uni-directional
/// coordination keys: the Current-Conversation Pointer (written by the
/// conversation job, read by the persistence worker to rotate files) and the
/// Audio File Binding (written by the persistence worker, read by the
/// conversation job to finalize). Implementation: in-process metadata store.
use crate::domain::models::{Session, SessionStatus};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Port trait for session metadata and coordination keys
#[async_trait]
pub trait MetadataStorePort: Send + Sync {
    // Session metadata
    /// Create session metadata; fails if the session already exists
    async fn create_session(&self, session: &Session) -> Result<()>;

    /// Get a session by id
    async fn session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Latest session for a client (worker discovery resolves streams here)
    async fn session_for_client(&self, client_id: &str) -> Result<Option<Session>>;

    /// Update the session status
    async fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<()>;

    /// Set or clear the transcription error surfaced to the transport layer
    async fn set_transcription_error(&self, session_id: &str, error: Option<&str>) -> Result<()>;

    /// Set or clear the persistence error surfaced to the transport layer
    async fn set_persistence_error(&self, session_id: &str, error: Option<&str>) -> Result<()>;

    /// Record that the transport connection dropped without an END
    async fn set_transport_disconnected(&self, session_id: &str) -> Result<()>;

    /// Record an explicit stop request from the transport
    async fn request_stop(&self, session_id: &str) -> Result<()>;

    /// Add produced frames to the session counter; returns the new total
    async fn add_frames(&self, session_id: &str, count: u64) -> Result<u64>;

    /// Bump the per-session conversation counter; returns the new total
    async fn bump_conversation_count(&self, session_id: &str) -> Result<u32>;

    /// Schedule the session metadata for expiry (after completion)
    async fn expire_session(&self, session_id: &str, ttl: Duration) -> Result<()>;

    // Current-Conversation Pointer
    /// Bind `session_id -> conversation_id`; this write is what causes the
    /// persistence worker to rotate files
    async fn set_current_conversation(
        &self,
        session_id: &str,
        conversation_id: &str,
        ttl: Duration,
    ) -> Result<()>;

    /// Read the pointer for a session
    async fn current_conversation(&self, session_id: &str) -> Result<Option<String>>;

    /// Re-arm the pointer TTL (called on every monitoring iteration)
    async fn extend_current_conversation(&self, session_id: &str, ttl: Duration) -> Result<()>;

    /// Clear the pointer; the persistence worker closes the open file on its
    /// next rotation check
    async fn clear_current_conversation(&self, session_id: &str) -> Result<()>;

    // Audio File Binding
    /// Record the finished WAV path for a conversation
    async fn set_audio_file(&self, conversation_id: &str, path: &str, ttl: Duration) -> Result<()>;

    /// Read the WAV path for a conversation, if the file has been closed
    async fn audio_file(&self, conversation_id: &str) -> Result<Option<String>>;
}
