/// Conversation store port trait
///
/// Defines the interface for the conversation document store.
/// Implementation: SQLite adapter
use crate::domain::models::{
    Conversation, ConversationStatus, EndReason, SpeakerSegment, TranscriptVersion,
};
use crate::error::Result;
use async_trait::async_trait;

/// Port trait for conversation documents
///
/// The conversation job is the single writer of lifecycle fields; the
/// post-conversation jobs write disjoint fields through the targeted methods
/// below so concurrent jobs never clobber each other.
#[async_trait]
pub trait ConversationStorePort: Send + Sync {
    /// Create a new conversation document
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Get a conversation by id
    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// List conversations, newest first, optionally filtered by user
    async fn list_conversations(
        &self,
        user_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>>;

    /// Update the lifecycle status
    async fn update_status(&self, conversation_id: &str, status: ConversationStatus) -> Result<()>;

    /// Enter the finalizing state, recording the triggering condition so a
    /// restarted job can resume with the same end reason
    async fn begin_finalizing(&self, conversation_id: &str, end_reason: EndReason) -> Result<()>;

    /// Store a transcript version, optionally making it the active one
    async fn add_transcript_version(
        &self,
        conversation_id: &str,
        version_id: &str,
        version: &TranscriptVersion,
        set_active: bool,
    ) -> Result<()>;

    /// Replace the segments of one transcript version with speaker-labelled
    /// segments (speaker recognition output)
    async fn set_segment_speakers(
        &self,
        conversation_id: &str,
        version_id: &str,
        segments: &[SpeakerSegment],
    ) -> Result<()>;

    /// Write title and summaries
    async fn set_summaries(
        &self,
        conversation_id: &str,
        title: &str,
        summary: &str,
        detailed_summary: &str,
    ) -> Result<()>;

    /// Close a conversation: status, audio path, end reason, completion time
    async fn finalize_conversation(
        &self,
        conversation_id: &str,
        audio_path: Option<&str>,
        end_reason: EndReason,
        completed_at: i64,
    ) -> Result<()>;

    /// Close a conversation as deleted with the given reason
    async fn mark_deleted(&self, conversation_id: &str, end_reason: EndReason) -> Result<()>;

    /// Record a post-conversation job failure without touching sibling fields.
    /// `job` is one of "speaker_recognition", "memory_extraction",
    /// "title_summary", "event_dispatch".
    async fn set_job_error(&self, conversation_id: &str, job: &str, message: &str) -> Result<()>;
}
