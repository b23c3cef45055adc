/// Domain layer - core business models
///
/// These models are platform-agnostic and represent core business entities.
pub mod models;
pub mod prompts;

pub use models::{
    frame_offset_secs, CombinedTranscript, Conversation, ConversationStatus, EndReason, EntryId,
    Session, SessionStatus, SpeakerSegment, SpeechCriteria, TranscriptChunk, TranscriptVersion,
    TranscriptionMode, WordTiming, BYTES_PER_FRAME, FRAME_DURATION_SECS, SAMPLE_RATE_HZ,
};
