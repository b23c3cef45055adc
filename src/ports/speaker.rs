/// Speaker recognition port trait
///
/// Defines the interface for the external speaker-recognition service that
/// labels transcript segments with enrolled speaker names.
use crate::domain::models::SpeakerSegment;
use crate::error::Result;
use async_trait::async_trait;

/// Port trait for speaker recognition
#[async_trait]
pub trait SpeakerRecognitionPort: Send + Sync {
    /// Post the conversation audio and its segments; returns the same
    /// segments with `speaker` populated where a match was found
    async fn identify(
        &self,
        audio_path: &str,
        segments: &[SpeakerSegment],
    ) -> Result<Vec<SpeakerSegment>>;

    /// Whether speaker recognition is configured; when false the
    /// post-conversation pipeline skips the stage entirely
    fn is_enabled(&self) -> bool;
}
