/// Transcription service port trait
///
/// Defines the interface for ASR (Automatic Speech Recognition) services.
/// Implementations: Deepgram (batch + streaming), Parakeet (batch)
use crate::domain::models::{SpeakerSegment, WordTiming, SAMPLE_RATE_HZ};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for a transcription request or streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Model to use (provider-specific)
    pub model: Option<String>,

    /// Language code (e.g., "en", "es", "fr")
    pub language: Option<String>,

    /// Sample rate of the raw PCM being submitted
    pub sample_rate_hz: u32,

    /// Enable punctuation in the output
    pub punctuate: bool,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: None,
            language: Some("en".to_string()),
            sample_rate_hz: SAMPLE_RATE_HZ,
            punctuate: true,
        }
    }
}

/// One transcription result as produced by a provider.
///
/// Timestamps are relative to the start of the submitted audio (batch) or the
/// start of the connection (streaming); callers shift them to session time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionOutput {
    pub text: String,
    pub words: Vec<WordTiming>,
    pub segments: Vec<SpeakerSegment>,
    pub confidence: f32,
}

impl TranscriptionOutput {
    /// Shift all word and segment timestamps by `offset_s` (to session time)
    pub fn shift_timestamps(&mut self, offset_s: f64) {
        for word in &mut self.words {
            word.start_s += offset_s;
            word.end_s += offset_s;
        }
        for segment in &mut self.segments {
            segment.start_s += offset_s;
            segment.end_s += offset_s;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Callback trait for streaming transcription events
#[async_trait]
pub trait StreamingTranscriptionCallback: Send + Sync {
    /// Called when a final transcript is received
    async fn on_final(&self, output: TranscriptionOutput);

    /// Called when an interim (partial) transcript is received.
    /// Interim transcripts are not final and may change.
    async fn on_interim(&self, output: TranscriptionOutput);

    /// Called when the stream encounters an error
    async fn on_error(&self, error: String);

    /// Called when the stream is closed
    async fn on_close(&self);
}

/// Handle for an active streaming transcription session
#[async_trait]
pub trait StreamingSession: Send + Sync {
    /// Send a chunk of raw PCM matching the session's configured format
    async fn send_audio(&mut self, pcm: &[u8]) -> Result<()>;

    /// Half-close the send side; the provider flushes remaining finals and
    /// then closes the stream
    async fn finish(&mut self) -> Result<()>;

    /// Tear the session down
    async fn close(&mut self) -> Result<()>;

    /// Check if the session is still active
    fn is_active(&self) -> bool;
}

/// Port trait for transcription services (ASR)
#[async_trait]
pub trait TranscriptionServicePort: Send + Sync {
    /// Transcribe a buffer of raw PCM (batch mode)
    async fn transcribe_batch(
        &self,
        pcm: &[u8],
        sample_rate_hz: u32,
        config: &TranscriptionConfig,
    ) -> Result<TranscriptionOutput>;

    /// Start a streaming transcription session (real-time mode)
    async fn start_streaming(
        &self,
        config: &TranscriptionConfig,
        callback: Box<dyn StreamingTranscriptionCallback>,
    ) -> Result<Box<dyn StreamingSession>>;

    /// Get the provider name
    fn provider_name(&self) -> &str;

    /// Check if streaming is supported by this provider
    fn supports_streaming(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_timestamps() {
        let mut output = TranscriptionOutput {
            text: "hi there".to_string(),
            words: vec![WordTiming {
                word: "hi".to_string(),
                start_s: 0.5,
                end_s: 1.0,
                confidence: 0.9,
            }],
            segments: vec![SpeakerSegment {
                speaker: None,
                start_s: 0.5,
                end_s: 2.0,
                text: "hi there".to_string(),
            }],
            confidence: 0.9,
        };
        output.shift_timestamps(10.0);
        assert_eq!(output.words[0].start_s, 10.5);
        assert_eq!(output.segments[0].end_s, 12.0);
    }
}
