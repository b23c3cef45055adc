//! ASR (Automatic Speech Recognition) service adapters
//!
//! This module provides adapters for the supported ASR providers:
//! - Deepgram: REST API (batch) and WebSocket (streaming)
//! - Parakeet: self-hosted REST API (batch only)

pub mod deepgram;
mod deepgram_streaming;
pub mod parakeet;

pub use deepgram::DeepgramService;
pub use parakeet::ParakeetService;

use crate::config::AsrConfig;
use crate::error::{AppError, Result};
use crate::ports::transcription::TranscriptionServicePort;
use std::sync::Arc;

/// Build the transcription service selected by configuration.
///
/// The rest of the system only depends on the result-stream contract; the
/// provider choice is confined to this factory and session init.
pub fn build_transcription_service(config: &AsrConfig) -> Result<Arc<dyn TranscriptionServicePort>> {
    match config.provider.as_str() {
        "deepgram" => {
            if config.api_key.is_empty() {
                return Err(AppError::Config(
                    "Deepgram API key is not configured".to_string(),
                ));
            }
            Ok(Arc::new(DeepgramService::new(config.api_key.clone())))
        }
        "parakeet" => Ok(Arc::new(ParakeetService::new(config.parakeet_url.clone()))),
        other => Err(AppError::Config(format!("Unknown ASR provider: {}", other))),
    }
}
