//! Parakeet transcription service adapter
//!
//! Implements the TranscriptionServicePort for a self-hosted Parakeet ASR
//! service. Batch-only: raw PCM in, one JSON result out.

use crate::domain::models::{SpeakerSegment, WordTiming};
use crate::error::{AppError, Result};
use crate::ports::transcription::{
    StreamingSession, StreamingTranscriptionCallback, TranscriptionConfig, TranscriptionOutput,
    TranscriptionServicePort,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Parakeet service implementation
pub struct ParakeetService {
    client: Client,
    base_url: String,
}

impl ParakeetService {
    /// Create a new Parakeet service pointed at a self-hosted instance
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TranscriptionServicePort for ParakeetService {
    async fn transcribe_batch(
        &self,
        pcm: &[u8],
        sample_rate_hz: u32,
        config: &TranscriptionConfig,
    ) -> Result<TranscriptionOutput> {
        let mut url = format!(
            "{}/v1/transcribe?sample_rate={}",
            self.base_url, sample_rate_hz
        );
        if let Some(lang) = &config.language {
            url.push_str(&format!("&language={}", lang));
        }

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/octet-stream")
            .body(pcm.to_vec())
            .send()
            .await
            .map_err(|e| AppError::AsrTransient(format!("Parakeet request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::AsrTransient(format!(
                "Parakeet API error ({}): {}",
                status, error_text
            )));
        }

        let parakeet: ParakeetResponse = response.json().await.map_err(|e| {
            AppError::AsrTransient(format!("Failed to parse Parakeet response: {}", e))
        })?;

        Ok(TranscriptionOutput {
            text: parakeet.text,
            words: parakeet
                .words
                .into_iter()
                .map(|w| WordTiming {
                    word: w.word,
                    start_s: w.start,
                    end_s: w.end,
                    confidence: w.confidence,
                })
                .collect(),
            segments: parakeet
                .segments
                .into_iter()
                .map(|s| SpeakerSegment {
                    speaker: s.speaker,
                    start_s: s.start,
                    end_s: s.end,
                    text: s.text,
                })
                .collect(),
            confidence: parakeet.confidence,
        })
    }

    async fn start_streaming(
        &self,
        _config: &TranscriptionConfig,
        _callback: Box<dyn StreamingTranscriptionCallback>,
    ) -> Result<Box<dyn StreamingSession>> {
        Err(AppError::AsrPersistent(
            "parakeet does not support streaming transcription".to_string(),
        ))
    }

    fn provider_name(&self) -> &str {
        "parakeet"
    }
}

// ===== API Response Types =====

#[derive(Debug, Deserialize)]
struct ParakeetResponse {
    text: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    words: Vec<ParakeetWord>,
    #[serde(default)]
    segments: Vec<ParakeetSegment>,
}

#[derive(Debug, Deserialize)]
struct ParakeetWord {
    word: String,
    start: f64,
    end: f64,
    #[serde(default)]
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct ParakeetSegment {
    speaker: Option<String>,
    start: f64,
    end: f64,
    text: String,
}
