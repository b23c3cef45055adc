//! Deepgram transcription service adapter
//!
//! Implements the TranscriptionServicePort for Deepgram's API.
//! Batch requests post raw linear16 PCM to /v1/listen; streaming sessions
//! live in the deepgram_streaming module.

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

const DEEPGRAM_API_BASE: &str = "https://api.deepgram.com/v1";

/// Deepgram service implementation
pub struct DeepgramService {
    client: Client,
    api_key: String,
}

impl DeepgramService {
    /// Create a new Deepgram service with the given API key
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, api_key }
    }

    fn listen_url(&self, sample_rate_hz: u32, config: &TranscriptionConfig) -> String {
        let model = config.model.as_deref().unwrap_or("nova-2");

        let mut params = vec![
            format!("model={}", model),
            "diarize=true".to_string(),
            "utterances=true".to_string(),
            "encoding=linear16".to_string(),
            format!("sample_rate={}", sample_rate_hz),
            "channels=1".to_string(),
        ];
        if config.punctuate {
            params.push("punctuate=true".to_string());
        }
        if let Some(lang) = &config.language {
            params.push(format!("language={}", lang));
        }

        format!("{}/listen?{}", DEEPGRAM_API_BASE, params.join("&"))
    }

    /// Parse a Deepgram response into our TranscriptionOutput format
    fn parse_response(&self, response: DeepgramResponse) -> Result<TranscriptionOutput> {
        let channel = response.results.channels.first().ok_or_else(|| {
            AppError::AsrTransient("No channels in Deepgram response".to_string())
        })?;
        let alternative = channel.alternatives.first().ok_or_else(|| {
            AppError::AsrTransient("No alternatives in Deepgram response".to_string())
        })?;

        let words: Vec<WordTiming> = alternative
            .words
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|w| WordTiming {
                word: w.word.clone(),
                start_s: w.start,
                end_s: w.end,
                confidence: w.confidence,
            })
            .collect();

        // Utterances carry diarization; fall back to one unlabelled segment
        let segments = if let Some(utterances) = &alternative.utterances {
            utterances
                .iter()
                .map(|u| SpeakerSegment {
                    speaker: Some(format!("Speaker {}", u.speaker)),
                    start_s: u.start,
                    end_s: u.end,
                    text: u.transcript.clone(),
                })
                .collect()
        } else if alternative.transcript.is_empty() {
            Vec::new()
        } else {
            vec![SpeakerSegment {
                speaker: None,
                start_s: 0.0,
                end_s: response.metadata.duration,
                text: alternative.transcript.clone(),
            }]
        };

        Ok(TranscriptionOutput {
            text: alternative.transcript.clone(),
            words,
            segments,
            confidence: alternative.confidence,
        })
    }
}

#[async_trait]
impl TranscriptionServicePort for DeepgramService {
    async fn transcribe_batch(
        &self,
        pcm: &[u8],
        sample_rate_hz: u32,
        config: &TranscriptionConfig,
    ) -> Result<TranscriptionOutput> {
        let url = self.listen_url(sample_rate_hz, config);
        log::debug!(
            "Transcribing {} bytes of PCM with Deepgram",
            pcm.len()
        );

        let response = self
            .client
            .post(&url)
            .header("authorization", format!("Token {}", self.api_key))
            .header("content-type", "application/octet-stream")
            .body(pcm.to_vec())
            .send()
            .await
            .map_err(|e| AppError::AsrTransient(format!("Deepgram request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::AsrTransient(format!(
                "Deepgram API error ({}): {}",
                status, error_text
            )));
        }

        let deepgram_response: DeepgramResponse = response.json().await.map_err(|e| {
            AppError::AsrTransient(format!("Failed to parse Deepgram response: {}", e))
        })?;

        self.parse_response(deepgram_response)
    }

    async fn start_streaming(
        &self,
        config: &TranscriptionConfig,
        callback: Box<dyn StreamingTranscriptionCallback>,
    ) -> Result<Box<dyn StreamingSession>> {
        use super::deepgram_streaming::DeepgramStreamingSession;

        let session = DeepgramStreamingSession::new(self.api_key.clone(), config, callback).await?;
        Ok(Box::new(session))
    }

    fn provider_name(&self) -> &str {
        "deepgram"
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

// ===== API Response Types =====

/// Response from /v1/listen endpoint
#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    metadata: Metadata,
    results: Results,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct Results {
    channels: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    transcript: String,
    confidence: f32,
    words: Option<Vec<Word>>,
    utterances: Option<Vec<Utterance>>,
}

#[derive(Debug, Deserialize)]
struct Word {
    word: String,
    start: f64,
    end: f64,
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct Utterance {
    transcript: String,
    start: f64,
    end: f64,
    speaker: u32,
}
