//! Speaker recognition service adapter
//!
//! Posts conversation audio plus segments to the external recognition
//! service as multipart form data and maps the labelled segments back.

use crate::domain::models::SpeakerSegment;
use crate::error::{AppError, Result};
use crate::ports::speaker::SpeakerRecognitionPort;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// HTTP client for the speaker recognition service
pub struct SpeakerServiceClient {
    client: Client,
    base_url: Option<String>,
}

impl SpeakerServiceClient {
    /// `base_url = None` disables the stage entirely
    pub fn new(base_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }
}

#[async_trait]
impl SpeakerRecognitionPort for SpeakerServiceClient {
    async fn identify(
        &self,
        audio_path: &str,
        segments: &[SpeakerSegment],
    ) -> Result<Vec<SpeakerSegment>> {
        let base_url = self.base_url.as_deref().ok_or_else(|| {
            AppError::SpeakerRecognition("speaker recognition is not configured".to_string())
        })?;

        let audio = tokio::fs::read(audio_path).await.map_err(|e| {
            AppError::SpeakerRecognition(format!("Failed to read {}: {}", audio_path, e))
        })?;
        let file_name = Path::new(audio_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());
        let segments_json = serde_json::to_string(segments)?;

        let form = Form::new()
            .part(
                "file",
                Part::bytes(audio)
                    .file_name(file_name)
                    .mime_str("audio/wav")
                    .map_err(|e| AppError::SpeakerRecognition(e.to_string()))?,
            )
            .text("segments", segments_json);

        let response = self
            .client
            .post(format!("{}/v1/identify", base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                AppError::SpeakerRecognition(format!("Speaker service request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::SpeakerRecognition(format!(
                "Speaker service error ({}): {}",
                status, error_text
            )));
        }

        let identified: IdentifyResponse = response.json().await.map_err(|e| {
            AppError::SpeakerRecognition(format!("Failed to parse speaker response: {}", e))
        })?;

        Ok(identified
            .segments
            .into_iter()
            .map(|s| SpeakerSegment {
                speaker: s.speaker,
                start_s: s.start_s,
                end_s: s.end_s,
                text: s.text,
            })
            .collect())
    }

    fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }
}

// ===== API Response Types =====

#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    segments: Vec<IdentifiedSegment>,
}

#[derive(Debug, Deserialize)]
struct IdentifiedSegment {
    speaker: Option<String>,
    start_s: f64,
    end_s: f64,
    text: String,
    #[serde(default)]
    #[allow(dead_code)]
    embedding_id: Option<String>,
}
