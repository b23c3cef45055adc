//! Deepgram streaming transcription implementation
//!
//! Implements real-time transcription over Deepgram's WebSocket API.
//! Reference: https://developers.deepgram.com/docs/live-streaming-audio

use crate::domain::models::{SpeakerSegment, WordTiming};
use crate::error::{AppError, Result};
use crate::ports::transcription::{
    StreamingSession, StreamingTranscriptionCallback, TranscriptionConfig, TranscriptionOutput,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEEPGRAM_STREAMING_URL: &str = "wss://api.deepgram.com/v1/listen";

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Deepgram streaming session
pub struct DeepgramStreamingSession {
    ws_sender: Arc<Mutex<Option<WsSink>>>,
    is_active: Arc<Mutex<bool>>,
    receiver_task: Option<tokio::task::JoinHandle<()>>,
}

impl DeepgramStreamingSession {
    /// Open a new streaming session
    pub async fn new(
        api_key: String,
        config: &TranscriptionConfig,
        callback: Box<dyn StreamingTranscriptionCallback>,
    ) -> Result<Self> {
        let model = config.model.as_deref().unwrap_or("nova-2");

        let mut url = format!("{}?model={}", DEEPGRAM_STREAMING_URL, model);
        url.push_str("&diarize=true&utterances=true&interim_results=true");
        if config.punctuate {
            url.push_str("&punctuate=true");
        }
        if let Some(lang) = &config.language {
            url.push_str(&format!("&language={}", lang));
        }
        url.push_str(&format!(
            "&encoding=linear16&sample_rate={}&channels=1",
            config.sample_rate_hz
        ));

        log::debug!("Connecting to Deepgram WebSocket: {}", url);

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .uri(&url)
            .header("Authorization", format!("Token {}", api_key))
            .body(())
            .map_err(|e| AppError::AsrTransient(format!("Failed to build request: {}", e)))?;

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| AppError::AsrTransient(format!("WebSocket connection failed: {}", e)))?;

        let (write, mut read) = ws_stream.split();
        let ws_sender = Arc::new(Mutex::new(Some(write)));
        let is_active = Arc::new(Mutex::new(true));

        let is_active_clone = Arc::clone(&is_active);
        let receiver_task = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<DeepgramStreamingResponse>(&text) {
                            Ok(response) => {
                                if let Some(output) = response.into_output() {
                                    if output.is_final {
                                        callback.on_final(output.output).await;
                                    } else {
                                        callback.on_interim(output.output).await;
                                    }
                                }
                            }
                            Err(e) => {
                                log::debug!("Unparsed Deepgram message: {}", e);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        *is_active_clone.lock().await = false;
                        callback.on_close().await;
                        break;
                    }
                    Err(e) => {
                        callback.on_error(e.to_string()).await;
                        *is_active_clone.lock().await = false;
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_sender,
            is_active,
            receiver_task: Some(receiver_task),
        })
    }
}

#[async_trait]
impl StreamingSession for DeepgramStreamingSession {
    async fn send_audio(&mut self, pcm: &[u8]) -> Result<()> {
        let mut sender = self.ws_sender.lock().await;
        match sender.as_mut() {
            Some(ws) => ws
                .send(Message::Binary(pcm.to_vec()))
                .await
                .map_err(|e| AppError::AsrTransient(format!("Failed to send audio: {}", e))),
            None => Err(AppError::AsrTransient(
                "WebSocket connection is closed".to_string(),
            )),
        }
    }

    async fn finish(&mut self) -> Result<()> {
        // CloseStream tells Deepgram to flush remaining finals and close;
        // the receiver task keeps draining until the server close frame.
        let mut sender = self.ws_sender.lock().await;
        if let Some(ws) = sender.as_mut() {
            ws.send(Message::Text("{\"type\":\"CloseStream\"}".to_string()))
                .await
                .map_err(|e| AppError::AsrTransient(format!("Failed to finish stream: {}", e)))?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        *self.is_active.lock().await = false;

        let mut sender = self.ws_sender.lock().await;
        if let Some(mut ws) = sender.take() {
            let _ = ws.send(Message::Close(None)).await;
            let _ = ws.close().await;
        }
        drop(sender);

        if let Some(task) = self.receiver_task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.is_active.try_lock().map(|guard| *guard).unwrap_or(false)
    }
}

impl Drop for DeepgramStreamingSession {
    fn drop(&mut self) {
        if let Some(task) = self.receiver_task.take() {
            task.abort();
        }
    }
}

// ===== Deepgram Streaming API Response Types =====

#[derive(Debug, Deserialize)]
struct DeepgramStreamingResponse {
    channel: Option<Channel>,
    is_final: Option<bool>,
    start: Option<f64>,
    duration: Option<f64>,
}

struct ParsedEvent {
    is_final: bool,
    output: TranscriptionOutput,
}

impl DeepgramStreamingResponse {
    fn into_output(self) -> Option<ParsedEvent> {
        let channel = self.channel?;
        let alternative = channel.alternatives.into_iter().next()?;
        if alternative.transcript.is_empty() {
            return None;
        }

        let words: Vec<WordTiming> = alternative
            .words
            .unwrap_or_default()
            .into_iter()
            .map(|w| WordTiming {
                word: w.word,
                start_s: w.start,
                end_s: w.end,
                confidence: w.confidence,
            })
            .collect();

        let start = self.start.unwrap_or(0.0);
        let end = start + self.duration.unwrap_or(0.0);
        let segments = vec![SpeakerSegment {
            speaker: None,
            start_s: words.first().map(|w| w.start_s).unwrap_or(start),
            end_s: words.last().map(|w| w.end_s).unwrap_or(end),
            text: alternative.transcript.clone(),
        }];

        Some(ParsedEvent {
            is_final: self.is_final.unwrap_or(false),
            output: TranscriptionOutput {
                text: alternative.transcript,
                words,
                segments,
                confidence: alternative.confidence,
            },
        })
    }
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
}

#[derive(Debug, Deserialize)]
struct Word {
    word: String,
    start: f64,
    end: f64,
    confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parsing() {
        let response: DeepgramStreamingResponse = serde_json::from_str(
            r#"{
                "is_final": true,
                "start": 1.0,
                "duration": 0.8,
                "channel": {"alternatives": [{
                    "transcript": "hello",
                    "confidence": 0.95,
                    "words": [{"word": "hello", "start": 1.1, "end": 1.6, "confidence": 0.95}]
                }]}
            }"#,
        )
        .unwrap();

        let event = response.into_output().unwrap();
        assert!(event.is_final);
        assert_eq!(event.output.text, "hello");
        assert_eq!(event.output.words.len(), 1);
    }

    #[test]
    fn test_empty_transcript_is_skipped() {
        let response: DeepgramStreamingResponse = serde_json::from_str(
            r#"{"is_final": false, "channel": {"alternatives": [{"transcript": "", "confidence": 0.0}]}}"#,
        )
        .unwrap();
        assert!(response.into_output().is_none());
    }
}
