//! Mock implementations for testing

use crate::domain::models::{
    Conversation, ConversationStatus, EndReason, SpeakerSegment, TranscriptVersion,
};
use crate::error::{AppError, Result};
use crate::ports::events::{ConversationEvent, EventBusPort};
use crate::ports::llm::LlmServicePort;
use crate::ports::memory::{MemoryHit, MemoryStorePort};
use crate::ports::speaker::SpeakerRecognitionPort;
use crate::ports::storage::ConversationStorePort;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock conversation store for testing
#[derive(Clone, Default)]
pub struct MockConversationStore {
    conversations: Arc<Mutex<HashMap<String, Conversation>>>,
}

impl MockConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_conversation<T>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut Conversation) -> T,
    ) -> Result<T> {
        let mut conversations = self.conversations.lock().unwrap();
        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| AppError::NotFound(format!("conversation {}", conversation_id)))?;
        Ok(f(conversation))
    }
}

#[async_trait]
impl ConversationStorePort for MockConversationStore {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.conversation_id.clone(), conversation.clone());
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned())
    }

    async fn list_conversations(
        &self,
        user_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>> {
        let conversations = self.conversations.lock().unwrap();
        let mut list: Vec<_> = conversations
            .values()
            .filter(|c| user_id.map_or(true, |u| c.user_id == u))
            .cloned()
            .collect();
        list.sort_by_key(|c| -c.created_at);
        Ok(list
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn update_status(&self, conversation_id: &str, status: ConversationStatus) -> Result<()> {
        self.with_conversation(conversation_id, |c| c.status = status)
    }

    async fn begin_finalizing(&self, conversation_id: &str, end_reason: EndReason) -> Result<()> {
        self.with_conversation(conversation_id, |c| {
            c.status = ConversationStatus::Finalizing;
            c.end_reason = Some(end_reason);
        })
    }

    async fn add_transcript_version(
        &self,
        conversation_id: &str,
        version_id: &str,
        version: &TranscriptVersion,
        set_active: bool,
    ) -> Result<()> {
        self.with_conversation(conversation_id, |c| {
            c.transcript_versions
                .insert(version_id.to_string(), version.clone());
            if set_active {
                c.active_version = Some(version_id.to_string());
            }
        })
    }

    async fn set_segment_speakers(
        &self,
        conversation_id: &str,
        version_id: &str,
        segments: &[SpeakerSegment],
    ) -> Result<()> {
        self.with_conversation(conversation_id, |c| {
            if let Some(version) = c.transcript_versions.get_mut(version_id) {
                version.segments = segments.to_vec();
            }
        })
    }

    async fn set_summaries(
        &self,
        conversation_id: &str,
        title: &str,
        summary: &str,
        detailed_summary: &str,
    ) -> Result<()> {
        self.with_conversation(conversation_id, |c| {
            c.title = Some(title.to_string());
            c.summary = Some(summary.to_string());
            c.detailed_summary = Some(detailed_summary.to_string());
        })
    }

    async fn finalize_conversation(
        &self,
        conversation_id: &str,
        audio_path: Option<&str>,
        end_reason: EndReason,
        completed_at: i64,
    ) -> Result<()> {
        self.with_conversation(conversation_id, |c| {
            c.status = ConversationStatus::Closed;
            c.audio_path = audio_path.map(|p| p.to_string());
            c.end_reason = Some(end_reason);
            c.completed_at = Some(completed_at);
        })
    }

    async fn mark_deleted(&self, conversation_id: &str, end_reason: EndReason) -> Result<()> {
        self.with_conversation(conversation_id, |c| {
            c.status = ConversationStatus::Closed;
            c.deleted = true;
            c.end_reason = Some(end_reason);
            c.completed_at = Some(chrono::Utc::now().timestamp());
        })
    }

    async fn set_job_error(&self, conversation_id: &str, job: &str, message: &str) -> Result<()> {
        self.with_conversation(conversation_id, |c| match job {
            "speaker_recognition" => c.speaker_error = Some(message.to_string()),
            "memory_extraction" => c.memory_error = Some(message.to_string()),
            "title_summary" => c.summary_error = Some(message.to_string()),
            _ => c.events_error = Some(message.to_string()),
        })
    }
}

/// Mock LLM answering by prompt pattern (jobs call it concurrently, so
/// ordered scripting would race)
#[derive(Clone, Default)]
pub struct MockLlm {
    rules: Arc<Mutex<Vec<(String, String)>>>,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with `response` to any prompt containing `pattern`
    pub fn respond_when(self, pattern: &str, response: &str) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), response.to_string()));
        self
    }
}

#[async_trait]
impl LlmServicePort for MockLlm {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| prompt.contains(pattern))
            .map(|(_, response)| response.clone())
            .ok_or_else(|| AppError::Llm("no scripted response for prompt".to_string()))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // Deterministic toy embedding: byte sum in a few buckets
        let mut v = vec![0.0f32; 4];
        for (i, b) in text.bytes().enumerate() {
            v[i % 4] += b as f32 / 255.0;
        }
        Ok(v)
    }

    fn provider_name(&self) -> &str {
        "mock-llm"
    }
}

/// Mock speaker recognition assigning a fixed label to every segment
#[derive(Clone)]
pub struct MockSpeakerRecognition {
    pub label: String,
    pub enabled: bool,
}

#[async_trait]
impl SpeakerRecognitionPort for MockSpeakerRecognition {
    async fn identify(
        &self,
        _audio_path: &str,
        segments: &[SpeakerSegment],
    ) -> Result<Vec<SpeakerSegment>> {
        Ok(segments
            .iter()
            .map(|s| SpeakerSegment {
                speaker: Some(self.label.clone()),
                ..s.clone()
            })
            .collect())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Mock memory store recording every upsert
#[derive(Clone, Default)]
pub struct MockMemoryStore {
    pub upserts: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

#[async_trait]
impl MemoryStorePort for MockMemoryStore {
    async fn upsert(
        &self,
        user_id: &str,
        _embedding: &[f32],
        metadata: serde_json::Value,
    ) -> Result<()> {
        self.upserts
            .lock()
            .unwrap()
            .push((user_id.to_string(), metadata));
        Ok(())
    }

    async fn search(&self, _user_id: &str, _embedding: &[f32], _k: usize) -> Result<Vec<MemoryHit>> {
        Ok(Vec::new())
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Mock event bus recording dispatched events
#[derive(Clone, Default)]
pub struct MockEventBus {
    pub events: Arc<Mutex<Vec<ConversationEvent>>>,
}

#[async_trait]
impl EventBusPort for MockEventBus {
    async fn dispatch(&self, event: ConversationEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
