/// Post-conversation pipeline
///
/// Speaker recognition runs first; memory extraction and title/summary both
/// consume the speaker-labelled transcript and run in parallel; the
/// completion event goes out last. Every stage retries with backoff inside
/// its own hard budget, and a stage failure records its error field without
/// rolling back siblings - partial success stays observable.
use crate::domain::models::Conversation;
use crate::domain::prompts::PromptTemplates;
use crate::error::{AppError, Result};
use crate::jobs::{run_stage, JobContext};
use crate::ports::events::{ConversationEvent, EventBusPort};
use crate::ports::llm::LlmServicePort;
use crate::ports::memory::MemoryStorePort;
use crate::ports::speaker::SpeakerRecognitionPort;
use crate::ports::storage::ConversationStorePort;

pub async fn run(ctx: &JobContext, conversation_id: &str) -> Result<()> {
    let Some(conversation) = ctx.store.get_conversation(conversation_id).await? else {
        return Err(AppError::NotFound(format!(
            "conversation {}",
            conversation_id
        )));
    };
    if conversation.deleted {
        log::debug!(
            "Skipping post-processing for deleted conversation {}",
            conversation_id
        );
        return Ok(());
    }

    recognize_speakers(ctx, &conversation).await?;

    // Reload so both consumers see the speaker labels
    let Some(conversation) = ctx.store.get_conversation(conversation_id).await? else {
        return Err(AppError::NotFound(format!(
            "conversation {}",
            conversation_id
        )));
    };
    let transcript = render_transcript(&conversation);

    let (memories, summaries) = tokio::join!(
        extract_memories(ctx, &conversation, &transcript),
        generate_summaries(ctx, &conversation, &transcript),
    );
    if let Err(e) = memories {
        log::error!("Memory extraction failed for {}: {}", conversation_id, e);
        ctx.store
            .set_job_error(conversation_id, "memory_extraction", &e.to_string())
            .await?;
    }
    if let Err(e) = summaries {
        log::error!("Title/summary failed for {}: {}", conversation_id, e);
        ctx.store
            .set_job_error(conversation_id, "title_summary", &e.to_string())
            .await?;
    }

    dispatch_complete(ctx, conversation_id).await
}

/// Optional stage: label segments with enrolled speaker names
async fn recognize_speakers(ctx: &JobContext, conversation: &Conversation) -> Result<()> {
    if !ctx.speaker.is_enabled() {
        return Ok(());
    }
    let (Some(version_id), Some(version), Some(audio_path)) = (
        conversation.active_version.clone(),
        conversation.active_transcript(),
        conversation.audio_path.clone(),
    ) else {
        return Ok(());
    };
    let segments = version.segments.clone();

    let result = run_stage(&ctx.config.jobs, |_| {
        let audio_path = audio_path.clone();
        let segments = segments.clone();
        async move { ctx.speaker.identify(&audio_path, &segments).await }
    })
    .await;

    match result {
        Ok(labelled) => {
            ctx.store
                .set_segment_speakers(&conversation.conversation_id, &version_id, &labelled)
                .await
        }
        Err(e) => {
            log::error!(
                "Speaker recognition failed for {}: {}",
                conversation.conversation_id,
                e
            );
            ctx.store
                .set_job_error(
                    &conversation.conversation_id,
                    "speaker_recognition",
                    &e.to_string(),
                )
                .await
        }
    }
}

/// Speaker-labelled transcript rendering fed to the LLM stages
fn render_transcript(conversation: &Conversation) -> String {
    match conversation.active_transcript() {
        Some(version) if !version.segments.is_empty() => version
            .segments
            .iter()
            .map(|s| {
                format!(
                    "{}: {}",
                    s.speaker.as_deref().unwrap_or("Unknown"),
                    s.text.trim()
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(version) => version.text.clone(),
        None => String::new(),
    }
}

/// Extract durable facts and upsert them into the user's vector memory
async fn extract_memories(
    ctx: &JobContext,
    conversation: &Conversation,
    transcript: &str,
) -> Result<usize> {
    if !ctx.memory.is_enabled() || transcript.is_empty() {
        return Ok(0);
    }

    let prompt = PromptTemplates::render(PromptTemplates::memory_facts(), transcript);
    let raw = run_stage(&ctx.config.jobs, |_| {
        let prompt = prompt.clone();
        async move { ctx.llm.complete(&prompt, 1000).await }
    })
    .await?;

    let facts: Vec<String> = raw
        .lines()
        .filter_map(|line| line.trim().strip_prefix("- ").map(str::to_string))
        .filter(|fact| !fact.is_empty())
        .collect();

    let mut stored = 0;
    for fact in facts {
        let embedding = ctx.llm.embed(&fact).await?;
        ctx.memory
            .upsert(
                &conversation.user_id,
                &embedding,
                serde_json::json!({
                    "fact": fact,
                    "conversation_id": conversation.conversation_id,
                    "created_at": chrono::Utc::now().timestamp(),
                }),
            )
            .await?;
        stored += 1;
    }
    log::info!(
        "Stored {} memories for user {} from conversation {}",
        stored,
        conversation.user_id,
        conversation.conversation_id
    );
    Ok(stored)
}

/// Title, short summary and detailed summary in one stage
async fn generate_summaries(
    ctx: &JobContext,
    conversation: &Conversation,
    transcript: &str,
) -> Result<()> {
    if transcript.is_empty() {
        return Ok(());
    }

    let (title, summary, detailed) = run_stage(&ctx.config.jobs, |_| {
        let transcript = transcript.to_string();
        async move {
            let title = ctx
                .llm
                .complete(&PromptTemplates::render(PromptTemplates::title(), &transcript), 60)
                .await?;
            let summary = ctx
                .llm
                .complete(
                    &PromptTemplates::render(PromptTemplates::summary(), &transcript),
                    400,
                )
                .await?;
            let detailed = ctx
                .llm
                .complete(
                    &PromptTemplates::render(PromptTemplates::detailed_summary(), &transcript),
                    1200,
                )
                .await?;
            Ok((title, summary, detailed))
        }
    })
    .await?;

    ctx.store
        .set_summaries(
            &conversation.conversation_id,
            title.trim(),
            summary.trim(),
            detailed.trim(),
        )
        .await
}

async fn dispatch_complete(ctx: &JobContext, conversation_id: &str) -> Result<()> {
    let Some(conversation) = ctx.store.get_conversation(conversation_id).await? else {
        return Err(AppError::NotFound(format!(
            "conversation {}",
            conversation_id
        )));
    };

    let result = run_stage(&ctx.config.jobs, |_| {
        let event = ConversationEvent::complete(&conversation);
        async move { ctx.events.dispatch(event).await }
    })
    .await;

    if let Err(e) = result {
        log::error!("Event dispatch failed for {}: {}", conversation_id, e);
        ctx.store
            .set_job_error(conversation_id, "event_dispatch", &e.to_string())
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EndReason, SpeakerSegment, TranscriptVersion, WordTiming};
    use crate::jobs::testutil::harness;
    use crate::ports::mocks::MockLlm;

    async fn closed_conversation(h: &crate::jobs::testutil::TestHarness) -> Conversation {
        let conversation = Conversation::new(
            "s1".to_string(),
            "user-1".to_string(),
            "c1".to_string(),
        );
        h.ctx.store.create_conversation(&conversation).await.unwrap();
        h.ctx
            .store
            .add_transcript_version(
                &conversation.conversation_id,
                "v1",
                &TranscriptVersion {
                    text: "we should meet on friday".to_string(),
                    words: vec![WordTiming {
                        word: "we".to_string(),
                        start_s: 0.0,
                        end_s: 0.3,
                        confidence: 0.9,
                    }],
                    segments: vec![SpeakerSegment {
                        speaker: None,
                        start_s: 0.0,
                        end_s: 4.0,
                        text: "we should meet on friday".to_string(),
                    }],
                    provider: "deepgram".to_string(),
                    processing_time_ms: 10,
                    created_at: 0,
                },
                true,
            )
            .await
            .unwrap();
        h.ctx
            .store
            .finalize_conversation(
                &conversation.conversation_id,
                Some("/tmp/conv.wav"),
                EndReason::UserStopped,
                1,
            )
            .await
            .unwrap();
        conversation
    }

    fn scripted_llm() -> MockLlm {
        MockLlm::new()
            .respond_when("Extract only facts", "- user meets fridays\n- user plans ahead")
            .respond_when("short, specific title", "Friday planning")
            .respond_when("concise summary", "They agreed to meet on Friday.")
            .respond_when("detailed summary", "- Agreed on Friday\n- No blockers")
    }

    #[tokio::test]
    async fn test_full_pipeline_success() {
        let h = harness(scripted_llm(), true);
        let conversation = closed_conversation(&h).await;

        run(&h.ctx, &conversation.conversation_id).await.unwrap();

        let updated = h
            .ctx
            .store
            .get_conversation(&conversation.conversation_id)
            .await
            .unwrap()
            .unwrap();
        // Speaker labels flowed into the stored segments
        assert_eq!(
            updated.transcript_versions["v1"].segments[0]
                .speaker
                .as_deref(),
            Some("alice")
        );
        assert_eq!(updated.title.as_deref(), Some("Friday planning"));
        assert_eq!(
            updated.summary.as_deref(),
            Some("They agreed to meet on Friday.")
        );
        assert!(updated.detailed_summary.is_some());
        assert!(updated.speaker_error.is_none());
        assert!(updated.memory_error.is_none());
        assert!(updated.summary_error.is_none());

        // Two facts upserted for the owner
        let upserts = h.memory.upserts.lock().unwrap();
        assert_eq!(upserts.len(), 2);
        assert_eq!(upserts[0].0, "user-1");

        // Exactly one completion event
        let events = h.events.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "conversation.complete");
    }

    #[tokio::test]
    async fn test_llm_failure_records_errors_but_event_fires() {
        // No scripted responses: both LLM stages fail
        let h = harness(MockLlm::new(), false);
        let conversation = closed_conversation(&h).await;

        run(&h.ctx, &conversation.conversation_id).await.unwrap();

        let updated = h
            .ctx
            .store
            .get_conversation(&conversation.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert!(updated.memory_error.is_some());
        assert!(updated.summary_error.is_some());
        assert!(updated.title.is_none());

        // Sibling failures do not stop the completion event
        assert_eq!(h.events.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_conversation_is_skipped() {
        let h = harness(scripted_llm(), true);
        let conversation = Conversation::new(
            "s1".to_string(),
            "user-1".to_string(),
            "c1".to_string(),
        );
        h.ctx.store.create_conversation(&conversation).await.unwrap();
        h.ctx
            .store
            .mark_deleted(&conversation.conversation_id, EndReason::NoMeaningfulSpeech)
            .await
            .unwrap();

        run(&h.ctx, &conversation.conversation_id).await.unwrap();

        assert!(h.events.events.lock().unwrap().is_empty());
        assert!(h.memory.upserts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_render_transcript_prefers_segments() {
        let mut conversation = Conversation::new(
            "s1".to_string(),
            "user-1".to_string(),
            "c1".to_string(),
        );
        conversation.transcript_versions.insert(
            "v1".to_string(),
            TranscriptVersion {
                text: "flat text".to_string(),
                words: vec![],
                segments: vec![
                    SpeakerSegment {
                        speaker: Some("alice".to_string()),
                        start_s: 0.0,
                        end_s: 1.0,
                        text: "hello".to_string(),
                    },
                    SpeakerSegment {
                        speaker: None,
                        start_s: 1.0,
                        end_s: 2.0,
                        text: "hi".to_string(),
                    },
                ],
                provider: "deepgram".to_string(),
                processing_time_ms: 0,
                created_at: 0,
            },
        );
        conversation.active_version = Some("v1".to_string());

        assert_eq!(render_transcript(&conversation), "alice: hello\nUnknown: hi");
    }
}
