/// Full-audio transcription job
///
/// Batch path for uploaded files: reads the conversation's WAV from disk,
/// runs batch ASR over the whole recording and stores the result as a new
/// active transcript version, then reruns the post-conversation pipeline
/// with that version as input.
use crate::domain::models::{TranscriptVersion, SAMPLE_RATE_HZ};
use crate::error::{AppError, Result};
use crate::jobs::{post_processing, run_stage, JobContext};
use crate::ports::storage::ConversationStorePort;
use crate::ports::transcription::{TranscriptionConfig, TranscriptionServicePort};
use crate::utils::wav;
use std::time::Instant;

pub async fn run(ctx: &JobContext, conversation_id: &str) -> Result<()> {
    let Some(conversation) = ctx.store.get_conversation(conversation_id).await? else {
        return Err(AppError::NotFound(format!(
            "conversation {}",
            conversation_id
        )));
    };
    let Some(audio_path) = conversation.audio_path.clone() else {
        return Err(AppError::InvalidInput(format!(
            "conversation {} has no audio file",
            conversation_id
        )));
    };

    let started = Instant::now();
    let pcm = {
        let audio_path = audio_path.clone();
        tokio::task::spawn_blocking(move || wav::read_pcm(&audio_path))
            .await
            .map_err(|e| AppError::Other(format!("read task failed: {}", e)))??
    };
    log::info!(
        "Transcribing {} ({} bytes) for conversation {}",
        audio_path,
        pcm.len(),
        conversation_id
    );

    let asr_config = TranscriptionConfig {
        model: ctx.config.asr.model.clone(),
        language: ctx.config.asr.language.clone(),
        ..TranscriptionConfig::default()
    };
    let output = run_stage(&ctx.config.jobs, |_| {
        let pcm = &pcm;
        let asr_config = &asr_config;
        async move {
            ctx.asr
                .transcribe_batch(pcm, SAMPLE_RATE_HZ, asr_config)
                .await
        }
    })
    .await?;

    let version_id = format!("v{}", conversation.transcript_versions.len() + 1);
    let version = TranscriptVersion {
        text: output.text,
        words: output.words,
        segments: output.segments,
        provider: ctx.asr.provider_name().to_string(),
        processing_time_ms: started.elapsed().as_millis() as u64,
        created_at: chrono::Utc::now().timestamp(),
    };
    ctx.store
        .add_transcript_version(conversation_id, &version_id, &version, true)
        .await?;
    log::info!(
        "Stored transcript version {} for conversation {}",
        version_id,
        conversation_id
    );

    post_processing::run(ctx, conversation_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Conversation, EndReason, BYTES_PER_FRAME};
    use crate::jobs::testutil::harness;
    use crate::ports::mocks::MockLlm;
    use crate::utils::wav::WavSink;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_writes_new_version_and_runs_pipeline() {
        let dir = tempdir().unwrap();
        let wav_path = dir.path().join("upload.wav");
        let mut sink = WavSink::create(&wav_path).unwrap();
        sink.append_pcm(&vec![5u8; BYTES_PER_FRAME]).unwrap();
        sink.finalize().unwrap();

        let llm = MockLlm::new()
            .respond_when("Extract only facts", "none")
            .respond_when("short, specific title", "Upload")
            .respond_when("concise summary", "An uploaded recording.")
            .respond_when("detailed summary", "- uploaded");
        let h = harness(llm, false);

        let conversation = Conversation::new(
            "s1".to_string(),
            "user-1".to_string(),
            "c1".to_string(),
        );
        h.ctx.store.create_conversation(&conversation).await.unwrap();
        h.ctx
            .store
            .finalize_conversation(
                &conversation.conversation_id,
                Some(&wav_path.to_string_lossy()),
                EndReason::UserStopped,
                1,
            )
            .await
            .unwrap();

        run(&h.ctx, &conversation.conversation_id).await.unwrap();

        let updated = h
            .ctx
            .store
            .get_conversation(&conversation.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.active_version.as_deref(), Some("v1"));
        assert_eq!(
            updated.transcript_versions["v1"].text,
            "transcribed from file"
        );
        assert_eq!(updated.title.as_deref(), Some("Upload"));
        assert_eq!(h.events.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_audio_is_invalid() {
        let h = harness(MockLlm::new(), false);
        let conversation = Conversation::new(
            "s1".to_string(),
            "user-1".to_string(),
            "c1".to_string(),
        );
        h.ctx.store.create_conversation(&conversation).await.unwrap();

        let err = run(&h.ctx, &conversation.conversation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
