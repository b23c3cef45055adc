//! Shared harness for the end-to-end pipeline scenarios
//!
//! Wires the in-process adapters, a deterministic simulated ASR and scripted
//! external services into a running supervisor + job runner, with all timing
//! knobs shrunk so scenarios finish in milliseconds.

use ambient_scribe::adapters::log::InProcessLog;
use ambient_scribe::adapters::metadata::InProcessMetadataStore;
use ambient_scribe::adapters::storage::SqliteConversationStore;
use ambient_scribe::config::{AppConfig, JobConfig, PipelineConfig};
use ambient_scribe::domain::models::{
    SpeakerSegment, TranscriptionMode, WordTiming, BYTES_PER_FRAME, FRAME_DURATION_SECS,
};
use ambient_scribe::error::{AppError, Result};
use ambient_scribe::jobs::{JobContext, JobQueue, JobRunner};
use ambient_scribe::pipeline::{
    AudioProducer, ResultAggregator, SupervisorRoles, WorkerSupervisor,
};
use ambient_scribe::ports::events::{ConversationEvent, EventBusPort};
use ambient_scribe::ports::llm::LlmServicePort;
use ambient_scribe::ports::memory::{MemoryHit, MemoryStorePort};
use ambient_scribe::ports::speaker::SpeakerRecognitionPort;
use ambient_scribe::ports::transcription::{
    StreamingSession, StreamingTranscriptionCallback, TranscriptionConfig, TranscriptionOutput,
    TranscriptionServicePort,
};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub fn speech_frames(n: usize) -> Vec<u8> {
    vec![1u8; n * BYTES_PER_FRAME]
}

pub fn silence_frames(n: usize) -> Vec<u8> {
    vec![0u8; n * BYTES_PER_FRAME]
}

/// Deterministic ASR: every non-silent frame becomes one word timed at the
/// frame boundary. Streaming emits a final every 8 frames; an optional
/// number of initial connection attempts fail to simulate an outage.
pub struct SimAsr {
    fail_connects: AtomicU32,
}

impl SimAsr {
    pub fn new(fail_connects: u32) -> Self {
        Self {
            fail_connects: AtomicU32::new(fail_connects),
        }
    }
}

fn voiced(frame: &[u8]) -> bool {
    frame.iter().any(|b| *b != 0)
}

fn frame_word(index: u64) -> WordTiming {
    WordTiming {
        word: format!("w{}", index),
        start_s: index as f64 * FRAME_DURATION_SECS,
        end_s: (index + 1) as f64 * FRAME_DURATION_SECS,
        confidence: 0.9,
    }
}

fn output_from_words(words: Vec<WordTiming>) -> TranscriptionOutput {
    let text = words
        .iter()
        .map(|w| w.word.clone())
        .collect::<Vec<_>>()
        .join(" ");
    let segments = vec![SpeakerSegment {
        speaker: None,
        start_s: words.first().map(|w| w.start_s).unwrap_or(0.0),
        end_s: words.last().map(|w| w.end_s).unwrap_or(0.0),
        text: text.clone(),
    }];
    TranscriptionOutput {
        text,
        words,
        segments,
        confidence: 0.9,
    }
}

#[async_trait]
impl TranscriptionServicePort for SimAsr {
    async fn transcribe_batch(
        &self,
        pcm: &[u8],
        _sample_rate_hz: u32,
        _config: &TranscriptionConfig,
    ) -> Result<TranscriptionOutput> {
        let words: Vec<WordTiming> = pcm
            .chunks(BYTES_PER_FRAME)
            .enumerate()
            .filter(|(_, frame)| voiced(frame))
            .map(|(i, _)| frame_word(i as u64))
            .collect();
        if words.is_empty() {
            return Ok(TranscriptionOutput::default());
        }
        Ok(output_from_words(words))
    }

    async fn start_streaming(
        &self,
        _config: &TranscriptionConfig,
        callback: Box<dyn StreamingTranscriptionCallback>,
    ) -> Result<Box<dyn StreamingSession>> {
        if self.fail_connects.load(Ordering::SeqCst) > 0 {
            self.fail_connects.fetch_sub(1, Ordering::SeqCst);
            return Err(AppError::AsrTransient("simulated outage".to_string()));
        }
        Ok(Box::new(SimStreamingSession {
            callback,
            frames_seen: 0,
            window: Vec::new(),
            active: true,
        }))
    }

    fn provider_name(&self) -> &str {
        "sim"
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

pub struct SimStreamingSession {
    callback: Box<dyn StreamingTranscriptionCallback>,
    frames_seen: u64,
    window: Vec<WordTiming>,
    active: bool,
}

impl SimStreamingSession {
    const EMIT_EVERY: u64 = 8;

    async fn emit_final(&mut self) {
        if self.window.is_empty() {
            return;
        }
        let output = output_from_words(std::mem::take(&mut self.window));
        self.callback.on_interim(output.clone()).await;
        self.callback.on_final(output).await;
    }
}

#[async_trait]
impl StreamingSession for SimStreamingSession {
    async fn send_audio(&mut self, pcm: &[u8]) -> Result<()> {
        let index = self.frames_seen;
        self.frames_seen += 1;
        if voiced(pcm) {
            self.window.push(frame_word(index));
        }
        if self.frames_seen % Self::EMIT_EVERY == 0 {
            self.emit_final().await;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.emit_final().await;
        self.callback.on_close().await;
        self.active = false;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// Labels every segment with one enrolled speaker
pub struct SimSpeaker;

#[async_trait]
impl SpeakerRecognitionPort for SimSpeaker {
    async fn identify(
        &self,
        _audio_path: &str,
        segments: &[SpeakerSegment],
    ) -> Result<Vec<SpeakerSegment>> {
        Ok(segments
            .iter()
            .map(|s| SpeakerSegment {
                speaker: Some("speaker_0".to_string()),
                ..s.clone()
            })
            .collect())
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Pattern-matched LLM responses (jobs call it concurrently)
pub struct SimLlm;

#[async_trait]
impl LlmServicePort for SimLlm {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        if prompt.contains("Extract only facts") {
            Ok("- owner speaks daily\n- owner likes short meetings".to_string())
        } else if prompt.contains("short, specific title") {
            Ok("Recorded conversation".to_string())
        } else if prompt.contains("concise summary") {
            Ok("A short chat was recorded.".to_string())
        } else {
            Ok("- one topic\n- no follow-ups".to_string())
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; 4];
        for (i, b) in text.bytes().enumerate() {
            v[i % 4] += b as f32 / 255.0;
        }
        Ok(v)
    }

    fn provider_name(&self) -> &str {
        "sim-llm"
    }
}

#[derive(Clone, Default)]
pub struct RecordingMemory {
    pub upserts: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

#[async_trait]
impl MemoryStorePort for RecordingMemory {
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

#[derive(Clone, Default)]
pub struct RecordingEvents {
    pub events: Arc<Mutex<Vec<ConversationEvent>>>,
}

#[async_trait]
impl EventBusPort for RecordingEvents {
    async fn dispatch(&self, event: ConversationEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Running pipeline with all adapters wired
pub struct PipelineHarness {
    pub producer: AudioProducer,
    pub queue: JobQueue,
    pub log: Arc<InProcessLog>,
    pub metadata: Arc<InProcessMetadataStore>,
    pub store: Arc<SqliteConversationStore>,
    pub aggregator: ResultAggregator,
    pub memory: RecordingMemory,
    pub events: RecordingEvents,
    pub cancel: CancellationToken,
    pub recordings_dir: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

impl PipelineHarness {
    /// Total PCM bytes across every finalized recording on disk
    pub fn total_recorded_bytes(&self) -> usize {
        let mut total = 0;
        for entry in std::fs::read_dir(&self.recordings_dir).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().map_or(false, |ext| ext == "wav") {
                total += ambient_scribe::utils::wav::read_pcm(&path).unwrap().len();
            }
        }
        total
    }
}

impl Drop for PipelineHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn start_pipeline(fail_connects: u32, mode: TranscriptionMode) -> PipelineHarness {
    let dir = tempfile::tempdir().unwrap();

    let mut config = AppConfig::default();
    config.asr.provider = "sim".to_string();
    config.asr.mode = mode;
    config.pipeline = PipelineConfig {
        recordings_dir: dir.path().join("recordings"),
        read_block: Duration::from_millis(25),
        scan_interval: Duration::from_millis(20),
        reconnect_initial: Duration::from_millis(20),
        reconnect_cap: Duration::from_millis(100),
        ..PipelineConfig::default()
    };
    config.jobs = JobConfig {
        poll_interval: Duration::from_millis(10),
        inactivity_timeout: Duration::from_millis(120),
        audio_ready_timeout: Duration::from_secs(2),
        post_job_timeout: Duration::from_secs(5),
        retry_initial: Duration::from_millis(5),
        retry_cap: Duration::from_millis(20),
        ..JobConfig::default()
    };
    let config = Arc::new(config);

    let log = Arc::new(InProcessLog::default());
    let metadata = Arc::new(InProcessMetadataStore::new());
    let store = Arc::new(SqliteConversationStore::new(dir.path().join("conversations.db")).unwrap());
    store.run_migrations().unwrap();

    let asr: Arc<dyn TranscriptionServicePort> = Arc::new(SimAsr::new(fail_connects));
    let memory = RecordingMemory::default();
    let events = RecordingEvents::default();
    let cancel = CancellationToken::new();
    let aggregator = ResultAggregator::new(log.clone());
    let (queue, queue_rx) = JobQueue::new();

    let ctx = Arc::new(JobContext {
        config: config.clone(),
        log: log.clone(),
        metadata: metadata.clone(),
        store: store.clone(),
        aggregator: aggregator.clone(),
        asr: asr.clone(),
        speaker: Arc::new(SimSpeaker),
        memory: Arc::new(memory.clone()),
        llm: Arc::new(SimLlm),
        events: Arc::new(events.clone()),
        queue: queue.clone(),
        cancel: cancel.child_token(),
    });
    let runner = JobRunner::new(ctx, queue_rx, 4);
    tokio::spawn(async move {
        let _ = runner.run().await;
    });

    let supervisor = WorkerSupervisor::new(
        log.clone(),
        metadata.clone(),
        asr,
        &config,
        SupervisorRoles {
            transcription: true,
            persistence: true,
        },
        cancel.child_token(),
    );
    tokio::spawn(async move {
        let _ = supervisor.run().await;
    });

    let producer = AudioProducer::new(log.clone(), metadata.clone(), config.pipeline.clone());

    PipelineHarness {
        producer,
        queue,
        log,
        metadata,
        store,
        aggregator,
        memory,
        events,
        cancel,
        recordings_dir: config.pipeline.recordings_dir.clone(),
        _dir: dir,
    }
}

/// Poll until the condition holds or the deadline passes
pub async fn wait_until<F, Fut>(what: &str, timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
