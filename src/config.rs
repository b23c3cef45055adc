/// Environment-driven configuration
///
/// Reads all tunables from environment variables with sensible defaults.
/// A `.env` file is loaded first when present.
use crate::domain::models::{SpeechCriteria, TranscriptionMode};
use crate::error::{AppError, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// ASR provider selection and credentials
#[derive(Debug, Clone)]
pub struct AsrConfig {
    /// "deepgram" or "parakeet"
    pub provider: String,
    /// Streaming or batch path, selected per session at init
    pub mode: TranscriptionMode,
    pub api_key: String,
    pub parakeet_url: String,
    pub model: Option<String>,
    pub language: Option<String>,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            provider: "deepgram".to_string(),
            mode: TranscriptionMode::Streaming,
            api_key: String::new(),
            parakeet_url: "http://localhost:8765".to_string(),
            model: None,
            language: Some("en".to_string()),
        }
    }
}

/// Tunables of the stream pipeline (producer, consumers, persistence)
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory conversation WAV files are written to
    pub recordings_dir: PathBuf,
    /// Length cap of each audio stream (~104 min of 0.25 s frames)
    pub max_stream_len: usize,
    /// Frames per batch transcription request (~7.5 s)
    pub batch_frames: usize,
    /// Entries per consumer-group read
    pub read_count: usize,
    /// Blocking read timeout
    pub read_block: Duration,
    /// ASR reconnect backoff start
    pub reconnect_initial: Duration,
    /// ASR reconnect backoff cap
    pub reconnect_cap: Duration,
    /// Consecutive reconnect failures before the error is surfaced
    pub failure_threshold: u32,
    /// Idle threshold before pending entries are claimed from a dead worker
    pub claim_idle_after: Duration,
    /// Stream discovery scan interval
    pub scan_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from("./recordings"),
            max_stream_len: 25_000,
            batch_frames: 30,
            read_count: 16,
            read_block: Duration::from_millis(500),
            reconnect_initial: Duration::from_millis(500),
            reconnect_cap: Duration::from_secs(30),
            failure_threshold: 3,
            claim_idle_after: Duration::from_secs(30),
            scan_interval: Duration::from_secs(1),
        }
    }
}

/// Tunables of the job layer (speech detector, conversation, post pipeline)
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub poll_interval: Duration,
    pub inactivity_timeout: Duration,
    /// Bounded wait for the Audio File Binding at finalization
    pub audio_ready_timeout: Duration,
    pub detector_timeout: Duration,
    pub conversation_timeout: Duration,
    pub post_job_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_initial: Duration,
    pub retry_cap: Duration,
    pub pointer_ttl: Duration,
    pub binding_ttl: Duration,
    pub session_ttl: Duration,
    pub speech: SpeechCriteria,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            inactivity_timeout: Duration::from_secs(60),
            audio_ready_timeout: Duration::from_secs(30),
            detector_timeout: Duration::from_secs(24 * 60 * 60),
            conversation_timeout: Duration::from_secs(3 * 60 * 60),
            post_job_timeout: Duration::from_secs(10 * 60),
            retry_attempts: 3,
            retry_initial: Duration::from_millis(500),
            retry_cap: Duration::from_secs(30),
            pointer_ttl: Duration::from_secs(24 * 60 * 60),
            binding_ttl: Duration::from_secs(24 * 60 * 60),
            session_ttl: Duration::from_secs(60 * 60),
            speech: SpeechCriteria::default(),
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Durable log address (the in-process adapter ignores it)
    pub log_url: String,
    /// Metadata store address (the in-process adapter ignores it)
    pub metadata_url: String,
    pub database_path: PathBuf,
    pub asr: AsrConfig,
    pub speaker_service_url: Option<String>,
    pub memory_store_url: Option<String>,
    pub openai_api_key: String,
    pub llm_model: String,
    /// Job runner pool size
    pub job_concurrency: usize,
    pub pipeline: PipelineConfig,
    pub jobs: JobConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_url: "inprocess://".to_string(),
            metadata_url: "inprocess://".to_string(),
            database_path: PathBuf::from("./ambient-scribe.db"),
            asr: AsrConfig::default(),
            speaker_service_url: None,
            memory_store_url: None,
            openai_api_key: String::new(),
            llm_model: "gpt-4o-mini".to_string(),
            job_concurrency: 4,
            pipeline: PipelineConfig::default(),
            jobs: JobConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mode = env_string("ASR_MODE", "streaming")
            .parse::<TranscriptionMode>()
            .map_err(AppError::Config)?;

        let asr = AsrConfig {
            provider: env_string("ASR_PROVIDER", "deepgram"),
            mode,
            api_key: env_string("DEEPGRAM_API_KEY", ""),
            parakeet_url: env_string("PARAKEET_URL", "http://localhost:8765"),
            model: env_opt("ASR_MODEL"),
            language: Some(env_string("ASR_LANGUAGE", "en")),
        };

        let pipeline = PipelineConfig {
            recordings_dir: PathBuf::from(env_string("SCRIBE_RECORDINGS_DIR", "./recordings")),
            max_stream_len: env_parse("SCRIBE_MAX_STREAM_LEN", 25_000),
            batch_frames: env_parse("SCRIBE_BATCH_FRAMES", 30),
            ..PipelineConfig::default()
        };

        let speech = SpeechCriteria {
            min_words: env_parse("SPEECH_MIN_WORDS", 10),
            min_duration_secs: env_parse("SPEECH_MIN_DURATION_SECS", 5.0),
            min_mean_confidence: env_parse("SPEECH_MIN_CONFIDENCE", 0.5),
            required_speakers: env_opt("SPEECH_REQUIRED_SPEAKERS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
        };

        let jobs = JobConfig {
            inactivity_timeout: Duration::from_secs(env_parse("INACTIVITY_TIMEOUT_SECS", 60)),
            audio_ready_timeout: Duration::from_secs(env_parse("AUDIO_READY_TIMEOUT_SECS", 30)),
            speech,
            ..JobConfig::default()
        };

        Ok(Self {
            log_url: env_string("SCRIBE_LOG_URL", "inprocess://"),
            metadata_url: env_string("SCRIBE_METADATA_URL", "inprocess://"),
            database_path: PathBuf::from(env_string("SCRIBE_DB_PATH", "./ambient-scribe.db")),
            asr,
            speaker_service_url: env_opt("SPEAKER_SERVICE_URL"),
            memory_store_url: env_opt("MEMORY_STORE_URL"),
            openai_api_key: env_string("OPENAI_API_KEY", ""),
            llm_model: env_string("LLM_MODEL", "gpt-4o-mini"),
            job_concurrency: env_parse("JOB_CONCURRENCY", 4),
            pipeline,
            jobs,
        })
    }
}
