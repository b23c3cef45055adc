/// Domain models for Ambient Scribe
///
/// These models represent core business entities and are platform-agnostic.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// All audio in the system is 16 kHz / 16-bit / mono PCM.
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Canonical frame size: 0.25 s of PCM, 8000 bytes.
pub const BYTES_PER_FRAME: usize = 8_000;

/// Duration of one frame in seconds.
pub const FRAME_DURATION_SECS: f64 = 0.25;

/// Session-relative start offset of a frame, derived from its sequence number.
pub fn frame_offset_secs(seq: u64) -> f64 {
    seq as f64 * FRAME_DURATION_SECS
}

/// Identifier assigned by the durable log to each entry.
///
/// A millisecond clock plus a tiebreaker sequence, formatted `"{ms}-{seq}"`.
/// Ids are monotonic per stream and order lexicographically the same way they
/// order numerically, so they double as cursor values (`"0-0"` is the origin).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    pub const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Parse the `"{ms}-{seq}"` wire form.
    pub fn parse(s: &str) -> Option<Self> {
        let (ms, seq) = s.split_once('-')?;
        Some(Self {
            ms: ms.parse().ok()?,
            seq: seq.parse().ok()?,
        })
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl Serialize for EntryId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EntryId::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid entry id: {}", s)))
    }
}

/// Lifecycle of a client session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Finalizing,
    Complete,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Finalizing => write!(f, "finalizing"),
            SessionStatus::Complete => write!(f, "complete"),
        }
    }
}

/// Which transcription path a session uses, selected at init
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionMode {
    Streaming,
    Batch,
}

impl FromStr for TranscriptionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "streaming" => Ok(TranscriptionMode::Streaming),
            "batch" => Ok(TranscriptionMode::Batch),
            other => Err(format!("unknown transcription mode: {}", other)),
        }
    }
}

/// One continuous connection from one client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub client_id: String,
    pub provider: String,
    pub mode: TranscriptionMode,
    pub status: SessionStatus,
    pub frame_count: u64,
    pub conversation_count: u32,
    pub transcription_error: Option<String>,
    pub persistence_error: Option<String>,
    pub transport_disconnected: bool,
    pub stop_requested: bool,
    pub created_at: i64, // Unix timestamp
}

impl Session {
    /// Creates a new active session
    pub fn new(
        session_id: String,
        user_id: String,
        client_id: String,
        provider: String,
        mode: TranscriptionMode,
    ) -> Self {
        Self {
            session_id,
            user_id,
            client_id,
            provider,
            mode,
            status: SessionStatus::Active,
            frame_count: 0,
            conversation_count: 0,
            transcription_error: None,
            persistence_error: None,
            transport_disconnected: false,
            stop_requested: false,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// One word with session-relative timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start_s: f64,
    pub end_s: f64,
    pub confidence: f32,
}

/// A contiguous span of speech attributed to one speaker (or none)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerSegment {
    pub speaker: Option<String>,
    pub start_s: f64,
    pub end_s: f64,
    pub text: String,
}

/// One transcription result for a contiguous span of the audio log.
///
/// `chunk_id` is the log id of the last audio entry the result covers; it is
/// both the correlation key back into the audio stream and the supersession
/// key in the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub chunk_id: EntryId,
    pub session_id: String,
    pub provider: String,
    pub text: String,
    pub confidence: f32,
    pub words: Vec<WordTiming>,
    pub segments: Vec<SpeakerSegment>,
}

/// Merged view over all chunks of a session, produced by the aggregator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CombinedTranscript {
    pub text: String,
    pub words: Vec<WordTiming>,
    pub segments: Vec<SpeakerSegment>,
    pub provider: Option<String>,
    pub chunk_count: usize,
}

impl CombinedTranscript {
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Span covered by word-level activity, in seconds
    pub fn duration_secs(&self) -> f64 {
        match (self.words.first(), self.words.last()) {
            (Some(first), Some(last)) => (last.end_s - first.start_s).max(0.0),
            _ => 0.0,
        }
    }

    pub fn mean_confidence(&self) -> f32 {
        if self.words.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.words.iter().map(|w| w.confidence).sum();
        sum / self.words.len() as f32
    }
}

/// Predicate deciding whether a transcript amounts to meaningful speech.
///
/// Used both to open a conversation and to re-check it at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechCriteria {
    pub min_words: usize,
    pub min_duration_secs: f64,
    pub min_mean_confidence: f32,
    /// When non-empty, at least one segment must carry one of these labels
    pub required_speakers: Vec<String>,
}

impl Default for SpeechCriteria {
    fn default() -> Self {
        Self {
            min_words: 10,
            min_duration_secs: 5.0,
            min_mean_confidence: 0.5,
            required_speakers: Vec::new(),
        }
    }
}

impl SpeechCriteria {
    pub fn is_met(&self, transcript: &CombinedTranscript) -> bool {
        if transcript.word_count() <= self.min_words {
            return false;
        }
        if transcript.duration_secs() < self.min_duration_secs {
            return false;
        }
        if transcript.mean_confidence() < self.min_mean_confidence {
            return false;
        }
        if !self.required_speakers.is_empty() {
            let enrolled = transcript.segments.iter().any(|seg| {
                seg.speaker
                    .as_deref()
                    .map(|label| self.required_speakers.iter().any(|s| s == label))
                    .unwrap_or(false)
            });
            if !enrolled {
                return false;
            }
        }
        true
    }
}

/// Why a conversation ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    UserStopped,
    InactivityTimeout,
    TransportDisconnect,
    NoMeaningfulSpeech,
    AudioFileNotReady,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::UserStopped => write!(f, "user_stopped"),
            EndReason::InactivityTimeout => write!(f, "inactivity_timeout"),
            EndReason::TransportDisconnect => write!(f, "transport_disconnect"),
            EndReason::NoMeaningfulSpeech => write!(f, "no_meaningful_speech"),
            EndReason::AudioFileNotReady => write!(f, "audio_file_not_ready"),
        }
    }
}

impl FromStr for EndReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user_stopped" => Ok(EndReason::UserStopped),
            "inactivity_timeout" => Ok(EndReason::InactivityTimeout),
            "transport_disconnect" => Ok(EndReason::TransportDisconnect),
            "no_meaningful_speech" => Ok(EndReason::NoMeaningfulSpeech),
            "audio_file_not_ready" => Ok(EndReason::AudioFileNotReady),
            other => Err(format!("unknown end reason: {}", other)),
        }
    }
}

/// Conversation lifecycle states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Open,
    Monitoring,
    Finalizing,
    Closed,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationStatus::Open => write!(f, "open"),
            ConversationStatus::Monitoring => write!(f, "monitoring"),
            ConversationStatus::Finalizing => write!(f, "finalizing"),
            ConversationStatus::Closed => write!(f, "closed"),
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "open" => Ok(ConversationStatus::Open),
            "monitoring" => Ok(ConversationStatus::Monitoring),
            "finalizing" => Ok(ConversationStatus::Finalizing),
            "closed" => Ok(ConversationStatus::Closed),
            other => Err(format!("unknown conversation status: {}", other)),
        }
    }
}

/// One immutable snapshot of a conversation's transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptVersion {
    pub text: String,
    pub words: Vec<WordTiming>,
    pub segments: Vec<SpeakerSegment>,
    pub provider: String,
    pub processing_time_ms: u64,
    pub created_at: i64,
}

/// A finalized span of speech within a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub session_id: String,
    pub user_id: String,
    pub client_id: String,
    pub status: ConversationStatus,
    pub audio_path: Option<String>,
    pub transcript_versions: BTreeMap<String, TranscriptVersion>,
    pub active_version: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub detailed_summary: Option<String>,
    pub end_reason: Option<EndReason>,
    pub deleted: bool,
    pub speaker_error: Option<String>,
    pub memory_error: Option<String>,
    pub summary_error: Option<String>,
    pub events_error: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl Conversation {
    /// Creates a new open conversation for a session
    pub fn new(session_id: String, user_id: String, client_id: String) -> Self {
        Self {
            conversation_id: uuid::Uuid::new_v4().to_string(),
            session_id,
            user_id,
            client_id,
            status: ConversationStatus::Open,
            audio_path: None,
            transcript_versions: BTreeMap::new(),
            active_version: None,
            title: None,
            summary: None,
            detailed_summary: None,
            end_reason: None,
            deleted: false,
            speaker_error: None,
            memory_error: None,
            summary_error: None,
            events_error: None,
            created_at: chrono::Utc::now().timestamp(),
            completed_at: None,
        }
    }

    /// The transcript version pointed at by `active_version`
    pub fn active_transcript(&self) -> Option<&TranscriptVersion> {
        self.active_version
            .as_deref()
            .and_then(|v| self.transcript_versions.get(v))
    }
}
