/// Port trait definitions (interfaces)
///
/// These traits define the contracts for adapters to implement.
/// Following the ports-and-adapters (hexagonal) architecture pattern.
pub mod events;
pub mod llm;
pub mod log;
pub mod memory;
pub mod metadata;
pub mod speaker;
pub mod storage;
pub mod transcription;

#[cfg(test)]
pub mod mocks;

pub use events::{ConversationEvent, EventBusPort};
pub use llm::LlmServicePort;
pub use log::{DurableLogPort, LogRecord, StreamPayload};
pub use memory::{MemoryHit, MemoryStorePort};
pub use metadata::MetadataStorePort;
pub use speaker::SpeakerRecognitionPort;
pub use storage::ConversationStorePort;
pub use transcription::{
    StreamingSession, StreamingTranscriptionCallback, TranscriptionConfig, TranscriptionOutput,
    TranscriptionServicePort,
};
