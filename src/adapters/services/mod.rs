//! External service adapters (ASR, speaker recognition, memory, LLM)

pub mod asr;
pub mod llm;
pub mod memory;
pub mod speaker;

pub use memory::QdrantMemoryStore;
pub use speaker::SpeakerServiceClient;
