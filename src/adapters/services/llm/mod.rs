//! LLM service adapters

pub mod openai;

pub use openai::OpenAIService;
