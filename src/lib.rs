//! Ambient Scribe
//!
//! Audio ingestion and conversation lifecycle core for wearable clients:
//! a producer fragments inbound audio into a durable per-client stream,
//! independent consumer groups transcribe and persist it, and
//! session-scoped jobs carve the stream into conversations and drive the
//! post-conversation pipeline (speakers, memories, summaries, events).
//!
//! The transport layer (sockets, uploads, auth) lives outside this crate
//! and talks to the [`pipeline::AudioProducer`] API.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod ports;
pub mod utils;
