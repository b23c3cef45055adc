/// Adapters - implementations of the port traits
///
/// These modules implement the port traits for concrete backends and
/// external services.
pub mod events;
pub mod log;
pub mod metadata;
pub mod services;
pub mod storage;

pub use events::LocalEventBus;
pub use log::InProcessLog;
pub use metadata::InProcessMetadataStore;
pub use services::{QdrantMemoryStore, SpeakerServiceClient};
pub use storage::SqliteConversationStore;
