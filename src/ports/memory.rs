/// Memory store port trait
///
/// Defines the interface for the per-user vector memory store that holds
/// facts extracted from conversations.
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One search hit from the memory store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub score: f32,
    pub metadata: serde_json::Value,
}

/// Port trait for the vector memory store
#[async_trait]
pub trait MemoryStorePort: Send + Sync {
    /// Store one embedded fact for a user
    async fn upsert(
        &self,
        user_id: &str,
        embedding: &[f32],
        metadata: serde_json::Value,
    ) -> Result<()>;

    /// Nearest-neighbour search over a user's memories
    async fn search(&self, user_id: &str, embedding: &[f32], k: usize) -> Result<Vec<MemoryHit>>;

    /// Whether the store is configured; when false extraction is skipped
    fn is_enabled(&self) -> bool;
}
