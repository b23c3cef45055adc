//! Vector memory store adapter
//!
//! Implements the MemoryStorePort against a Qdrant-compatible REST API.
//! Memories live in one collection per user.

use crate::error::{AppError, Result};
use crate::ports::memory::{MemoryHit, MemoryStorePort};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Qdrant-backed memory store
pub struct QdrantMemoryStore {
    client: Client,
    base_url: Option<String>,
}

impl QdrantMemoryStore {
    /// `base_url = None` disables memory extraction entirely
    pub fn new(base_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    fn collection_name(user_id: &str) -> String {
        format!("memories-{}", user_id)
    }

    fn require_url(&self) -> Result<&str> {
        self.base_url
            .as_deref()
            .ok_or_else(|| AppError::Memory("memory store is not configured".to_string()))
    }

    /// Create the user's collection if it does not exist yet
    async fn ensure_collection(&self, user_id: &str, vector_size: usize) -> Result<()> {
        let base_url = self.require_url()?;
        let name = Self::collection_name(user_id);
        let response = self
            .client
            .put(format!("{}/collections/{}", base_url, name))
            .json(&json!({
                "vectors": { "size": vector_size, "distance": "Cosine" }
            }))
            .send()
            .await
            .map_err(|e| AppError::Memory(format!("Collection create failed: {}", e)))?;

        // 409 means the collection already exists
        if !response.status().is_success() && response.status().as_u16() != 409 {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Memory(format!(
                "Collection create error ({}): {}",
                status, error_text
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MemoryStorePort for QdrantMemoryStore {
    async fn upsert(
        &self,
        user_id: &str,
        embedding: &[f32],
        metadata: serde_json::Value,
    ) -> Result<()> {
        let base_url = self.require_url()?;
        self.ensure_collection(user_id, embedding.len()).await?;

        let name = Self::collection_name(user_id);
        let response = self
            .client
            .put(format!("{}/collections/{}/points", base_url, name))
            .json(&json!({
                "points": [{
                    "id": uuid::Uuid::new_v4().to_string(),
                    "vector": embedding,
                    "payload": metadata,
                }]
            }))
            .send()
            .await
            .map_err(|e| AppError::Memory(format!("Upsert failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Memory(format!(
                "Upsert error ({}): {}",
                status, error_text
            )));
        }
        Ok(())
    }

    async fn search(&self, user_id: &str, embedding: &[f32], k: usize) -> Result<Vec<MemoryHit>> {
        let base_url = self.require_url()?;
        let name = Self::collection_name(user_id);
        let response = self
            .client
            .post(format!("{}/collections/{}/points/search", base_url, name))
            .json(&json!({
                "vector": embedding,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|e| AppError::Memory(format!("Search failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Memory(format!(
                "Search error ({}): {}",
                status, error_text
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| AppError::Memory(format!("Failed to parse search response: {}", e)))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|hit| MemoryHit {
                score: hit.score,
                metadata: hit.payload.unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }

    fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }
}

// ===== API Response Types =====

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    score: f32,
    payload: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_naming() {
        assert_eq!(
            QdrantMemoryStore::collection_name("user-7"),
            "memories-user-7"
        );
    }

    #[test]
    fn test_disabled_without_url() {
        let store = QdrantMemoryStore::new(None);
        assert!(!store.is_enabled());
    }
}
