/// Event bus port trait
///
/// Defines the dispatch point towards the external plugin bus. The core only
/// publishes; plugin handling happens outside this crate.
use crate::domain::models::Conversation;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A lifecycle event published on the plugin bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub name: String,
    pub conversation_id: String,
    pub session_id: String,
    pub user_id: String,
    pub client_id: String,
    pub timestamp: i64,
}

impl ConversationEvent {
    /// The `conversation.complete` event for a closed conversation
    pub fn complete(conversation: &Conversation) -> Self {
        Self {
            name: "conversation.complete".to_string(),
            conversation_id: conversation.conversation_id.clone(),
            session_id: conversation.session_id.clone(),
            user_id: conversation.user_id.clone(),
            client_id: conversation.client_id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Port trait for event dispatch
#[async_trait]
pub trait EventBusPort: Send + Sync {
    /// Publish an event to the bus
    async fn dispatch(&self, event: ConversationEvent) -> Result<()>;
}
