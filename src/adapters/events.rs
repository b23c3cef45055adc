/// Local event bus adapter
///
/// Implements EventBusPort with a broadcast channel so in-process plugin
/// hosts can subscribe to lifecycle events. Dispatch is fire-and-forget;
/// having no subscribers is not an error.
use crate::error::Result;
use crate::ports::events::{ConversationEvent, EventBusPort};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// In-process event bus
pub struct LocalEventBus {
    sender: broadcast::Sender<ConversationEvent>,
}

impl LocalEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all dispatched events
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.sender.subscribe()
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EventBusPort for LocalEventBus {
    async fn dispatch(&self, event: ConversationEvent) -> Result<()> {
        log::debug!("Dispatching event {} for {}", event.name, event.conversation_id);
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Conversation;

    #[tokio::test]
    async fn test_dispatch_reaches_subscriber() {
        let bus = LocalEventBus::default();
        let mut rx = bus.subscribe();

        let conversation = Conversation::new(
            "session".to_string(),
            "user".to_string(),
            "client".to_string(),
        );
        bus.dispatch(ConversationEvent::complete(&conversation))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "conversation.complete");
        assert_eq!(event.conversation_id, conversation.conversation_id);
    }

    #[tokio::test]
    async fn test_dispatch_without_subscribers_is_ok() {
        let bus = LocalEventBus::default();
        let conversation = Conversation::new(
            "session".to_string(),
            "user".to_string(),
            "client".to_string(),
        );
        assert!(bus
            .dispatch(ConversationEvent::complete(&conversation))
            .await
            .is_ok());
    }
}
