/// In-process metadata store adapter
///
/// Implements MetadataStorePort with session records and TTL'd string keys
/// for the Current-Conversation Pointer and the Audio File Binding. Expiry
/// is applied lazily on read.
use crate::domain::models::{Session, SessionStatus};
use crate::error::{AppError, Result};
use crate::ports::metadata::MetadataStorePort;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct SessionRecord {
    session: Session,
    expires_at: Option<Instant>,
}

struct KeyRecord {
    value: String,
    expires_at: Option<Instant>,
}

impl KeyRecord {
    fn expired(&self) -> bool {
        self.expires_at.map_or(false, |t| Instant::now() >= t)
    }
}

fn pointer_key(session_id: &str) -> String {
    format!("conversation.current.{}", session_id)
}

fn audio_file_key(conversation_id: &str) -> String {
    format!("audio.file.{}", conversation_id)
}

/// In-process implementation of the metadata store
#[derive(Default)]
pub struct InProcessMetadataStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    client_index: Mutex<HashMap<String, String>>,
    keys: Mutex<HashMap<String, KeyRecord>>,
}

impl InProcessMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T> {
        let mut sessions = self.sessions.lock().unwrap();
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::SessionMissing(session_id.to_string()))?;
        Ok(f(&mut record.session))
    }

    fn get_key(&self, key: &str) -> Option<String> {
        let mut keys = self.keys.lock().unwrap();
        match keys.get(key) {
            Some(record) if record.expired() => {
                keys.remove(key);
                None
            }
            Some(record) => Some(record.value.clone()),
            None => None,
        }
    }

    fn set_key(&self, key: String, value: String, ttl: Duration) {
        self.keys.lock().unwrap().insert(
            key,
            KeyRecord {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }
}

#[async_trait]
impl MetadataStorePort for InProcessMetadataStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(&session.session_id) {
            return Err(AppError::SessionConflict(session.session_id.clone()));
        }
        sessions.insert(
            session.session_id.clone(),
            SessionRecord {
                session: session.clone(),
                expires_at: None,
            },
        );
        self.client_index
            .lock()
            .unwrap()
            .insert(session.client_id.clone(), session.session_id.clone());
        Ok(())
    }

    async fn session(&self, session_id: &str) -> Result<Option<Session>> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get(session_id) {
            Some(record) if record.expires_at.map_or(false, |t| Instant::now() >= t) => {
                sessions.remove(session_id);
                Ok(None)
            }
            Some(record) => Ok(Some(record.session.clone())),
            None => Ok(None),
        }
    }

    async fn session_for_client(&self, client_id: &str) -> Result<Option<Session>> {
        let session_id = {
            let index = self.client_index.lock().unwrap();
            index.get(client_id).cloned()
        };
        match session_id {
            Some(id) => self.session(&id).await,
            None => Ok(None),
        }
    }

    async fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        self.with_session(session_id, |s| s.status = status)
    }

    async fn set_transcription_error(&self, session_id: &str, error: Option<&str>) -> Result<()> {
        self.with_session(session_id, |s| {
            s.transcription_error = error.map(|e| e.to_string())
        })
    }

    async fn set_persistence_error(&self, session_id: &str, error: Option<&str>) -> Result<()> {
        self.with_session(session_id, |s| {
            s.persistence_error = error.map(|e| e.to_string())
        })
    }

    async fn set_transport_disconnected(&self, session_id: &str) -> Result<()> {
        self.with_session(session_id, |s| s.transport_disconnected = true)
    }

    async fn request_stop(&self, session_id: &str) -> Result<()> {
        self.with_session(session_id, |s| s.stop_requested = true)
    }

    async fn add_frames(&self, session_id: &str, count: u64) -> Result<u64> {
        self.with_session(session_id, |s| {
            s.frame_count += count;
            s.frame_count
        })
    }

    async fn bump_conversation_count(&self, session_id: &str) -> Result<u32> {
        self.with_session(session_id, |s| {
            s.conversation_count += 1;
            s.conversation_count
        })
    }

    async fn expire_session(&self, session_id: &str, ttl: Duration) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::SessionMissing(session_id.to_string()))?;
        record.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn set_current_conversation(
        &self,
        session_id: &str,
        conversation_id: &str,
        ttl: Duration,
    ) -> Result<()> {
        self.set_key(pointer_key(session_id), conversation_id.to_string(), ttl);
        Ok(())
    }

    async fn current_conversation(&self, session_id: &str) -> Result<Option<String>> {
        Ok(self.get_key(&pointer_key(session_id)))
    }

    async fn extend_current_conversation(&self, session_id: &str, ttl: Duration) -> Result<()> {
        let mut keys = self.keys.lock().unwrap();
        if let Some(record) = keys.get_mut(&pointer_key(session_id)) {
            if !record.expired() {
                record.expires_at = Some(Instant::now() + ttl);
            }
        }
        Ok(())
    }

    async fn clear_current_conversation(&self, session_id: &str) -> Result<()> {
        self.keys.lock().unwrap().remove(&pointer_key(session_id));
        Ok(())
    }

    async fn set_audio_file(&self, conversation_id: &str, path: &str, ttl: Duration) -> Result<()> {
        self.set_key(audio_file_key(conversation_id), path.to_string(), ttl);
        Ok(())
    }

    async fn audio_file(&self, conversation_id: &str) -> Result<Option<String>> {
        Ok(self.get_key(&audio_file_key(conversation_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TranscriptionMode;

    fn session(id: &str, client: &str) -> Session {
        Session::new(
            id.to_string(),
            "user-1".to_string(),
            client.to_string(),
            "deepgram".to_string(),
            TranscriptionMode::Streaming,
        )
    }

    #[tokio::test]
    async fn test_session_crud() {
        let store = InProcessMetadataStore::new();
        store.create_session(&session("s1", "c1")).await.unwrap();

        assert!(store.session("s1").await.unwrap().is_some());
        assert!(store
            .create_session(&session("s1", "c1"))
            .await
            .is_err());

        let by_client = store.session_for_client("c1").await.unwrap().unwrap();
        assert_eq!(by_client.session_id, "s1");

        store
            .set_session_status("s1", SessionStatus::Finalizing)
            .await
            .unwrap();
        assert_eq!(
            store.session("s1").await.unwrap().unwrap().status,
            SessionStatus::Finalizing
        );

        assert_eq!(store.add_frames("s1", 3).await.unwrap(), 3);
        assert_eq!(store.add_frames("s1", 2).await.unwrap(), 5);
        assert_eq!(store.bump_conversation_count("s1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_session_expiry() {
        let store = InProcessMetadataStore::new();
        store.create_session(&session("s1", "c1")).await.unwrap();
        store
            .expire_session("s1", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.session("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pointer_lifecycle() {
        let store = InProcessMetadataStore::new();
        assert!(store.current_conversation("s1").await.unwrap().is_none());

        store
            .set_current_conversation("s1", "conv-a", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.current_conversation("s1").await.unwrap().as_deref(),
            Some("conv-a")
        );

        store.clear_current_conversation("s1").await.unwrap();
        assert!(store.current_conversation("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pointer_ttl_extension() {
        let store = InProcessMetadataStore::new();
        store
            .set_current_conversation("s1", "conv-a", Duration::from_millis(30))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .extend_current_conversation("s1", Duration::from_millis(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Without the extension this would have expired by now
        assert!(store.current_conversation("s1").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.current_conversation("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_audio_file_binding() {
        let store = InProcessMetadataStore::new();
        assert!(store.audio_file("conv-a").await.unwrap().is_none());
        store
            .set_audio_file("conv-a", "/tmp/a.wav", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.audio_file("conv-a").await.unwrap().as_deref(),
            Some("/tmp/a.wav")
        );
    }
}
