/// SQLite conversation store adapter
///
/// Implements ConversationStorePort for SQLite. Nested transcript versions
/// are stored as JSON text; lifecycle fields are plain columns so the
/// targeted update methods touch disjoint columns.
use crate::domain::models::{
    Conversation, ConversationStatus, EndReason, SpeakerSegment, TranscriptVersion,
};
use crate::error::{AppError, Result};
use crate::ports::storage::ConversationStorePort;
use async_trait::async_trait;
use rusqlite::{params, Connection, Row};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// SQLite conversation store implementation
pub struct SqliteConversationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConversationStore {
    /// Create a new store with the given database path
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run database migrations
    pub fn run_migrations(&self) -> Result<()> {
        use rusqlite_migration::{Migrations, M};

        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../../migrations/001_initial.sql"
        ))]);

        let mut conn = self.conn.lock().unwrap();
        migrations
            .to_latest(&mut conn)
            .map_err(|e| AppError::Database(rusqlite::Error::ToSqlConversionFailure(Box::new(e))))?;

        Ok(())
    }

    fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
        let status_str: String = row.get(4)?;
        let status = status_str
            .parse::<ConversationStatus>()
            .unwrap_or(ConversationStatus::Closed);
        let versions_json: String = row.get(6)?;
        let transcript_versions: BTreeMap<String, TranscriptVersion> =
            serde_json::from_str(&versions_json).unwrap_or_default();
        let end_reason: Option<String> = row.get(11)?;

        Ok(Conversation {
            conversation_id: row.get(0)?,
            session_id: row.get(1)?,
            user_id: row.get(2)?,
            client_id: row.get(3)?,
            status,
            audio_path: row.get(5)?,
            transcript_versions,
            active_version: row.get(7)?,
            title: row.get(8)?,
            summary: row.get(9)?,
            detailed_summary: row.get(10)?,
            end_reason: end_reason.and_then(|r| r.parse().ok()),
            deleted: row.get::<_, i64>(12)? != 0,
            speaker_error: row.get(13)?,
            memory_error: row.get(14)?,
            summary_error: row.get(15)?,
            events_error: row.get(16)?,
            created_at: row.get(17)?,
            completed_at: row.get(18)?,
        })
    }

    fn require_updated(changed: usize, conversation_id: &str) -> Result<()> {
        if changed == 0 {
            Err(AppError::NotFound(format!(
                "conversation {}",
                conversation_id
            )))
        } else {
            Ok(())
        }
    }
}

const SELECT_COLUMNS: &str = "conversation_id, session_id, user_id, client_id, status, audio_path, \
     transcript_versions, active_version, title, summary, detailed_summary, end_reason, deleted, \
     speaker_error, memory_error, summary_error, events_error, created_at, completed_at";

#[async_trait]
impl ConversationStorePort for SqliteConversationStore {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        let versions = serde_json::to_string(&conversation.transcript_versions)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO conversations (conversation_id, session_id, user_id, client_id, status, \
             audio_path, transcript_versions, active_version, title, summary, detailed_summary, \
             end_reason, deleted, speaker_error, memory_error, summary_error, events_error, \
             created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                conversation.conversation_id,
                conversation.session_id,
                conversation.user_id,
                conversation.client_id,
                conversation.status.to_string(),
                conversation.audio_path,
                versions,
                conversation.active_version,
                conversation.title,
                conversation.summary,
                conversation.detailed_summary,
                conversation.end_reason.map(|r| r.to_string()),
                conversation.deleted as i64,
                conversation.speaker_error,
                conversation.memory_error,
                conversation.summary_error,
                conversation.events_error,
                conversation.created_at,
                conversation.completed_at,
            ],
        )?;
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM conversations WHERE conversation_id = ?1",
            SELECT_COLUMNS
        ))?;
        let mut rows = stmt.query(params![conversation_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_conversation(row)?)),
            None => Ok(None),
        }
    }

    async fn list_conversations(
        &self,
        user_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut conversations = Vec::new();
        match user_id {
            Some(user) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM conversations WHERE user_id = ?1 \
                     ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt.query_map(params![user, limit, offset], Self::row_to_conversation)?;
                for row in rows {
                    conversations.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM conversations ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt.query_map(params![limit, offset], Self::row_to_conversation)?;
                for row in rows {
                    conversations.push(row?);
                }
            }
        }
        Ok(conversations)
    }

    async fn update_status(&self, conversation_id: &str, status: ConversationStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE conversations SET status = ?1 WHERE conversation_id = ?2",
            params![status.to_string(), conversation_id],
        )?;
        Self::require_updated(changed, conversation_id)
    }

    async fn begin_finalizing(&self, conversation_id: &str, end_reason: EndReason) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE conversations SET status = ?1, end_reason = ?2 WHERE conversation_id = ?3",
            params![
                ConversationStatus::Finalizing.to_string(),
                end_reason.to_string(),
                conversation_id
            ],
        )?;
        Self::require_updated(changed, conversation_id)
    }

    async fn add_transcript_version(
        &self,
        conversation_id: &str,
        version_id: &str,
        version: &TranscriptVersion,
        set_active: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let versions_json: String = conn
            .query_row(
                "SELECT transcript_versions FROM conversations WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .map_err(|_| AppError::NotFound(format!("conversation {}", conversation_id)))?;
        let mut versions: BTreeMap<String, TranscriptVersion> =
            serde_json::from_str(&versions_json).unwrap_or_default();
        versions.insert(version_id.to_string(), version.clone());
        let updated = serde_json::to_string(&versions)?;

        if set_active {
            conn.execute(
                "UPDATE conversations SET transcript_versions = ?1, active_version = ?2 \
                 WHERE conversation_id = ?3",
                params![updated, version_id, conversation_id],
            )?;
        } else {
            conn.execute(
                "UPDATE conversations SET transcript_versions = ?1 WHERE conversation_id = ?2",
                params![updated, conversation_id],
            )?;
        }
        Ok(())
    }

    async fn set_segment_speakers(
        &self,
        conversation_id: &str,
        version_id: &str,
        segments: &[SpeakerSegment],
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let versions_json: String = conn
            .query_row(
                "SELECT transcript_versions FROM conversations WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .map_err(|_| AppError::NotFound(format!("conversation {}", conversation_id)))?;
        let mut versions: BTreeMap<String, TranscriptVersion> =
            serde_json::from_str(&versions_json).unwrap_or_default();
        let version = versions.get_mut(version_id).ok_or_else(|| {
            AppError::NotFound(format!(
                "transcript version {} of conversation {}",
                version_id, conversation_id
            ))
        })?;
        version.segments = segments.to_vec();
        let updated = serde_json::to_string(&versions)?;
        conn.execute(
            "UPDATE conversations SET transcript_versions = ?1 WHERE conversation_id = ?2",
            params![updated, conversation_id],
        )?;
        Ok(())
    }

    async fn set_summaries(
        &self,
        conversation_id: &str,
        title: &str,
        summary: &str,
        detailed_summary: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE conversations SET title = ?1, summary = ?2, detailed_summary = ?3 \
             WHERE conversation_id = ?4",
            params![title, summary, detailed_summary, conversation_id],
        )?;
        Self::require_updated(changed, conversation_id)
    }

    async fn finalize_conversation(
        &self,
        conversation_id: &str,
        audio_path: Option<&str>,
        end_reason: EndReason,
        completed_at: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE conversations SET status = ?1, audio_path = ?2, end_reason = ?3, \
             completed_at = ?4 WHERE conversation_id = ?5",
            params![
                ConversationStatus::Closed.to_string(),
                audio_path,
                end_reason.to_string(),
                completed_at,
                conversation_id
            ],
        )?;
        Self::require_updated(changed, conversation_id)
    }

    async fn mark_deleted(&self, conversation_id: &str, end_reason: EndReason) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE conversations SET status = ?1, deleted = 1, end_reason = ?2, \
             completed_at = ?3 WHERE conversation_id = ?4",
            params![
                ConversationStatus::Closed.to_string(),
                end_reason.to_string(),
                chrono::Utc::now().timestamp(),
                conversation_id
            ],
        )?;
        Self::require_updated(changed, conversation_id)
    }

    async fn set_job_error(&self, conversation_id: &str, job: &str, message: &str) -> Result<()> {
        let column = match job {
            "speaker_recognition" => "speaker_error",
            "memory_extraction" => "memory_error",
            "title_summary" => "summary_error",
            _ => "events_error",
        };
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            &format!(
                "UPDATE conversations SET {} = ?1 WHERE conversation_id = ?2",
                column
            ),
            params![message, conversation_id],
        )?;
        Self::require_updated(changed, conversation_id)
    }
}
