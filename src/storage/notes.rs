//! Persisted call notes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};

use super::database::{from_millis, Database, DatabaseError};
use crate::llm::CallNote;

/// A call note as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredNote {
    pub id: i64,
    pub model: String,
    pub provider: String,
    pub input_sha256: String,
    pub prompt_preview: String,
    pub notes: Value,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NoteStore {
    pool: SqlitePool,
}

impl NoteStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub async fn insert(&self, note: &CallNote) -> Result<(), DatabaseError> {
        let notes = json!({
            "worker": note.worker,
            "version": note.version,
            "routing_policy": note.routing_policy,
        });

        sqlx::query(
            r#"
            INSERT INTO call_notes (
                model, provider, input_sha256, prompt_preview, notes, error,
                latency_ms, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(note.model.as_str())
        .bind(note.provider.as_str())
        .bind(&note.input_sha256)
        .bind(&note.prompt_preview)
        .bind(notes.to_string())
        .bind(&note.error)
        .bind(note.latency_ms as i64)
        .bind(note.recorded_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent notes first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<StoredNote>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM call_notes ORDER BY id DESC LIMIT ?1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let notes: String = row.get("notes");
                Ok(StoredNote {
                    id: row.get("id"),
                    model: row.get("model"),
                    provider: row.get("provider"),
                    input_sha256: row.get("input_sha256"),
                    prompt_preview: row.get("prompt_preview"),
                    notes: serde_json::from_str(&notes)?,
                    error: row.get("error"),
                    latency_ms: row.get::<i64, _>("latency_ms") as u64,
                    created_at: from_millis(row.get("created_at"))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CallLog, ModelId, ProviderKind, ProviderRequest, StoreCallLog};

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let store = NoteStore::new(&Database::in_memory().await.unwrap());
        let request = ProviderRequest::new(ModelId::Gemini25Pro, "draw a cat").with_origin("llm-route");
        let note = CallNote::new("worker-a", &request, ProviderKind::Gemini);
        store.insert(&note).await.unwrap();

        let notes = store.recent(10).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].model, "Gemini-2.5-Pro");
        assert_eq!(notes[0].provider, "google");
        assert_eq!(notes[0].prompt_preview, "draw a cat");
        assert_eq!(notes[0].notes["routing_policy"], "llm-route");
        assert_eq!(notes[0].notes["worker"], "worker-a");
    }

    #[tokio::test]
    async fn test_store_call_log_persists_in_background() {
        let store = NoteStore::new(&Database::in_memory().await.unwrap());
        let log = StoreCallLog::new(store.clone());
        let request = ProviderRequest::new(ModelId::Gpt5, "hello");
        log.record(CallNote::new("w", &request, ProviderKind::OpenAi));

        let mut found = 0;
        for _ in 0..50 {
            found = store.recent(10).await.unwrap().len();
            if found == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(found, 1);
    }
}
