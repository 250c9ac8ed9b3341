//! Run and lane-record persistence.
//!
//! Every status change is a single-row conditional update that only moves
//! forward. A change event is broadcast after each durable write.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::database::{from_millis, now_millis, parse_json, Database, DatabaseError};
use crate::llm::ModelId;
use crate::pipeline::lane::{Lane, LANE_ORDER};

/// Capacity of the change-notification channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Version stamped into each run's meta.
pub const RUN_META_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [RunStatus::Running, RunStatus::Succeeded, RunStatus::Failed]
            .into_iter()
            .find(|s| s.as_str() == value)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl LaneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaneStatus::Queued => "queued",
            LaneStatus::Running => "running",
            LaneStatus::Succeeded => "succeeded",
            LaneStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            LaneStatus::Queued,
            LaneStatus::Running,
            LaneStatus::Succeeded,
            LaneStatus::Failed,
        ]
        .into_iter()
        .find(|s| s.as_str() == value)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LaneStatus::Succeeded | LaneStatus::Failed)
    }
}

impl fmt::Display for LaneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for creating a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRun {
    pub vision: String,
    #[serde(default)]
    pub default_model: Option<ModelId>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub wizard_data: Option<Value>,
}

impl NewRun {
    pub fn new(vision: impl Into<String>) -> Self {
        Self {
            vision: vision.into(),
            ..Default::default()
        }
    }

    pub fn with_default_model(mut self, model: ModelId) -> Self {
        self.default_model = Some(model);
        self
    }

    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }

    pub fn with_wizard_data(mut self, data: Value) -> Self {
        self.wizard_data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub vision: String,
    pub status: RunStatus,
    pub default_model: Option<ModelId>,
    pub project_name: Option<String>,
    pub wizard_data: Option<Value>,
    pub meta: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneRecord {
    pub run_id: Uuid,
    pub lane: Lane,
    pub status: LaneStatus,
    /// Present only once the lane has succeeded.
    pub output: Option<Value>,
    pub meta: Value,
    pub updated_at: DateTime<Utc>,
}

/// A run with its five lane records in lane order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    #[serde(flatten)]
    pub run: Run,
    pub lanes: Vec<LaneRecord>,
}

impl RunSnapshot {
    pub fn lane(&self, lane: Lane) -> Option<&LaneRecord> {
        self.lanes.iter().find(|l| l.lane == lane)
    }
}

/// Change notification emitted after a durable write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    /// `None` for run-level changes.
    pub lane: Option<Lane>,
    pub status: String,
}

/// Persistence for runs and their lanes.
#[derive(Clone)]
pub struct RunStore {
    pool: SqlitePool,
    events: broadcast::Sender<RunEvent>,
}

impl RunStore {
    pub fn new(db: &Database) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            pool: db.pool().clone(),
            events,
        }
    }

    /// Receives every change written after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    fn notify(&self, run_id: Uuid, lane: Option<Lane>, status: &str) {
        // No subscribers is fine.
        let _ = self.events.send(RunEvent {
            run_id,
            lane,
            status: status.to_string(),
        });
    }

    /// Creates a `running` run and its five `queued` lanes.
    pub async fn create(&self, new_run: &NewRun) -> Result<RunSnapshot, DatabaseError> {
        let id = Uuid::new_v4();
        let now = now_millis();
        let meta = json!({"version": RUN_META_VERSION});
        let wizard_data = new_run
            .wizard_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO runs (
                id, vision, status, default_model, project_name, wizard_data,
                meta, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(id.to_string())
        .bind(&new_run.vision)
        .bind(RunStatus::Running.as_str())
        .bind(new_run.default_model.map(|m| m.as_str()))
        .bind(&new_run.project_name)
        .bind(wizard_data)
        .bind(meta.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for lane in LANE_ORDER {
            sqlx::query(
                r#"
                INSERT INTO lanes (run_id, lane, position, status, meta, updated_at)
                VALUES (?1, ?2, ?3, ?4, '{}', ?5)
                "#,
            )
            .bind(id.to_string())
            .bind(lane.as_str())
            .bind(lane.position() as i64)
            .bind(LaneStatus::Queued.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(run_id = %id, "Run created");
        self.notify(id, None, RunStatus::Running.as_str());

        self.get(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("run {id}")))
    }

    /// `queued -> running`. Returns `false` if the lane was not queued.
    pub async fn start_lane(
        &self,
        run_id: Uuid,
        lane: Lane,
        meta: &Value,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE lanes SET status = 'running', meta = ?1, updated_at = ?2
            WHERE run_id = ?3 AND lane = ?4 AND status = 'queued'
            "#,
        )
        .bind(meta.to_string())
        .bind(now_millis())
        .bind(run_id.to_string())
        .bind(lane.as_str())
        .execute(&self.pool)
        .await?;

        let moved = result.rows_affected() == 1;
        if moved {
            self.notify(run_id, Some(lane), LaneStatus::Running.as_str());
        }
        Ok(moved)
    }

    /// `running -> succeeded|failed`. Returns `false` if the lane was not running.
    pub async fn finish_lane(
        &self,
        run_id: Uuid,
        lane: Lane,
        status: LaneStatus,
        output: Option<&Value>,
        meta: &Value,
    ) -> Result<bool, DatabaseError> {
        if !status.is_terminal() {
            return Ok(false);
        }
        // Output is kept only for succeeded lanes.
        let output = match status {
            LaneStatus::Succeeded => output.map(Value::to_string),
            _ => None,
        };

        let result = sqlx::query(
            r#"
            UPDATE lanes SET status = ?1, output = ?2, meta = ?3, updated_at = ?4
            WHERE run_id = ?5 AND lane = ?6 AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(output)
        .bind(meta.to_string())
        .bind(now_millis())
        .bind(run_id.to_string())
        .bind(lane.as_str())
        .execute(&self.pool)
        .await?;

        let moved = result.rows_affected() == 1;
        if moved {
            self.notify(run_id, Some(lane), status.as_str());
        }
        Ok(moved)
    }

    /// Fails a lane that never reached a terminal state.
    ///
    /// Used when a run is abandoned mid-lane. Returns `false` if the lane had
    /// already finished.
    pub async fn abort_lane(
        &self,
        run_id: Uuid,
        lane: Lane,
        meta: &Value,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE lanes SET status = 'failed', output = NULL, meta = ?1, updated_at = ?2
            WHERE run_id = ?3 AND lane = ?4 AND status IN ('queued', 'running')
            "#,
        )
        .bind(meta.to_string())
        .bind(now_millis())
        .bind(run_id.to_string())
        .bind(lane.as_str())
        .execute(&self.pool)
        .await?;

        let moved = result.rows_affected() == 1;
        if moved {
            self.notify(run_id, Some(lane), LaneStatus::Failed.as_str());
        }
        Ok(moved)
    }

    /// `running -> succeeded|failed`. Returns `false` if the run was not running.
    pub async fn finish_run(&self, run_id: Uuid, status: RunStatus) -> Result<bool, DatabaseError> {
        if status == RunStatus::Running {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE runs SET status = ?1, updated_at = ?2
            WHERE id = ?3 AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(now_millis())
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await?;

        let moved = result.rows_affected() == 1;
        if moved {
            tracing::info!(run_id = %run_id, status = %status, "Run finished");
            self.notify(run_id, None, status.as_str());
        }
        Ok(moved)
    }

    /// Loads a run with its lanes in lane order.
    pub async fn get(&self, run_id: Uuid) -> Result<Option<RunSnapshot>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let run = row_to_run(&row)?;

        let lane_rows = sqlx::query("SELECT * FROM lanes WHERE run_id = ?1 ORDER BY position")
            .bind(run_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let lanes = lane_rows
            .iter()
            .map(row_to_lane)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(RunSnapshot { run, lanes }))
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw).map_err(|e| DatabaseError::Corrupt(format!("bad id '{raw}': {e}")))
}

fn row_to_run(row: &SqliteRow) -> Result<Run, DatabaseError> {
    let status: String = row.get("status");
    let default_model: Option<String> = row.get("default_model");

    Ok(Run {
        id: parse_uuid(row.get::<&str, _>("id"))?,
        vision: row.get("vision"),
        status: RunStatus::parse(&status)
            .ok_or_else(|| DatabaseError::Corrupt(format!("run status '{status}'")))?,
        default_model: default_model
            .map(|m| ModelId::parse(&m).map_err(|e| DatabaseError::Corrupt(e.to_string())))
            .transpose()?,
        project_name: row.get("project_name"),
        wizard_data: parse_json(row.get("wizard_data"))?,
        meta: parse_json(row.get("meta"))?.unwrap_or_else(|| json!({})),
        created_at: from_millis(row.get("created_at"))?,
        updated_at: from_millis(row.get("updated_at"))?,
    })
}

fn row_to_lane(row: &SqliteRow) -> Result<LaneRecord, DatabaseError> {
    let lane: String = row.get("lane");
    let status: String = row.get("status");

    Ok(LaneRecord {
        run_id: parse_uuid(row.get::<&str, _>("run_id"))?,
        lane: Lane::parse(&lane).ok_or_else(|| DatabaseError::Corrupt(format!("lane '{lane}'")))?,
        status: LaneStatus::parse(&status)
            .ok_or_else(|| DatabaseError::Corrupt(format!("lane status '{status}'")))?,
        output: parse_json(row.get("output"))?,
        meta: parse_json(row.get("meta"))?.unwrap_or_else(|| json!({})),
        updated_at: from_millis(row.get("updated_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> RunStore {
        RunStore::new(&Database::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_create_seeds_five_queued_lanes() {
        let store = store().await;
        let snapshot = store
            .create(&NewRun::new("Build a todo app").with_project_name("todo"))
            .await
            .unwrap();

        assert_eq!(snapshot.run.status, RunStatus::Running);
        assert_eq!(snapshot.run.meta, json!({"version": "1.0.0"}));
        assert_eq!(snapshot.run.project_name.as_deref(), Some("todo"));
        let lanes: Vec<Lane> = snapshot.lanes.iter().map(|l| l.lane).collect();
        assert_eq!(lanes, LANE_ORDER.to_vec());
        assert!(snapshot
            .lanes
            .iter()
            .all(|l| l.status == LaneStatus::Queued && l.output.is_none()));
    }

    #[tokio::test]
    async fn test_lane_transitions_only_move_forward() {
        let store = store().await;
        let run_id = store.create(&NewRun::new("v")).await.unwrap().run.id;
        let meta = json!({"model": "GPT-5"});

        // Cannot finish a lane that never started.
        assert!(!store
            .finish_lane(run_id, Lane::Sql, LaneStatus::Succeeded, None, &meta)
            .await
            .unwrap());

        assert!(store.start_lane(run_id, Lane::Sql, &meta).await.unwrap());
        assert!(!store.start_lane(run_id, Lane::Sql, &meta).await.unwrap());

        let output = json!({"ddl": "create table t()"});
        assert!(store
            .finish_lane(run_id, Lane::Sql, LaneStatus::Succeeded, Some(&output), &meta)
            .await
            .unwrap());
        // Terminal lanes stay terminal.
        assert!(!store
            .finish_lane(run_id, Lane::Sql, LaneStatus::Failed, None, &meta)
            .await
            .unwrap());
        assert!(!store.start_lane(run_id, Lane::Sql, &meta).await.unwrap());

        let snapshot = store.get(run_id).await.unwrap().unwrap();
        let sql = snapshot.lane(Lane::Sql).unwrap();
        assert_eq!(sql.status, LaneStatus::Succeeded);
        assert_eq!(sql.output.as_ref(), Some(&output));
    }

    #[tokio::test]
    async fn test_failed_lane_drops_output() {
        let store = store().await;
        let run_id = store.create(&NewRun::new("v")).await.unwrap().run.id;
        store.start_lane(run_id, Lane::Spec, &json!({})).await.unwrap();
        store
            .finish_lane(
                run_id,
                Lane::Spec,
                LaneStatus::Failed,
                Some(&json!({"partial": true})),
                &json!({"error": "boom"}),
            )
            .await
            .unwrap();

        let snapshot = store.get(run_id).await.unwrap().unwrap();
        let spec = snapshot.lane(Lane::Spec).unwrap();
        assert!(spec.output.is_none());
        assert_eq!(spec.meta["error"], "boom");
    }

    #[tokio::test]
    async fn test_run_finishes_once() {
        let store = store().await;
        let run_id = store.create(&NewRun::new("v")).await.unwrap().run.id;

        assert!(store.finish_run(run_id, RunStatus::Failed).await.unwrap());
        assert!(!store.finish_run(run_id, RunStatus::Succeeded).await.unwrap());
        assert!(!store.finish_run(run_id, RunStatus::Running).await.unwrap());

        let snapshot = store.get(run_id).await.unwrap().unwrap();
        assert_eq!(snapshot.run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_events_follow_writes() {
        let store = store().await;
        let mut events = store.subscribe();

        let run_id = store.create(&NewRun::new("v")).await.unwrap().run.id;
        store.start_lane(run_id, Lane::Spec, &json!({})).await.unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first.run_id, run_id);
        assert_eq!(first.lane, None);
        assert_eq!(first.status, "running");

        let second = events.recv().await.unwrap();
        assert_eq!(second.lane, Some(Lane::Spec));
    }

    #[tokio::test]
    async fn test_get_unknown_run() {
        let store = store().await;
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }
}
