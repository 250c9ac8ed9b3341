//! Database schema constants.
//!
//! Timestamps are stored as INTEGER milliseconds since the Unix epoch so
//! ordering and staleness comparisons are plain integer comparisons. JSON
//! payloads are stored as TEXT.

/// Runs: one row per submitted vision.
pub const CREATE_RUNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    vision TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('running', 'succeeded', 'failed')),
    default_model TEXT,
    project_name TEXT,
    wizard_data TEXT,
    meta TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

/// Lane records: exactly one row per (run, lane).
pub const CREATE_LANES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS lanes (
    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    lane TEXT NOT NULL,
    position INTEGER NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('queued', 'running', 'succeeded', 'failed')),
    output TEXT,
    meta TEXT NOT NULL DEFAULT '{}',
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (run_id, lane)
)
"#;

/// Jobs: generic queued provider work.
pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    owner_id TEXT,
    tool TEXT NOT NULL,
    params TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0 CHECK (priority BETWEEN -100 AND 100),
    model TEXT,
    provider TEXT,
    status TEXT NOT NULL CHECK (status IN ('queued', 'processing', 'completed', 'failed')),
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    claim_token TEXT,
    next_at INTEGER,
    started_at INTEGER,
    completed_at INTEGER,
    execution_ms INTEGER,
    result TEXT,
    error TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK (attempts <= max_attempts)
)
"#;

/// Call notes: audit rows for dispatched provider calls.
pub const CREATE_CALL_NOTES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS call_notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model TEXT NOT NULL,
    provider TEXT NOT NULL,
    input_sha256 TEXT NOT NULL,
    prompt_preview TEXT NOT NULL,
    notes TEXT NOT NULL,
    error TEXT,
    latency_ms INTEGER NOT NULL,
    created_at INTEGER NOT NULL
)
"#;

pub const CREATE_JOBS_CLAIM_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs (status, priority DESC, created_at ASC)
"#;

pub const CREATE_JOBS_STARTED_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_jobs_started ON jobs (status, started_at)
"#;

pub const CREATE_LANES_RUN_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_lanes_run ON lanes (run_id, position)
"#;

/// All schema statements, in application order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_RUNS_TABLE,
        CREATE_LANES_TABLE,
        CREATE_JOBS_TABLE,
        CREATE_CALL_NOTES_TABLE,
        CREATE_JOBS_CLAIM_INDEX,
        CREATE_JOBS_STARTED_INDEX,
        CREATE_LANES_RUN_INDEX,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_idempotent_ddl() {
        for statement in all_schema_statements() {
            assert!(statement.contains("IF NOT EXISTS"), "{statement}");
        }
    }

    #[test]
    fn test_jobs_table_bounds_priority_and_attempts() {
        assert!(CREATE_JOBS_TABLE.contains("BETWEEN -100 AND 100"));
        assert!(CREATE_JOBS_TABLE.contains("attempts <= max_attempts"));
    }
}
