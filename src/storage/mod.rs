//! SQLite-backed persistence.
//!
//! - **Database**: connection pool and schema bootstrap
//! - **RunStore**: runs, lane records and change notifications
//! - **JobStore**: the job table and its conditional updates
//! - **NoteStore**: call-note audit rows
//!
//! ```rust,ignore
//! use archforge::storage::{Database, JobStore, RunStore};
//!
//! let db = Database::connect("sqlite://archforge.db").await?;
//! db.run_migrations().await?;
//!
//! let runs = RunStore::new(&db);
//! let jobs = JobStore::new(&db);
//! ```

pub mod database;
pub mod jobs;
pub mod migrations;
pub mod notes;
pub mod runs;
pub mod schema;

pub use database::{Database, DatabaseError};
pub use jobs::{FinishUpdate, JobStore};
pub use migrations::{MigrationError, MigrationRunner};
pub use notes::{NoteStore, StoredNote};
pub use runs::{
    LaneRecord, LaneStatus, NewRun, Run, RunEvent, RunSnapshot, RunStatus, RunStore,
    RUN_META_VERSION,
};
