//! Architecture lane pipeline.
//!
//! A run turns one free-text vision into five artifacts, one per lane:
//!
//! | Lane | Artifact | Default model |
//! |------|----------|---------------|
//! | `spec` | product specification | Claude |
//! | `sql` | schema DDL | GPT |
//! | `ui` | component tree and routes | Gemini |
//! | `test` | test plan | Claude |
//! | `cicd` | CI/CD pipeline | GPT |
//!
//! # Pipeline Flow
//!
//! 1. The run is created `running` with five `queued` lanes
//! 2. Each lane in order goes `running`, calls its model once, then
//!    `succeeded` or `failed`
//! 3. The first failed lane fails the run; later lanes stay `queued`
//! 4. Otherwise the run ends `succeeded`
//!
//! Lanes are not retried. Each lane prompt carries only the vision.
//!
//! # Example
//!
//! ```rust,ignore
//! use archforge::pipeline::LaneRunner;
//! use archforge::storage::NewRun;
//!
//! let runner = LaneRunner::from_database(&db, gateway);
//! let report = runner.start_run(NewRun::new("Build a todo app")).await?;
//! let snapshot = runner.get_run(report.run_id).await?;
//! ```

pub mod lane;
pub mod runner;

pub use lane::{Lane, LANE_MAX_TOKENS, LANE_ORDER, LANE_TEMPERATURE};
pub use runner::{parse_artifact, LaneRunner, PipelineError, RunReport};
