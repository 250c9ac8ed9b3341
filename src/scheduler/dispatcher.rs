//! One poll-and-dispatch cycle: heal, claim next, execute.

use serde::Serialize;
use uuid::Uuid;

use super::executor::JobExecutor;
use super::queue::QueueError;

/// Outcome of a dispatch cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub healed: u64,
}

impl DispatchReport {
    fn idle(healed: u64) -> Self {
        Self {
            message: "No jobs to process".to_string(),
            job_id: None,
            status: None,
            healed,
        }
    }

    pub fn processed_job(&self) -> bool {
        self.job_id.is_some()
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    executor: JobExecutor,
}

impl Dispatcher {
    pub fn new(executor: JobExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &JobExecutor {
        &self.executor
    }

    /// Runs one cycle. Never blocks waiting for work.
    ///
    /// A failed heal is logged and does not stop the claim.
    pub async fn dispatch_once(&self) -> Result<DispatchReport, QueueError> {
        let queue = self.executor.queue();
        let healed = match queue.heal_stuck().await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Healing pass failed");
                0
            }
        };

        let Some(job) = queue.claim_next().await? else {
            return Ok(DispatchReport::idle(healed));
        };

        let job_id = job.id;
        let report = self.executor.execute(job).await?;
        tracing::info!(job_id = %job_id, status = %report.status, healed, "Dispatched job");

        Ok(DispatchReport {
            message: "Job processed".to_string(),
            job_id: Some(job_id),
            status: Some(report.status),
            healed,
        })
    }
}
