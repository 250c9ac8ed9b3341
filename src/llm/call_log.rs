//! Fire-and-forget call logging.
//!
//! `CallLog::record` cannot fail and cannot block the caller. Implementations
//! that do I/O must log their own failures with `warn!` and carry on; a lost
//! note never fails a provider call.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::gateway::ProviderRequest;
use super::model::{ModelId, ProviderKind};
use crate::storage::NoteStore;

/// Characters of the prompt kept in a note.
pub const PROMPT_PREVIEW_CHARS: usize = 200;

/// Audit record for one dispatched provider call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallNote {
    pub worker: String,
    pub version: &'static str,
    pub routing_policy: String,
    pub model: ModelId,
    pub provider: ProviderKind,
    /// Hex SHA-256 of the prompt input.
    pub input_sha256: String,
    pub prompt_preview: String,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl CallNote {
    pub fn new(worker: &str, request: &ProviderRequest, provider: ProviderKind) -> Self {
        Self {
            worker: worker.to_string(),
            version: env!("CARGO_PKG_VERSION"),
            routing_policy: request.origin.clone(),
            model: request.model,
            provider,
            input_sha256: sha256_hex(&request.input),
            prompt_preview: preview(&request.input),
            latency_ms: 0,
            error: None,
            recorded_at: Utc::now(),
        }
    }
}

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn preview(input: &str) -> String {
    input.chars().take(PROMPT_PREVIEW_CHARS).collect()
}

/// Sink for call notes.
pub trait CallLog: Send + Sync {
    /// Records a note. Never fails; errors are logged by the implementation.
    fn record(&self, note: CallNote);
}

/// Writes each note as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCallLog;

impl CallLog for TracingCallLog {
    fn record(&self, note: CallNote) {
        tracing::info!(
            worker = %note.worker,
            model = %note.model,
            provider = %note.provider,
            routing_policy = %note.routing_policy,
            input_sha256 = %note.input_sha256,
            latency_ms = note.latency_ms,
            failed = note.error.is_some(),
            "Provider call"
        );
    }
}

/// Persists notes to the `call_notes` table on a background task.
#[derive(Clone)]
pub struct StoreCallLog {
    store: NoteStore,
}

impl StoreCallLog {
    pub fn new(store: NoteStore) -> Self {
        Self { store }
    }
}

impl CallLog for StoreCallLog {
    fn record(&self, note: CallNote) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(model = %note.model, "No runtime available; call note dropped");
            return;
        };

        let store = self.store.clone();
        handle.spawn(async move {
            if let Err(e) = store.insert(&note).await {
                tracing::warn!(
                    model = %note.model,
                    error = %e,
                    "Failed to persist call note"
                );
            }
        });
    }
}
