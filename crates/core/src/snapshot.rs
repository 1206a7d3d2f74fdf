use serde::{Deserialize, Serialize};

use crate::domain::job::AiJob;

/// Point-in-time dump of the volatile pipeline state, for operator
/// inspection or a future persistence layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub taken_at: Option<chrono::DateTime<chrono::Utc>>,
    pub queued_jobs: Vec<AiJob>,
    pub pending_clarifications: usize,
    pub context_actors: usize,
}

/// Receives snapshots from the runtime. All state is in-memory; the sink
/// decides whether anything outlives the process.
pub trait SnapshotSink: Send + Sync {
    fn record(&self, snapshot: &StateSnapshot);
}

/// Discards every snapshot. Used when no persistence is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSnapshotSink;

impl SnapshotSink for NoopSnapshotSink {
    fn record(&self, _snapshot: &StateSnapshot) {}
}
