//! Batch operation records and the store that owns them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use uuid::{NoContext, Timestamp, Uuid};

/// Kind of batch action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOpType {
    /// Tag deletion.
    Delete,
    /// Retag to a new name.
    Retag,
    /// Copy under a destination prefix.
    Copy,
    /// Format conversion.
    Convert,
}

impl BatchOpType {
    /// Returns the type as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Retag => "retag",
            Self::Copy => "copy",
            Self::Convert => "convert",
        }
    }
}

impl fmt::Display for BatchOpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOpStatus {
    /// Recorded, not started.
    Pending,
    /// Targets are being processed.
    Running,
    /// Every target succeeded.
    Completed,
    /// At least one target failed.
    Failed,
}

impl BatchOpStatus {
    /// Returns true if the operation has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns the status as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchOpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one target's action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOpResult {
    /// Target the action ran against.
    pub target: String,
    /// Whether the action succeeded.
    pub success: bool,
    /// Error message, empty on success.
    pub error: String,
    /// Time spent in the action.
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl BatchOpResult {
    /// Creates a successful result.
    pub fn succeeded(target: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            target: target.into(),
            success: true,
            error: String::new(),
            elapsed,
        }
    }

    /// Creates a failed result.
    pub fn failed(target: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            target: target.into(),
            success: false,
            error: error.into(),
            elapsed,
        }
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Per-status counts for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BatchSummary {
    /// Number of targets.
    pub total: usize,
    /// Targets that succeeded.
    pub succeeded: usize,
    /// Targets that failed.
    pub failed: usize,
}

/// One batch invocation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOperation {
    /// Operation id.
    pub id: String,
    /// Kind of action.
    #[serde(rename = "type")]
    pub op_type: BatchOpType,
    /// Targets in submission order. Duplicates are allowed.
    pub targets: Vec<String>,
    /// Current status.
    pub status: BatchOpStatus,
    /// Results in target order. Empty until the operation finishes.
    pub results: Vec<BatchOpResult>,
    /// When the operation was recorded.
    pub created_at: DateTime<Utc>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished.
    pub ended_at: Option<DateTime<Utc>>,
}

impl BatchOperation {
    /// Creates a pending operation with a fresh id.
    pub fn new(op_type: BatchOpType, targets: Vec<String>) -> Self {
        Self {
            id: new_operation_id(),
            op_type,
            targets,
            status: BatchOpStatus::Pending,
            results: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Counts succeeded and failed results.
    pub fn summary(&self) -> BatchSummary {
        let succeeded = self.results.iter().filter(|r| r.success).count();
        BatchSummary {
            total: self.targets.len(),
            succeeded,
            failed: self.results.len() - succeeded,
        }
    }

    /// Wall-clock run time, once finished.
    pub fn elapsed(&self) -> Option<Duration> {
        let (start, end) = (self.started_at?, self.ended_at?);
        (end - start).to_std().ok()
    }
}

/// Operation ids are time-ordered: `batch-<uuid v7>`.
fn new_operation_id() -> String {
    format!("batch-{}", Uuid::new_v7(Timestamp::now(NoContext)))
}

/// Keyed store of batch operations.
///
/// Only the executor mutates records. Finished operations beyond
/// `max_history` are evicted in insertion order.
#[derive(Debug)]
pub(crate) struct OperationStore {
    operations: RwLock<HashMap<String, StoredOperation>>,
    next_seq: AtomicU64,
    max_history: Option<usize>,
}

#[derive(Debug)]
struct StoredOperation {
    seq: u64,
    op: BatchOperation,
}

impl OperationStore {
    pub(crate) fn new(max_history: Option<usize>) -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            max_history,
        }
    }

    pub(crate) fn insert(&self, op: BatchOperation) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.operations
            .write()
            .insert(op.id.clone(), StoredOperation { seq, op });
    }

    pub(crate) fn mark_running(&self, id: &str) {
        if let Some(entry) = self.operations.write().get_mut(id) {
            entry.op.status = BatchOpStatus::Running;
            entry.op.started_at = Some(Utc::now());
        }
    }

    /// Stores results and the final status. Returns the finished record.
    pub(crate) fn finish(&self, id: &str, results: Vec<BatchOpResult>) -> Option<BatchOperation> {
        let mut operations = self.operations.write();
        let finished = operations.get_mut(id).map(|entry| {
            let op = &mut entry.op;
            op.status = if results.iter().all(|r| r.success) {
                BatchOpStatus::Completed
            } else {
                BatchOpStatus::Failed
            };
            op.results = results;
            op.ended_at = Some(Utc::now());
            op.clone()
        });
        self.cleanup_old_operations(&mut operations);
        finished
    }

    pub(crate) fn get(&self, id: &str) -> Option<BatchOperation> {
        self.operations.read().get(id).map(|e| e.op.clone())
    }

    /// Snapshot of every operation in submission order.
    pub(crate) fn list(&self) -> Vec<BatchOperation> {
        let operations = self.operations.read();
        let mut entries: Vec<_> = operations.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.op.clone()).collect()
    }

    pub(crate) fn remove(&self, id: &str) -> Option<BatchOperation> {
        self.operations.write().remove(id).map(|e| e.op)
    }

    pub(crate) fn prune_finished(&self) -> usize {
        let mut operations = self.operations.write();
        let before = operations.len();
        operations.retain(|_, e| !e.op.status.is_terminal());
        before - operations.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.operations.read().len()
    }

    fn cleanup_old_operations(&self, operations: &mut HashMap<String, StoredOperation>) {
        let Some(max_history) = self.max_history else {
            return;
        };

        let mut finished: Vec<_> = operations
            .iter()
            .filter(|(_, e)| e.op.status.is_terminal())
            .map(|(id, e)| (id.clone(), e.seq))
            .collect();

        if finished.len() <= max_history {
            return;
        }

        finished.sort_by_key(|(_, seq)| *seq);

        let to_remove = finished.len() - max_history;
        for (id, _) in finished.into_iter().take(to_remove) {
            operations.remove(&id);
        }
    }
}
