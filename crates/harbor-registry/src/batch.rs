//! Concurrent batch executor.
//!
//! A submitted batch is recorded as `pending` and handed to a background
//! task; the submitter gets a [`BatchHandle`] straight away. The background
//! task spawns one task per target, gated by a semaphore sized to the
//! configured worker count, and writes results back in target order once
//! every task has finished. A failing target never cancels its siblings.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use harbor_audit::{AuditLogger, BatchEvent};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::RegistryClient;
use crate::config::BatchConfig;
use crate::error::{RegistryError, Result};
use crate::operation::{BatchOpResult, BatchOpType, BatchOperation, OperationStore};

type TargetJob = BoxFuture<'static, Result<()>>;

/// Handle to a submitted batch.
///
/// Dropping the handle does not cancel the batch.
#[derive(Debug)]
pub struct BatchHandle {
    id: String,
    store: Arc<OperationStore>,
    task: JoinHandle<Option<BatchOperation>>,
}

impl BatchHandle {
    /// Operation id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current snapshot of the operation, if it is still stored.
    pub fn snapshot(&self) -> Option<BatchOperation> {
        self.store.get(&self.id)
    }

    /// Returns true once the background task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for every target to finish and returns the final record.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the execution task panicked or the record
    /// disappeared before it could be finalized.
    pub async fn wait(self) -> Result<BatchOperation> {
        let finished = self
            .task
            .await
            .map_err(|e| RegistryError::Internal(format!("batch task failed: {e}")))?;
        finished.ok_or_else(|| {
            RegistryError::Internal(format!("operation {} removed before completion", self.id))
        })
    }
}

/// Runs batch actions against a registry client.
///
/// Batches run on the Tokio runtime the executor was created in, so
/// `submit` itself may be called from any thread.
pub struct BatchExecutor {
    config: BatchConfig,
    runtime: Handle,
    store: Arc<OperationStore>,
    client: Arc<dyn RegistryClient>,
    audit: Arc<AuditLogger>,
}

impl BatchExecutor {
    /// Creates an executor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the worker count is zero or if called
    /// outside a Tokio runtime.
    pub fn new(
        config: BatchConfig,
        client: Arc<dyn RegistryClient>,
        audit: Arc<AuditLogger>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| RegistryError::InvalidConfig {
            reason: format!("batch executor needs a Tokio runtime: {e}"),
        })?;
        Ok(Self {
            runtime,
            store: Arc::new(OperationStore::new(config.max_history)),
            config,
            client,
            audit,
        })
    }

    /// Returns the executor configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Submits a batch with a caller-supplied per-target action.
    ///
    /// The action is called once per target, in order, to build that
    /// target's future; the futures only run once the batch starts.
    ///
    /// # Errors
    ///
    /// Returns `EmptyTargets` if `targets` is empty.
    pub fn submit<F, Fut>(
        &self,
        op_type: BatchOpType,
        targets: Vec<String>,
        mut action: F,
    ) -> Result<BatchHandle>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let jobs = targets.iter().map(|t| action(t.clone()).boxed()).collect();
        self.launch(op_type, targets, jobs)
    }

    /// Deletes every target tag.
    ///
    /// # Errors
    ///
    /// Returns `EmptyTargets` if `targets` is empty.
    pub fn delete_tags(&self, targets: Vec<String>) -> Result<BatchHandle> {
        let client = Arc::clone(&self.client);
        self.submit(BatchOpType::Delete, targets, move |target| {
            let client = Arc::clone(&client);
            async move { client.delete_tag(&target).await }
        })
    }

    /// Copies every source tag under `dest_prefix`.
    ///
    /// # Errors
    ///
    /// Returns `EmptyTargets` if `sources` is empty.
    pub fn copy_tags(&self, sources: Vec<String>, dest_prefix: &str) -> Result<BatchHandle> {
        let client = Arc::clone(&self.client);
        let dest_prefix: Arc<str> = Arc::from(dest_prefix);
        info!(dest_prefix = %dest_prefix, count = sources.len(), "Copying tags");
        self.submit(BatchOpType::Copy, sources, move |source| {
            let client = Arc::clone(&client);
            let dest_prefix = Arc::clone(&dest_prefix);
            async move { client.copy_tag(&source, &dest_prefix).await }
        })
    }

    /// Retags each `(source, dest)` pair. Sources are the recorded targets.
    ///
    /// # Errors
    ///
    /// Returns `EmptyTargets` if `mappings` is empty.
    pub fn retag(&self, mappings: Vec<(String, String)>) -> Result<BatchHandle> {
        let mut targets = Vec::with_capacity(mappings.len());
        let mut jobs: Vec<TargetJob> = Vec::with_capacity(mappings.len());
        for (source, dest) in mappings {
            let client = Arc::clone(&self.client);
            targets.push(source.clone());
            jobs.push(async move { client.retag_image(&source, &dest).await }.boxed());
        }
        self.launch(BatchOpType::Retag, targets, jobs)
    }

    /// Returns a snapshot of an operation.
    pub fn get_operation(&self, id: &str) -> Option<BatchOperation> {
        self.store.get(id)
    }

    /// Returns every stored operation in submission order.
    pub fn list_operations(&self) -> Vec<BatchOperation> {
        self.store.list()
    }

    /// Removes an operation from the store, whatever its status.
    pub fn remove_operation(&self, id: &str) -> Option<BatchOperation> {
        self.store.remove(id)
    }

    /// Drops every finished operation. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        self.store.prune_finished()
    }

    /// Number of stored operations.
    pub fn operation_count(&self) -> usize {
        self.store.len()
    }

    fn launch(
        &self,
        op_type: BatchOpType,
        targets: Vec<String>,
        jobs: Vec<TargetJob>,
    ) -> Result<BatchHandle> {
        if targets.is_empty() {
            return Err(RegistryError::EmptyTargets {
                op_type: op_type.to_string(),
            });
        }

        let op = BatchOperation::new(op_type, targets.clone());
        let id = op.id.clone();
        self.store.insert(op);

        info!(operation_id = %id, op_type = %op_type, count = targets.len(), "Batch submitted");
        self.audit
            .record(&BatchEvent::submitted(&id, op_type.as_str(), targets.len()));

        let task = self.runtime.spawn(execute_batch(
            Arc::clone(&self.store),
            Arc::clone(&self.audit),
            id.clone(),
            op_type,
            targets,
            jobs,
            self.config.workers,
        ));

        Ok(BatchHandle {
            id,
            store: Arc::clone(&self.store),
            task,
        })
    }
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("config", &self.config)
            .field("operations", &self.store.len())
            .finish_non_exhaustive()
    }
}

async fn execute_batch(
    store: Arc<OperationStore>,
    audit: Arc<AuditLogger>,
    id: String,
    op_type: BatchOpType,
    targets: Vec<String>,
    jobs: Vec<TargetJob>,
    workers: usize,
) -> Option<BatchOperation> {
    store.mark_running(&id);
    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(workers));

    let tasks: Vec<_> = targets
        .iter()
        .cloned()
        .zip(jobs)
        .map(|(target, job)| {
            let semaphore = Arc::clone(&semaphore);
            tokio::spawn(run_target(semaphore, target, job))
        })
        .collect();

    // join_all keeps spawn order, so results line up with targets.
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .zip(targets)
        .map(|(joined, target)| {
            joined.unwrap_or_else(|e| {
                BatchOpResult::failed(target, format!("task failed: {e}"), Duration::ZERO)
            })
        })
        .collect();

    let duration = started.elapsed();
    let finished = store.finish(&id, results);

    if let Some(op) = &finished {
        let summary = op.summary();
        info!(
            operation_id = %id,
            status = %op.status,
            succeeded = summary.succeeded,
            failed = summary.failed,
            duration_ms = duration.as_millis(),
            "Batch finished"
        );
        audit.record(&BatchEvent::finished(
            &id,
            op_type.as_str(),
            summary.succeeded,
            summary.failed,
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        ));
    } else {
        warn!(operation_id = %id, "Batch finished after its record was removed");
    }

    finished
}

async fn run_target(semaphore: Arc<Semaphore>, target: String, job: TargetJob) -> BatchOpResult {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return BatchOpResult::failed(target, "admission gate closed", Duration::ZERO);
    };

    let start = Instant::now();
    let outcome = job.await;
    let elapsed = start.elapsed();

    match outcome {
        Ok(()) => {
            debug!(target_ref = %target, elapsed_ms = elapsed.as_millis(), "Target succeeded");
            BatchOpResult::succeeded(target, elapsed)
        }
        Err(e) => {
            warn!(target_ref = %target, error = %e, "Target failed");
            BatchOpResult::failed(target, e.to_string(), elapsed)
        }
    }
}
