//! CommandRequest reconciler
//!
//! Drives a CommandRequest through its lifecycle:
//! - adds the finalizer on first sight of a live object
//! - launches the command once, recording `Running`
//! - cancels the in-flight command on `spec.cancel` or deletion
//! - records `Finished` with output and exit summary when the command ends
//!
//! The reconciler holds no per-object state between calls. Durable state lives
//! in the object itself and in the [`OperationRegistry`]; the background task
//! that waits on the process is the only place that writes the final status.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{CommandPhase, CommandRequest};
use crate::error::Result;
use crate::executor::{CommandExecutor, ExecutionOutcome};
use crate::metrics;
use crate::reconcilers::status::{update_status_with_retry, update_with_retry, RetryPolicy};
use crate::registry::{Operation, OperationRegistry, OperationTracker};
use crate::store::{ObjectKey, ObjectStore};

/// What a single reconcile pass did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Object no longer exists
    NotFound,
    /// Finalizer was added; the write triggers the next pass
    FinalizerAdded,
    /// Deleting object was cleaned up and released
    Finalized,
    /// Cancellation was requested; the background task records the result
    CancelRequested,
    /// Command already running or finished
    Unchanged,
    /// Command was started in the background
    Launched,
    /// Running status could not be recorded, nothing was started
    LaunchAborted,
}

/// Reconciler for CommandRequest objects
///
/// Cheap to clone; clones share the store, registry and executor.
#[derive(Clone)]
pub struct CommandReconciler {
    store: Arc<dyn ObjectStore>,
    registry: Arc<OperationRegistry>,
    executor: CommandExecutor,
    retry: RetryPolicy,
}

impl CommandReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Arc<OperationRegistry>,
        executor: CommandExecutor,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            executor,
            retry,
        }
    }

    /// Converge the object stored under `key` one step
    #[instrument(skip_all, fields(key = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        let Some(request) = self.store.get(key).await? else {
            debug!("CommandRequest is gone, nothing to do");
            return Ok(ReconcileOutcome::NotFound);
        };

        if request.is_deleting() {
            return self.finalize(key, &request).await;
        }

        if !request.has_finalizer() {
            let mut updated = request.clone();
            updated.add_finalizer();
            self.store.update(&updated).await?;
            info!("Added finalizer");
            return Ok(ReconcileOutcome::FinalizerAdded);
        }

        let phase = request.phase();

        if request.spec.cancel && phase != Some(CommandPhase::Finished) {
            self.cancel(key).await;
            return Ok(ReconcileOutcome::CancelRequested);
        }

        if phase.is_some() {
            return Ok(ReconcileOutcome::Unchanged);
        }

        self.launch(key, request).await
    }

    /// Cancel the operation running for `key` and wait for it to quiesce
    ///
    /// Returns false if no operation was registered, which covers both
    /// "already finished" and "already cancelled".
    pub async fn cancel(&self, key: &ObjectKey) -> bool {
        let Some(handle) = self.registry.lookup_and_remove(key) else {
            debug!(key = %key, "No active operation to cancel");
            return false;
        };

        info!(key = %key, operation = handle.id(), "Cancelling operation");
        handle.cancel();
        handle.stopped().await;
        debug!(key = %key, "Cancelled operation has stopped");
        true
    }

    /// Cancel anything in flight, then drop our finalizer
    async fn finalize(&self, key: &ObjectKey, request: &CommandRequest) -> Result<ReconcileOutcome> {
        info!("Cleaning up deleted CommandRequest");
        self.cancel(key).await;

        if request.has_finalizer() {
            // The cancelled task has just written status, so re-read before writing
            update_with_retry(self.store.as_ref(), key, &self.retry, CommandRequest::remove_finalizer)
                .await?;
            info!("Removed finalizer");
        }

        metrics::CLEANUPS.with_label_values(&["CommandRequest"]).inc();
        Ok(ReconcileOutcome::Finalized)
    }

    async fn launch(&self, key: &ObjectKey, request: CommandRequest) -> Result<ReconcileOutcome> {
        let (handle, tracker) = Operation::start();
        if let Some(previous) = self.registry.register(key.clone(), handle) {
            warn!(operation = previous.id(), "Replacing an operation that was still registered");
            previous.cancel();
        }

        let mut running = request;
        let status = running.status_mut();
        status.phase = Some(CommandPhase::Running);
        status.start_time = Some(Utc::now());

        if let Err(e) = self.store.update_status(&running).await {
            error!(error = %e, "Unable to record Running status, not starting command");
            self.registry.release(key, tracker.id());
            return Ok(ReconcileOutcome::LaunchAborted);
        }

        info!(command = %running.spec.command, operation = tracker.id(), "Running command");

        let this = self.clone();
        let key = key.clone();
        let command = running.spec.command;
        tokio::spawn(async move {
            this.run_operation(key, command, tracker).await;
        });

        Ok(ReconcileOutcome::Launched)
    }

    /// Background half of an operation: run, record, release
    #[instrument(skip_all, fields(key = %key, operation = tracker.id()))]
    async fn run_operation(&self, key: ObjectKey, command: String, tracker: OperationTracker) {
        let execution = self.executor.run(&command, tracker.token()).await;

        match &execution.outcome {
            ExecutionOutcome::Success => {
                info!(command = %command, output = %execution.output, "Completed command");
            }
            ExecutionOutcome::Failed(reason) => {
                warn!(command = %command, reason = %reason, output = %execution.output, "Command failed");
            }
            ExecutionOutcome::Cancelled => {
                info!(command = %command, output = %execution.output, "Command operation cancelled");
            }
        }

        metrics::COMMANDS_TOTAL
            .with_label_values(&[execution.outcome.label()])
            .inc();
        metrics::COMMAND_DURATION.observe(execution.duration.as_secs_f64());

        let exit_status = execution.outcome.exit_status();
        let output = execution.output;
        let written = update_status_with_retry(self.store.as_ref(), &key, &self.retry, |status| {
            status.phase = Some(CommandPhase::Finished);
            status.output = output.clone();
            status.exit_status = exit_status.clone();
            status.completion_time = Some(Utc::now());
        })
        .await;

        match written {
            Ok(Some(_)) => debug!("Recorded command completion"),
            Ok(None) => warn!("CommandRequest vanished before completion could be recorded"),
            Err(e) => {
                error!(error = %e, "Failed to update CommandRequest status with completion");
                metrics::LOST_STATUS_UPDATES.inc();
            }
        }

        if self.registry.release(&key, tracker.id()).is_none() {
            debug!("Operation entry already taken by a cancel request");
        }
        tracker.finish();
    }
}
