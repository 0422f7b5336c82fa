//! CommandRequest controller
//!
//! Watches CommandRequest resources and hands each event to the
//! [`CommandReconciler`](crate::reconcilers::CommandReconciler).

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    ResourceExt,
};
use tracing::{error, info, instrument};

use crate::controllers::Context;
use crate::crd::CommandRequest;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::ReconcileOutcome;
use crate::store::ObjectKey;

/// Run the CommandRequest controller
pub async fn run(context: Arc<Context>) {
    let api = context.watch_api::<CommandRequest>();

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("CommandRequest CRD not installed: {}", e);
        return;
    }

    info!("Starting CommandRequest controller");

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled CommandRequest"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS
                        .with_label_values(&["CommandRequest"])
                        .inc();
                }
            }
        })
        .await;
}

/// Main reconciliation function
#[instrument(skip(ctx, obj), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<CommandRequest>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&["CommandRequest"])
        .start_timer();
    metrics::RECONCILIATIONS
        .with_label_values(&["CommandRequest"])
        .inc();

    // The watched copy may be stale; the reconciler re-reads by key
    let key = ObjectKey::of(obj.as_ref())?;
    let outcome = ctx.commands.reconcile(&key).await?;
    Ok(requeue_action(outcome))
}

/// Follow-up scheduling for a reconcile outcome
///
/// Every write made by the reconciler produces a watch event of its own, so
/// only an aborted launch needs an explicit requeue.
fn requeue_action(outcome: ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::LaunchAborted => Action::requeue(Duration::from_secs(10)),
        _ => Action::await_change(),
    }
}

/// Error policy for the controller
fn error_policy(obj: Arc<CommandRequest>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    error!(
        name = %name,
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    let requeue_duration = match error {
        Error::Conflict { .. } => Duration::from_secs(1),
        Error::Kube(_) => Duration::from_secs(30),
        Error::Config(_) | Error::MissingObjectKey(_) => Duration::from_secs(300),
        _ => Duration::from_secs(30),
    };

    Action::requeue(requeue_duration)
}
