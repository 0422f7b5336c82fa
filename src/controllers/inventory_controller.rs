//! ServerInventory controller
//!
//! Watches ServerInventory resources and reports the server pod hostnames.

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
use crate::crd::ServerInventory;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::inventory as inventory_reconciler;

/// How often hostnames are refreshed without a change to the inventory itself
const REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Run the ServerInventory controller
pub async fn run(context: Arc<Context>) {
    let api = context.watch_api::<ServerInventory>();

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("ServerInventory CRD not installed: {}", e);
        return;
    }

    info!("Starting ServerInventory controller");

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            if let Err(e) = result {
                error!(error = %e, "Reconciliation error");
                metrics::RECONCILIATION_ERRORS
                    .with_label_values(&["ServerInventory"])
                    .inc();
            }
        })
        .await;
}

/// Main reconciliation function
#[instrument(skip(ctx, obj), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<ServerInventory>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&["ServerInventory"])
        .start_timer();
    metrics::RECONCILIATIONS
        .with_label_values(&["ServerInventory"])
        .inc();

    if let Some(command) = &obj.spec.command {
        info!(command = %command, "Inventory requested");
    }

    let server_namespace = obj.spec.server_namespace();
    let hostnames = inventory_reconciler::server_hostnames(&ctx.client, server_namespace)
        .await
        .inspect_err(|e| error!(error = %e, "Unable to get server hostnames"))?;
    info!(hostnames = ?hostnames, "Servers");

    let namespace = obj.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
    inventory_reconciler::update_status_hostnames(&obj, &ctx.client, &namespace, &hostnames).await?;

    Ok(Action::requeue(REFRESH_INTERVAL))
}

/// Error policy for the controller
fn error_policy(obj: Arc<ServerInventory>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        name = %obj.name_any(),
        error = %error,
        "Reconciliation failed, scheduling retry"
    );
    Action::requeue(Duration::from_secs(30))
}
