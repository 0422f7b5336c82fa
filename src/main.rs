//! Command Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client,
//! registers CRD controllers, and runs the reconciliation loops.

use std::sync::Arc;

use clap::Parser;
use futures::future::{self, BoxFuture, FutureExt};
use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use command_operator::{
    config::{ControllerKind, OperatorConfig},
    controllers::{self, Context},
    executor::CommandExecutor,
    metrics,
    reconcilers::CommandReconciler,
    registry::OperationRegistry,
    store::KubeStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();

    // Initialize tracing
    init_tracing();

    config.validate()?;
    info!(?config, "Starting Command Operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    // The registry lives as long as the operator; it is the only record of
    // which commands are in flight
    let registry = Arc::new(OperationRegistry::new());
    let commands = CommandReconciler::new(
        Arc::new(KubeStore::new(client.clone())),
        registry.clone(),
        CommandExecutor::new(),
        config.retry_policy(),
    );

    // Create shared context
    let context = Arc::new(Context::new(
        client,
        commands,
        config.watch_namespace.clone(),
    ));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    let mut running: Vec<BoxFuture<'static, &'static str>> = Vec::new();
    if config.runs(ControllerKind::Command) {
        running.push(
            controllers::run_command_controller(context.clone())
                .map(|_| "CommandRequest")
                .boxed(),
        );
    }
    if config.runs(ControllerKind::Inventory) {
        running.push(
            controllers::run_inventory_controller(context.clone())
                .map(|_| "ServerInventory")
                .boxed(),
        );
    }

    // Handle graceful shutdown
    tokio::select! {
        (name, _, _) = future::select_all(running) => {
            error!("{} controller exited unexpectedly", name);
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    if !registry.is_empty() {
        info!(
            in_flight = registry.len(),
            "Stopping with commands still running; they are left in Running"
        );
    }

    info!("Command Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
