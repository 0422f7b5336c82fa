//! Operator configuration
//!
//! Parsed from command line flags, each of which can also be supplied through
//! the environment.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{Error, Result};
use crate::reconcilers::RetryPolicy;

/// Controllers the operator can run
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ControllerKind {
    /// CommandRequest execution
    Command,
    /// ServerInventory hostname discovery
    Inventory,
}

/// Command line configuration for the operator
#[derive(Clone, Debug, Parser)]
#[command(name = "command-operator", version, about)]
pub struct OperatorConfig {
    /// Port serving /metrics and the health endpoints
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Only watch resources in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Controllers to run
    #[arg(
        long = "controller",
        env = "CONTROLLERS",
        value_enum,
        value_delimiter = ',',
        default_values_t = [ControllerKind::Command, ControllerKind::Inventory]
    )]
    pub controllers: Vec<ControllerKind>,

    /// Attempts for a status write that keeps conflicting
    #[arg(long, env = "STATUS_RETRY_STEPS", default_value_t = 5)]
    pub status_retry_steps: u32,

    /// Delay between conflicting status write attempts, in milliseconds
    #[arg(long, env = "STATUS_RETRY_DELAY_MS", default_value_t = 10)]
    pub status_retry_delay_ms: u64,
}

impl OperatorConfig {
    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.status_retry_steps == 0 {
            return Err(Error::config("status retry steps must be at least 1"));
        }
        if self.controllers.is_empty() {
            return Err(Error::config("at least one controller must be enabled"));
        }
        if self.watch_namespace.as_deref() == Some("") {
            return Err(Error::config("watch namespace must not be empty"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.status_retry_steps,
            Duration::from_millis(self.status_retry_delay_ms),
        )
    }

    pub fn runs(&self, kind: ControllerKind) -> bool {
        self.controllers.contains(&kind)
    }
}
