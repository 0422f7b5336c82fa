//! Reconcilers for the Command Operator CRDs
//!
//! This module contains the business logic for reconciling each CRD type.
//! Reconcilers are responsible for:
//! - Starting, cancelling and finalizing command operations
//! - Retrying status writes that lose optimistic-concurrency races
//! - Deriving server hostnames for inventories

pub mod command;
pub mod inventory;
pub mod status;

pub use command::{CommandReconciler, ReconcileOutcome};
pub use status::RetryPolicy;
