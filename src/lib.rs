//! Command Operator
//!
//! This operator runs external commands declared as `CommandRequest` custom
//! resources, tracks each run so it can be cancelled while in flight, and
//! records the output and exit status back on the resource.

pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod reconcilers;
pub mod registry;
pub mod store;

pub use error::{Error, Result};
