//! Kubernetes controllers for the Command Operator CRDs
//!
//! This module contains the controller implementations that watch for CRD changes
//! and trigger reconciliation.

mod command_controller;
mod inventory_controller;

pub use command_controller::run as run_command_controller;
pub use inventory_controller::run as run_inventory_controller;

use kube::{core::NamespaceResourceScope, Api, Client, Resource};

use crate::reconcilers::CommandReconciler;

/// Shared context for all controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// CommandRequest reconciler, owner of the operation registry
    pub commands: CommandReconciler,
    /// Restrict watches to this namespace
    pub watch_namespace: Option<String>,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, commands: CommandReconciler, watch_namespace: Option<String>) -> Self {
        Self {
            client,
            commands,
            watch_namespace,
        }
    }

    /// Api for watching `K`, scoped to the watch namespace if one is set
    pub fn watch_api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.watch_namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }
}
