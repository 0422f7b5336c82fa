//! CommandRequest Custom Resource Definition

use std::fmt;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer that holds a CommandRequest until its operation has been cancelled
pub const COMMAND_FINALIZER: &str = "olivetree.dev/command-finalizer";

/// CommandRequest resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "olivetree.dev",
    version = "v1alpha1",
    kind = "CommandRequest",
    plural = "commandrequests",
    singular = "commandrequest",
    shortname = "cmdreq",
    namespaced,
    status = "CommandRequestStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Command", "type": "string", "jsonPath": ".spec.command"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequestSpec {
    /// Command line to execute, split on whitespace into program and arguments
    #[serde(default)]
    pub command: String,

    /// Set to true to cancel the command while it is running
    #[serde(default)]
    pub cancel: bool,
}

/// Lifecycle phase of a CommandRequest
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum CommandPhase {
    Running,
    Finished,
}

impl fmt::Display for CommandPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandPhase::Running => f.write_str("Running"),
            CommandPhase::Finished => f.write_str("Finished"),
        }
    }
}

/// CommandRequest status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequestStatus {
    /// Current phase; unset until the command has been launched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<CommandPhase>,

    /// Combined stdout and stderr of the command
    #[serde(default)]
    pub output: String,

    /// Exit summary; empty on success
    #[serde(default)]
    pub exit_status: String,

    /// When the command was launched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// When the command result was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

impl CommandRequest {
    /// Phase recorded in status, if any
    pub fn phase(&self) -> Option<CommandPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Whether the object has been marked for deletion
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == COMMAND_FINALIZER))
    }

    /// Adds the command finalizer; returns false if it was already present
    pub fn add_finalizer(&mut self) -> bool {
        if self.has_finalizer() {
            return false;
        }
        self.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(COMMAND_FINALIZER.to_string());
        true
    }

    /// Removes the command finalizer; returns false if it was absent
    pub fn remove_finalizer(&mut self) -> bool {
        let Some(finalizers) = self.metadata.finalizers.as_mut() else {
            return false;
        };
        let before = finalizers.len();
        finalizers.retain(|name| name != COMMAND_FINALIZER);
        before != finalizers.len()
    }

    /// Mutable status, created on first access
    pub fn status_mut(&mut self) -> &mut CommandRequestStatus {
        self.status.get_or_insert_with(CommandRequestStatus::default)
    }
}
