//! ServerInventory Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label key carried by server pods
pub const SERVER_LABEL: &str = "olivetree.dev/daos";

/// Label value identifying server pods
pub const SERVER_LABEL_VALUE: &str = "server";

/// Namespace the server pods run in
pub const SERVER_NAMESPACE: &str = "olivetree-system";

/// ServerInventory resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "olivetree.dev",
    version = "v1alpha1",
    kind = "ServerInventory",
    plural = "serverinventories",
    singular = "serverinventory",
    shortname = "sinv",
    namespaced,
    status = "ServerInventoryStatus",
    printcolumn = r#"{"name": "Servers", "type": "string", "jsonPath": ".status.hostnames"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServerInventorySpec {
    /// Namespace to search for server pods (defaults to olivetree-system)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Command the inventory was requested for; informational only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// ServerInventory status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerInventoryStatus {
    /// DNS names of the server pods
    #[serde(default)]
    pub hostnames: Vec<String>,
}

impl ServerInventorySpec {
    /// Namespace to list server pods in
    pub fn server_namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(SERVER_NAMESPACE)
    }
}
