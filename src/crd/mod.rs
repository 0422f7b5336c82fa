//! Custom Resource Definitions for the Command Operator

mod command_request;
mod server_inventory;

pub use command_request::*;
pub use server_inventory::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![
        serde_yaml::to_string(&CommandRequest::crd())?,
        serde_yaml::to_string(&ServerInventory::crd())?,
    ])
}
