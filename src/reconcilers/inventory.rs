//! ServerInventory reconciler
//!
//! Looks up the server pods and turns their addresses into pod DNS names.

use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{ListParams, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use serde_json::json;
use tracing::{debug, info};

use crate::crd::{ServerInventory, SERVER_LABEL, SERVER_LABEL_VALUE};
use crate::error::Result;

/// Cluster DNS suffix for pod A records
pub const POD_DNS_SUFFIX: &str = "pod.cluster.local";

/// DNS name of a pod with address `ip` in `namespace`
///
/// `10.1.2.3` in `olivetree-system` becomes
/// `10-1-2-3.olivetree-system.pod.cluster.local`.
pub fn pod_hostname(ip: &str, namespace: &str) -> String {
    format!("{}.{}.{}", ip.replace('.', "-"), namespace, POD_DNS_SUFFIX)
}

/// Hostnames for every pod that has an address assigned
pub fn hostnames_for(pods: &[Pod], namespace: &str) -> Vec<String> {
    pods.iter()
        .filter_map(|pod| {
            let ip = pod
                .status
                .as_ref()
                .and_then(|s| s.pod_ip.as_deref())
                .filter(|ip| !ip.is_empty());
            if ip.is_none() {
                debug!(pod = %pod.name_any(), "Server pod has no address yet");
            }
            ip.map(|ip| pod_hostname(ip, namespace))
        })
        .collect()
}

/// Label selector matching the server pods
pub fn server_selector() -> String {
    format!("{}={}", SERVER_LABEL, SERVER_LABEL_VALUE)
}

/// List the server pods in `namespace` and derive their hostnames
pub async fn server_hostnames(client: &Client, namespace: &str) -> Result<Vec<String>> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let list = pods
        .list(&ListParams::default().labels(&server_selector()))
        .await?;
    Ok(hostnames_for(&list.items, namespace))
}

/// Record the hostnames in status if they changed
pub async fn update_status_hostnames(
    inventory: &ServerInventory,
    client: &Client,
    namespace: &str,
    hostnames: &[String],
) -> Result<()> {
    let current = inventory.status.as_ref().map(|s| s.hostnames.as_slice());
    if current == Some(hostnames) {
        return Ok(());
    }

    let name = inventory.name_any();
    let api: Api<ServerInventory> = Api::namespaced(client.clone(), namespace);
    let status = json!({
        "status": {
            "hostnames": hostnames,
        }
    });
    api.patch_status(&name, &PatchParams::apply("command-operator"), &Patch::Merge(status))
        .await?;

    info!(name = %name, servers = hostnames.len(), "Updated server inventory");
    Ok(())
}
