//! ObjectStore backed by the Kubernetes API server

use async_trait::async_trait;
use kube::{api::PostParams, Api, Client};

use super::{ObjectKey, ObjectStore};
use crate::crd::CommandRequest;
use crate::error::{Error, Result};

/// Reads and writes CommandRequest objects through `kube::Api`
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<CommandRequest> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a 409 from the API server onto the operator's conflict error
fn map_write_error(key: &ObjectKey, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => Error::conflict(key, resp.message),
        other => Error::Kube(other),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<CommandRequest>> {
        Ok(self.api(&key.namespace).get_opt(&key.name).await?)
    }

    async fn update(&self, obj: &CommandRequest) -> Result<CommandRequest> {
        let key = ObjectKey::of(obj)?;
        self.api(&key.namespace)
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_write_error(&key, e))
    }

    async fn update_status(&self, obj: &CommandRequest) -> Result<CommandRequest> {
        let key = ObjectKey::of(obj)?;
        let body = serde_json::to_vec(obj)?;
        self.api(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| map_write_error(&key, e))
    }
}
