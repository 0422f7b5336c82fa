//! Object store collaborator
//!
//! The reconciler only ever talks to CommandRequest objects through the
//! [`ObjectStore`] trait: a keyed get plus optimistic-concurrency updates of the
//! main resource and of its status. [`KubeStore`] talks to the API server,
//! [`MemoryStore`] keeps everything in process.

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

use std::fmt;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};

use crate::crd::CommandRequest;
use crate::error::{Error, Result};

/// Namespace-qualified identity of a resource object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object
    pub fn of<K: Resource>(obj: &K) -> Result<Self> {
        let name = obj.meta().name.clone().ok_or(Error::MissingObjectKey("name"))?;
        let namespace = obj.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Storage for CommandRequest objects with optimistic concurrency
///
/// Both update calls are conditional on `metadata.resourceVersion` of the
/// passed object and fail with [`Error::Conflict`] if the stored object has
/// changed since it was read.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the current object; `None` if it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<CommandRequest>>;

    /// Replace metadata and spec, ignoring status
    async fn update(&self, obj: &CommandRequest) -> Result<CommandRequest>;

    /// Replace status, ignoring metadata and spec
    async fn update_status(&self, obj: &CommandRequest) -> Result<CommandRequest>;
}
