//! In-process ObjectStore
//!
//! Emulates the parts of API server behaviour the reconciler depends on:
//! resource versions with conditional writes, the status subresource split,
//! and finalizer-deferred deletion.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ErrorResponse;
use tracing::debug;

use super::{ObjectKey, ObjectStore};
use crate::crd::CommandRequest;
use crate::error::{Error, Result};

#[derive(Default)]
struct Inner {
    objects: HashMap<ObjectKey, CommandRequest>,
    last_version: u64,
    pending_conflicts: HashMap<ObjectKey, usize>,
    status_writes: HashMap<ObjectKey, usize>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    /// Store `obj`, or drop it if it is deleting and no finalizer remains
    fn commit(&mut self, key: ObjectKey, mut obj: CommandRequest) -> CommandRequest {
        obj.metadata.resource_version = Some(self.next_version());
        let finalized = obj
            .metadata
            .finalizers
            .as_ref()
            .map_or(true, |f| f.is_empty());
        if obj.is_deleting() && finalized {
            debug!(key = %key, "Last finalizer removed, deleting object");
            self.objects.remove(&key);
        } else {
            self.objects.insert(key, obj.clone());
        }
        obj
    }

    /// Load the stored object for a conditional write of `obj`
    fn check_write(&mut self, obj: &CommandRequest) -> Result<(ObjectKey, CommandRequest)> {
        let key = ObjectKey::of(obj)?;

        if let Some(remaining) = self.pending_conflicts.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                // Someone else wrote the object in the meantime
                if let Some(stored) = self.objects.get(&key).cloned() {
                    self.commit(key.clone(), stored);
                }
                return Err(Error::conflict(&key, "injected concurrent write"));
            }
        }

        let stored = self.objects.get(&key).cloned().ok_or_else(|| not_found(&key))?;
        if let Some(expected) = obj.metadata.resource_version.as_deref() {
            if stored.metadata.resource_version.as_deref() != Some(expected) {
                return Err(Error::conflict(
                    &key,
                    "the object has been modified; please apply your changes to the latest version",
                ));
            }
        }
        Ok((key, stored))
    }
}

fn not_found(key: &ObjectKey) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("commandrequests \"{}\" not found", key.name),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

/// ObjectStore keeping CommandRequest objects in memory
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new object; fails with a conflict if the key is taken
    pub fn create(&self, mut obj: CommandRequest) -> Result<CommandRequest> {
        let key = ObjectKey::of(&obj)?;
        let mut inner = self.lock();
        if inner.objects.contains_key(&key) {
            return Err(Error::conflict(&key, "already exists"));
        }
        obj.metadata.creation_timestamp = Some(Time(Utc::now()));
        obj.metadata.deletion_timestamp = None;
        Ok(inner.commit(key, obj))
    }

    /// Request deletion; objects with finalizers only get a deletion timestamp
    ///
    /// Returns false if the object does not exist.
    pub fn delete(&self, key: &ObjectKey) -> bool {
        let mut inner = self.lock();
        let Some(mut obj) = inner.objects.get(key).cloned() else {
            return false;
        };
        if obj.metadata.deletion_timestamp.is_none() {
            obj.metadata.deletion_timestamp = Some(Time(Utc::now()));
        }
        inner.commit(key.clone(), obj);
        true
    }

    /// Unconditionally edit an object, as an external client would
    pub fn modify<F>(&self, key: &ObjectKey, edit: F) -> Option<CommandRequest>
    where
        F: FnOnce(&mut CommandRequest),
    {
        let mut inner = self.lock();
        let mut obj = inner.objects.get(key).cloned()?;
        edit(&mut obj);
        Some(inner.commit(key.clone(), obj))
    }

    /// Current stored copy of an object
    pub fn snapshot(&self, key: &ObjectKey) -> Option<CommandRequest> {
        self.lock().objects.get(key).cloned()
    }

    /// Make the next `count` writes to `key` lose a race against a concurrent writer
    pub fn inject_conflicts(&self, key: &ObjectKey, count: usize) {
        self.lock().pending_conflicts.insert(key.clone(), count);
    }

    /// Number of successful status writes to `key`
    pub fn status_writes(&self, key: &ObjectKey) -> usize {
        self.lock().status_writes.get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<CommandRequest>> {
        Ok(self.snapshot(key))
    }

    async fn update(&self, obj: &CommandRequest) -> Result<CommandRequest> {
        let mut inner = self.lock();
        let (key, stored) = inner.check_write(obj)?;

        let mut next = stored.clone();
        next.metadata = obj.metadata.clone();
        next.metadata.creation_timestamp = stored.metadata.creation_timestamp.clone();
        next.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        next.spec = obj.spec.clone();
        Ok(inner.commit(key, next))
    }

    async fn update_status(&self, obj: &CommandRequest) -> Result<CommandRequest> {
        let mut inner = self.lock();
        let (key, stored) = inner.check_write(obj)?;

        let mut next = stored;
        next.status = obj.status.clone();
        *inner.status_writes.entry(key.clone()).or_insert(0) += 1;
        Ok(inner.commit(key, next))
    }
}
