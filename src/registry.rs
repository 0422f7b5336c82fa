//! Registry of in-flight command operations
//!
//! Maps an object key to the cancellation handle of the operation running for
//! it. Removal is always a single atomic lookup-and-remove, so when a cancel
//! request races a normal completion exactly one of them takes the entry and
//! the other sees nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::metrics;
use crate::store::ObjectKey;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Constructor for the two halves of an operation
pub struct Operation;

impl Operation {
    /// Create a linked handle (for the registry) and tracker (for the task)
    pub fn start() -> (OperationHandle, OperationTracker) {
        let id = NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let (stopped_tx, stopped_rx) = watch::channel(false);

        let handle = OperationHandle {
            id,
            token: token.clone(),
            stopped: stopped_rx,
        };
        let tracker = OperationTracker {
            id,
            token,
            stopped: stopped_tx,
        };
        (handle, tracker)
    }
}

/// Registry-side half: cancels the operation and waits for it to stop
#[derive(Debug)]
pub struct OperationHandle {
    id: u64,
    token: CancellationToken,
    stopped: watch::Receiver<bool>,
}

impl OperationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ask the running execution to terminate
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait until the operation has stopped and written its result
    ///
    /// Also returns if the tracker was dropped without finishing.
    pub async fn stopped(mut self) {
        let _ = self.stopped.wait_for(|done| *done).await;
    }
}

/// Task-side half: owned by the background execution
#[derive(Debug)]
pub struct OperationTracker {
    id: u64,
    token: CancellationToken,
    stopped: watch::Sender<bool>,
}

impl OperationTracker {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token the executor observes for cancellation
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal that the operation has fully quiesced
    pub fn finish(self) {
        self.stopped.send_replace(true);
    }
}

/// Concurrency-safe map from object key to active operation
#[derive(Debug, Default)]
pub struct OperationRegistry {
    entries: Mutex<HashMap<ObjectKey, OperationHandle>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ObjectKey, OperationHandle>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the handle for `key`, returning the replaced one
    pub fn register(&self, key: ObjectKey, handle: OperationHandle) -> Option<OperationHandle> {
        let mut entries = self.lock();
        let replaced = entries.insert(key, handle);
        metrics::ACTIVE_OPERATIONS.set(entries.len() as f64);
        replaced
    }

    /// Atomically take the entry for `key`
    pub fn lookup_and_remove(&self, key: &ObjectKey) -> Option<OperationHandle> {
        let mut entries = self.lock();
        let removed = entries.remove(key);
        metrics::ACTIVE_OPERATIONS.set(entries.len() as f64);
        removed
    }

    /// Atomically take the entry for `key` only if it belongs to operation `id`
    ///
    /// Used on completion so a finished operation cannot remove a newer one.
    pub fn release(&self, key: &ObjectKey, id: u64) -> Option<OperationHandle> {
        let mut entries = self.lock();
        if entries.get(key).map(OperationHandle::id) != Some(id) {
            return None;
        }
        let removed = entries.remove(key);
        metrics::ACTIVE_OPERATIONS.set(entries.len() as f64);
        removed
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
