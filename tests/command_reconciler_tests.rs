//! Integration tests for the CommandRequest reconciler
//!
//! These tests drive the reconciler against the in-memory object store and
//! real child processes, calling `reconcile` the way watch events would.

use std::sync::Arc;
use std::time::Duration;

use command_operator::crd::{CommandPhase, CommandRequest, CommandRequestSpec};
use command_operator::executor::{CommandExecutor, CANCELLED_EXIT_STATUS, NO_COMMAND_EXIT_STATUS};
use command_operator::reconcilers::{CommandReconciler, ReconcileOutcome, RetryPolicy};
use command_operator::registry::OperationRegistry;
use command_operator::store::{MemoryStore, ObjectKey};
use tokio_test::assert_ok;

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    store: Arc<MemoryStore>,
    registry: Arc<OperationRegistry>,
    reconciler: CommandReconciler,
}

impl Harness {
    fn new() -> Self {
        Self::with_policy(RetryPolicy::new(5, Duration::from_millis(1)))
    }

    fn with_policy(policy: RetryPolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(OperationRegistry::new());
        let reconciler = CommandReconciler::new(
            store.clone(),
            registry.clone(),
            CommandExecutor::new(),
            policy,
        );
        Self {
            store,
            registry,
            reconciler,
        }
    }

    fn create(&self, name: &str, command: &str) -> ObjectKey {
        let mut request = CommandRequest::new(
            name,
            CommandRequestSpec {
                command: command.to_string(),
                cancel: false,
            },
        );
        request.metadata.namespace = Some("default".to_string());
        self.store.create(request).unwrap();
        ObjectKey::new("default", name)
    }

    /// Create the object and reconcile it through finalizer and launch
    async fn launch(&self, name: &str, command: &str) -> ObjectKey {
        let key = self.create(name, command);
        assert_eq!(
            assert_ok!(self.reconciler.reconcile(&key).await),
            ReconcileOutcome::FinalizerAdded
        );
        assert_eq!(
            assert_ok!(self.reconciler.reconcile(&key).await),
            ReconcileOutcome::Launched
        );
        key
    }

    fn phase(&self, key: &ObjectKey) -> Option<CommandPhase> {
        self.store.snapshot(key).and_then(|obj| obj.phase())
    }

    fn status_field(&self, key: &ObjectKey, field: fn(&CommandRequest) -> String) -> String {
        self.store.snapshot(key).map(|obj| field(&obj)).unwrap_or_default()
    }

    fn output(&self, key: &ObjectKey) -> String {
        self.status_field(key, |obj| {
            obj.status.as_ref().map(|s| s.output.clone()).unwrap_or_default()
        })
    }

    fn exit_status(&self, key: &ObjectKey) -> String {
        self.status_field(key, |obj| {
            obj.status
                .as_ref()
                .map(|s| s.exit_status.clone())
                .unwrap_or_default()
        })
    }

    /// Wait for the background task to record completion and release its entry
    async fn wait_finished(&self, key: &ObjectKey) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if self.phase(key) == Some(CommandPhase::Finished) && !self.registry.contains(key) {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("{} did not finish, phase {:?}", key, self.phase(key));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn missing_object_is_not_an_error() {
    let harness = Harness::new();
    let key = ObjectKey::new("default", "ghost");

    let outcome = assert_ok!(harness.reconciler.reconcile(&key).await);
    assert_eq!(outcome, ReconcileOutcome::NotFound);
}

#[tokio::test]
async fn first_reconcile_only_adds_finalizer() {
    let harness = Harness::new();
    let key = harness.create("first", "true");

    let outcome = assert_ok!(harness.reconciler.reconcile(&key).await);
    assert_eq!(outcome, ReconcileOutcome::FinalizerAdded);

    let stored = harness.store.snapshot(&key).unwrap();
    assert!(stored.has_finalizer());
    assert_eq!(stored.phase(), None);
    assert!(harness.registry.is_empty());
}

#[tokio::test]
async fn true_command_runs_to_finished() {
    let harness = Harness::new();
    let key = harness.launch("ok", "true").await;

    // The background task has not been polled yet on this runtime
    assert_eq!(harness.phase(&key), Some(CommandPhase::Running));
    assert!(harness.registry.contains(&key));

    harness.wait_finished(&key).await;
    assert_eq!(harness.output(&key), "");
    assert_eq!(harness.exit_status(&key), "");

    let status = harness.store.snapshot(&key).unwrap().status.unwrap();
    assert!(status.start_time.is_some());
    assert!(status.completion_time >= status.start_time);
}

#[tokio::test]
async fn output_is_captured() {
    let harness = Harness::new();
    let key = harness.launch("echo", "echo hello   world").await;

    harness.wait_finished(&key).await;
    assert_eq!(harness.output(&key), "hello world\n");
    assert_eq!(harness.exit_status(&key), "");
}

#[tokio::test]
async fn empty_command_finishes_with_error() {
    let harness = Harness::new();
    let key = harness.launch("empty", "").await;

    harness.wait_finished(&key).await;
    assert_eq!(harness.exit_status(&key), NO_COMMAND_EXIT_STATUS);
    assert_eq!(harness.output(&key), "");
}

#[tokio::test]
async fn non_zero_exit_is_recorded() {
    let harness = Harness::new();
    let key = harness.launch("false", "false").await;

    harness.wait_finished(&key).await;
    assert_eq!(harness.exit_status(&key), "exit status 1");
}

#[tokio::test]
async fn unknown_program_is_recorded() {
    let harness = Harness::new();
    let key = harness
        .launch("missing", "definitely-not-a-real-program-7f3a --flag")
        .await;

    harness.wait_finished(&key).await;
    assert!(harness
        .exit_status(&key)
        .starts_with("failed to start definitely-not-a-real-program-7f3a"));
}

#[tokio::test]
async fn replayed_events_never_launch_twice() {
    let harness = Harness::new();
    let key = harness.launch("replay", "sleep 30").await;

    for _ in 0..3 {
        let outcome = assert_ok!(harness.reconciler.reconcile(&key).await);
        assert_eq!(outcome, ReconcileOutcome::Unchanged);
    }
    assert_eq!(harness.registry.len(), 1);
    assert_eq!(harness.store.status_writes(&key), 1);

    harness.reconciler.cancel(&key).await;
    harness.wait_finished(&key).await;
}

#[tokio::test]
async fn finished_object_stays_finished() {
    let harness = Harness::new();
    let key = harness.launch("done", "true").await;
    harness.wait_finished(&key).await;
    let writes = harness.store.status_writes(&key);

    let outcome = assert_ok!(harness.reconciler.reconcile(&key).await);
    assert_eq!(outcome, ReconcileOutcome::Unchanged);

    // Cancelling after the fact changes nothing either
    harness.store.modify(&key, |obj| obj.spec.cancel = true);
    let outcome = assert_ok!(harness.reconciler.reconcile(&key).await);
    assert_eq!(outcome, ReconcileOutcome::Unchanged);
    assert_eq!(harness.store.status_writes(&key), writes);
    assert_eq!(harness.exit_status(&key), "");
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancel_flag_stops_running_command() {
    let harness = Harness::new();
    let key = harness.launch("cancel", "sleep 30").await;

    harness.store.modify(&key, |obj| obj.spec.cancel = true);
    let outcome = assert_ok!(
        tokio::time::timeout(Duration::from_secs(10), harness.reconciler.reconcile(&key))
            .await
            .expect("cancel did not quiesce")
    );
    assert_eq!(outcome, ReconcileOutcome::CancelRequested);

    // Cancel waits for the background task, so the result is already recorded
    assert!(!harness.registry.contains(&key));
    assert_eq!(harness.phase(&key), Some(CommandPhase::Finished));
    assert_eq!(harness.exit_status(&key), CANCELLED_EXIT_STATUS);
}

#[tokio::test]
async fn cancel_without_operation_is_a_noop() {
    let harness = Harness::new();
    let key = harness.create("idle", "true");

    assert!(!harness.reconciler.cancel(&key).await);
    assert!(!harness.reconciler.cancel(&key).await);
}

#[tokio::test]
async fn cancel_before_launch_never_starts_command() {
    let harness = Harness::new();
    let key = harness.create("early", "sleep 30");
    harness.store.modify(&key, |obj| obj.spec.cancel = true);

    assert_eq!(
        assert_ok!(harness.reconciler.reconcile(&key).await),
        ReconcileOutcome::FinalizerAdded
    );
    assert_eq!(
        assert_ok!(harness.reconciler.reconcile(&key).await),
        ReconcileOutcome::CancelRequested
    );
    assert_eq!(harness.phase(&key), None);
    assert!(harness.registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_completion_cleans_up_once() {
    let harness = Harness::new();

    for i in 0..20 {
        let key = harness.launch(&format!("race-{}", i), "true").await;

        let reconciler = harness.reconciler.clone();
        let cancel_key = key.clone();
        let cancel = tokio::spawn(async move { reconciler.cancel(&cancel_key).await });

        cancel.await.unwrap();
        harness.wait_finished(&key).await;

        // One Running write plus exactly one completion write, whoever won
        assert_eq!(harness.store.status_writes(&key), 2, "iteration {}", i);
        assert!(!harness.registry.contains(&key));
    }
    assert!(harness.registry.is_empty());
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn deleting_running_object_cancels_then_releases() {
    let harness = Harness::new();
    let key = harness.launch("doomed", "sleep 30").await;

    assert!(harness.store.delete(&key));
    assert!(harness.store.snapshot(&key).unwrap().is_deleting());

    let outcome = assert_ok!(
        tokio::time::timeout(Duration::from_secs(10), harness.reconciler.reconcile(&key))
            .await
            .expect("deletion did not quiesce")
    );
    assert_eq!(outcome, ReconcileOutcome::Finalized);

    // Completion was written before the finalizer came off
    assert_eq!(harness.store.status_writes(&key), 2);
    assert!(harness.registry.is_empty());
    assert!(harness.store.snapshot(&key).is_none());

    let outcome = assert_ok!(harness.reconciler.reconcile(&key).await);
    assert_eq!(outcome, ReconcileOutcome::NotFound);
}

#[tokio::test]
async fn deleting_object_is_not_held_up_by_background_children() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("spawns-background.sh");
    std::fs::write(&script, "sleep 30 &\nsleep 30\n").unwrap();

    let harness = Harness::new();
    let command = format!("sh {}", script.display());
    let key = harness.launch("orphans", &command).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    harness.store.delete(&key);
    let outcome = assert_ok!(
        tokio::time::timeout(Duration::from_secs(5), harness.reconciler.reconcile(&key))
            .await
            .expect("deletion waited for processes left behind by the command")
    );

    assert_eq!(outcome, ReconcileOutcome::Finalized);
    assert!(harness.registry.is_empty());
    assert!(harness.store.snapshot(&key).is_none());
}

#[tokio::test]
async fn deleting_finished_object_removes_finalizer() {
    let harness = Harness::new();
    let key = harness.launch("old", "true").await;
    harness.wait_finished(&key).await;

    harness.store.delete(&key);
    let outcome = assert_ok!(harness.reconciler.reconcile(&key).await);
    assert_eq!(outcome, ReconcileOutcome::Finalized);
    assert!(harness.store.snapshot(&key).is_none());
}

#[tokio::test]
async fn deleting_without_finalizer_needs_no_cleanup() {
    let harness = Harness::new();
    let key = harness.create("unmanaged", "true");

    harness.store.delete(&key);
    let outcome = assert_ok!(harness.reconciler.reconcile(&key).await);
    assert_eq!(outcome, ReconcileOutcome::NotFound);
}

// ============================================================================
// Conflicts
// ============================================================================

#[tokio::test]
async fn completion_survives_status_conflicts() {
    let harness = Harness::new();
    let key = harness.launch("contended", "echo done").await;

    // Two concurrent writers beat the completion write before it lands
    harness.store.inject_conflicts(&key, 2);

    harness.wait_finished(&key).await;
    assert_eq!(harness.output(&key), "done\n");
    assert_eq!(harness.exit_status(&key), "");
}

#[tokio::test]
async fn exhausted_retries_lose_update_but_release_entry() {
    let harness = Harness::with_policy(RetryPolicy::new(3, Duration::from_millis(1)));
    let key = harness.launch("lost", "true").await;
    harness.store.inject_conflicts(&key, 10);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while harness.registry.contains(&key) {
        assert!(tokio::time::Instant::now() < deadline, "entry was never released");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The lost update leaves the object Running for operators to notice
    assert_eq!(harness.phase(&key), Some(CommandPhase::Running));
    assert_eq!(harness.store.status_writes(&key), 1);
}

#[tokio::test]
async fn failed_running_write_aborts_launch() {
    let harness = Harness::new();
    let key = harness.create("aborted", "true");
    assert_ok!(harness.reconciler.reconcile(&key).await);

    harness.store.inject_conflicts(&key, 1);
    let outcome = assert_ok!(harness.reconciler.reconcile(&key).await);
    assert_eq!(outcome, ReconcileOutcome::LaunchAborted);
    assert!(harness.registry.is_empty());
    assert_eq!(harness.phase(&key), None);

    // A later pass launches normally
    let outcome = assert_ok!(harness.reconciler.reconcile(&key).await);
    assert_eq!(outcome, ReconcileOutcome::Launched);
    harness.wait_finished(&key).await;
}

#[tokio::test]
async fn stale_finalizer_write_surfaces_conflict() {
    let harness = Harness::new();
    let key = harness.create("stale", "true");

    harness.store.inject_conflicts(&key, 1);
    let err = harness.reconciler.reconcile(&key).await.unwrap_err();
    assert!(err.is_conflict());

    // Redelivery converges
    let outcome = assert_ok!(harness.reconciler.reconcile(&key).await);
    assert_eq!(outcome, ReconcileOutcome::FinalizerAdded);
}
