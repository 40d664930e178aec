use std::sync::Arc;

use concerto_core::WorkerTick;
use concerto_core::cancel_run;
use concerto_protocol::JobStatus;
use concerto_protocol::Phase;
use concerto_protocol::RunStatus;
use engine_test_support::MockWorkspace;
use engine_test_support::ScriptedAgents;
use engine_test_support::TestHarness;
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

/// Cancel lands while the planner is executing: the phase result is
/// discarded at the next handoff read, the job records the
/// cancellation, and nothing further is enqueued.
#[tokio::test]
async fn cancel_mid_flight_aborts_without_overwriting_the_handoff() {
    let harness = TestHarness::new().await;
    let run_id = harness.submit_task("hello").await;

    let started = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let agents = Arc::new(ScriptedAgents::new().gated_plan(started.clone(), gate.clone()));
    let worker = harness.worker(agents, Arc::new(MockWorkspace));

    let handle = tokio::spawn(async move { worker.run_once().await.expect("tick") });
    started.notified().await;
    cancel_run(&harness.config, &harness.store, &run_id)
        .await
        .expect("cancel");
    gate.notify_one();

    let tick = handle.await.expect("join");
    assert!(
        matches!(&tick, WorkerTick::Failed { message, .. } if message == "Run cancelled."),
        "unexpected tick: {tick:?}"
    );

    let handoff = harness.read_handoff(&run_id).await;
    assert_eq!(handoff.state.status, RunStatus::Cancelled);
    assert!(handoff.next.is_none());
    assert!(handoff.notes.iter().any(|note| note == "Cancelled by user."));

    let jobs = harness.store.jobs_for_run(&run_id).await.expect("jobs");
    assert_eq!(jobs.len(), 1, "no follow-up phase was enqueued");
    assert_eq!(jobs[0].phase, Phase::Plan);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[0].last_error.as_deref(), Some("Run cancelled."));

    assert_eq!(harness.store.get_lease(&run_id).await.expect("lease"), None);
    // The phase result was discarded before the artifact write.
    assert!(!harness.artifact_exists(&run_id, "plan.json").await);
}

#[tokio::test]
async fn cancel_before_any_worker_touches_the_run() {
    let harness = TestHarness::new().await;
    let run_id = harness.submit_task("hello").await;

    cancel_run(&harness.config, &harness.store, &run_id)
        .await
        .expect("cancel");

    // The queued job is cancelled; a worker finds nothing to claim.
    let worker = harness.worker(Arc::new(ScriptedAgents::new()), Arc::new(MockWorkspace));
    assert_eq!(worker.run_once().await.expect("tick"), WorkerTick::Idle);

    let jobs = harness.store.jobs_for_run(&run_id).await.expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Cancelled);

    let handoff = harness.read_handoff(&run_id).await;
    assert_eq!(handoff.state.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let harness = TestHarness::new().await;
    let run_id = harness.submit_task("hello").await;

    cancel_run(&harness.config, &harness.store, &run_id)
        .await
        .expect("cancel");
    let first = harness.read_handoff(&run_id).await;

    cancel_run(&harness.config, &harness.store, &run_id)
        .await
        .expect("cancel again");
    let second = harness.read_handoff(&run_id).await;

    // The second cancel changed nothing: same history, same notes.
    assert_eq!(first, second);
}
