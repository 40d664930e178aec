use std::sync::Arc;

use concerto_protocol::JobStatus;
use concerto_protocol::Phase;
use concerto_protocol::RunStatus;
use engine_test_support::MockWorkspace;
use engine_test_support::ScriptedAgents;
use engine_test_support::TestHarness;
use engine_test_support::drain_queue;
use pretty_assertions::assert_eq;

/// Two runs, two workers, one queue. The lease keeps each run
/// single-writer while both advance; both reach pr.
#[tokio::test]
async fn two_runs_complete_under_two_workers() {
    let harness = TestHarness::new().await;
    let run_1 = harness.submit_task("first task").await;
    let run_2 = harness.submit_task("second task").await;

    let agents = Arc::new(ScriptedAgents::new());
    let workspace = Arc::new(MockWorkspace);
    let worker_1 = harness.worker(agents.clone(), workspace.clone());
    let worker_2 = harness.worker(agents.clone(), workspace.clone());

    let (ticks_1, ticks_2) = tokio::join!(
        drain_queue(&worker_1, 60),
        drain_queue(&worker_2, 60)
    );
    // Both workers participated or one drained everything; either way
    // the combined ticks cover all ten jobs.
    assert!(!ticks_1.is_empty() || !ticks_2.is_empty());

    for run_id in [&run_1, &run_2] {
        let handoff = harness.read_handoff(run_id).await;
        assert_eq!(handoff.state.phase, Phase::Pr, "run {run_id}");
        assert_eq!(handoff.state.status, RunStatus::Completed, "run {run_id}");

        let jobs = harness.store.jobs_for_run(run_id).await.expect("jobs");
        assert_eq!(jobs.len(), 5, "run {run_id}");
        assert!(jobs.iter().all(|job| job.status == JobStatus::Done));
        assert!(jobs.iter().all(|job| job.run_id == *run_id));
    }

    // Ten terminal jobs, no leases left behind.
    let stats = harness.store.stats().await.expect("stats");
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.in_progress, 0);
    assert_eq!(stats.lease_count, 0);
}
