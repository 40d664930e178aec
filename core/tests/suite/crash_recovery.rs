use std::sync::Arc;
use std::time::Duration;

use concerto_core::WorkerTick;
use concerto_protocol::JobStatus;
use concerto_protocol::Phase;
use concerto_protocol::RunStatus;
use concerto_state::RecoveredStale;
use engine_test_support::MockWorkspace;
use engine_test_support::ScriptedAgents;
use engine_test_support::TestHarness;
use engine_test_support::drain_queue;
use pretty_assertions::assert_eq;

/// A worker that claims a job, takes the lease, and dies without acking
/// is recovered by the next worker once the lease timeout elapses; the
/// job is retried with its attempt count preserved.
#[tokio::test]
async fn crashed_worker_is_recovered_after_the_lease_timeout() {
    let harness =
        TestHarness::with_config(|config| config.lease_timeout = Duration::from_millis(150)).await;
    let run_id = harness.submit_task("hello").await;

    // Worker A: claim + lease, then crash before acking.
    let claimed = harness
        .store
        .claim_one()
        .await
        .expect("claim")
        .expect("job");
    assert_eq!(claimed.attempt, 1);
    assert!(
        harness
            .store
            .acquire_lease(&run_id, "worker-a")
            .await
            .expect("lease")
    );

    // Worker B, before the timeout: nothing claimable, lease denied.
    let worker_b = harness.worker(Arc::new(ScriptedAgents::new()), Arc::new(MockWorkspace));
    assert_eq!(worker_b.run_once().await.expect("tick"), WorkerTick::Idle);
    assert!(
        !harness
            .store
            .acquire_lease(&run_id, worker_b.owner())
            .await
            .expect("lease")
    );

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        harness.store.recover_stale().await.expect("recover"),
        RecoveredStale {
            requeued_jobs: 1,
            released_leases: 1,
        }
    );
    let reclaimed = harness
        .store
        .claim_one()
        .await
        .expect("claim")
        .expect("job");
    assert_eq!(reclaimed.id, claimed.id);
    assert_eq!(reclaimed.attempt, 2);
    // Hand it back so worker B can run the pipeline to completion.
    assert!(harness.store.requeue(reclaimed.id).await.expect("requeue"));

    drain_queue(&worker_b, 30).await;
    let handoff = harness.read_handoff(&run_id).await;
    assert_eq!(handoff.state.phase, Phase::Pr);
    assert_eq!(handoff.state.status, RunStatus::Completed);
}

#[tokio::test]
async fn attempt_budget_fails_the_job_on_the_fourth_claim() {
    let harness = TestHarness::new().await;
    let run_id = harness.submit_task("hello").await;

    // Three operational retries: claim then requeue, preserving attempt.
    for expected_attempt in 1..=3 {
        let job = harness
            .store
            .claim_one()
            .await
            .expect("claim")
            .expect("job");
        assert_eq!(job.attempt, expected_attempt);
        assert!(harness.store.requeue(job.id).await.expect("requeue"));
    }

    let worker = harness.worker(Arc::new(ScriptedAgents::new()), Arc::new(MockWorkspace));
    let tick = worker.run_once().await.expect("tick");
    assert!(
        matches!(tick, WorkerTick::MaxAttemptsExceeded { .. }),
        "unexpected tick: {tick:?}"
    );

    let jobs = harness.store.jobs_for_run(&run_id).await.expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[0].attempt, 4);
    assert_eq!(jobs[0].last_error.as_deref(), Some("Max attempts exceeded."));

    let handoff = harness.read_handoff(&run_id).await;
    assert_eq!(handoff.state.status, RunStatus::Failed);
    assert!(handoff.next.is_none());
}
