use std::sync::Arc;

use concerto_protocol::JobStatus;
use concerto_protocol::Phase;
use concerto_protocol::RunStatus;
use engine_test_support::MockWorkspace;
use engine_test_support::ScriptedAgents;
use engine_test_support::TestHarness;
use engine_test_support::drain_queue;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn planner_failure_exhausts_retries_and_fails_the_run() {
    let harness = TestHarness::new().await;
    let run_id = harness.submit_task("hello").await;
    // The plan budget is two attempts; both fail.
    let agents = Arc::new(ScriptedAgents::new().failing_plans(2));
    let worker = harness.worker(agents, Arc::new(MockWorkspace));

    drain_queue(&worker, 20).await;

    let handoff = harness.read_handoff(&run_id).await;
    assert_eq!(handoff.state.status, RunStatus::Failed);
    assert!(handoff.next.is_none());
    assert!(
        handoff
            .notes
            .iter()
            .any(|note| note.starts_with("Planner failed:")),
        "notes: {:?}",
        handoff.notes
    );
    assert!(harness.artifact_exists(&run_id, "plan.error.json").await);
    assert!(!harness.artifact_exists(&run_id, "plan.json").await);

    let jobs = harness.store.jobs_for_run(&run_id).await.expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
}

#[tokio::test]
async fn one_planner_hiccup_is_absorbed_by_the_retry_budget() {
    let harness = TestHarness::new().await;
    let run_id = harness.submit_task("hello").await;
    let agents = Arc::new(ScriptedAgents::new().failing_plans(1));
    let worker = harness.worker(agents, Arc::new(MockWorkspace));

    drain_queue(&worker, 30).await;

    let handoff = harness.read_handoff(&run_id).await;
    assert_eq!(handoff.state.status, RunStatus::Completed);
    assert_eq!(handoff.state.phase, Phase::Pr);
}

#[tokio::test]
async fn failing_tests_fail_the_run_before_pr() {
    let harness = TestHarness::new().await;
    let run_id = harness.submit_task("hello").await;
    let agents = Arc::new(ScriptedAgents::new().failing_tests());
    let worker = harness.worker(agents, Arc::new(MockWorkspace));

    drain_queue(&worker, 30).await;

    let handoff = harness.read_handoff(&run_id).await;
    assert_eq!(handoff.state.status, RunStatus::Failed);
    assert_eq!(handoff.state.phase, Phase::Test);
    assert!(handoff.next.is_none());

    // The failing artifact was still recorded for inspection.
    assert_eq!(
        harness.artifact_json(&run_id, "test.json").await["status"],
        "failed"
    );
    assert!(harness.artifact_exists(&run_id, "test.error.json").await);

    let jobs = harness.store.jobs_for_run(&run_id).await.expect("jobs");
    assert!(jobs.iter().all(|job| job.phase != Phase::Pr));
    let test_job = jobs
        .iter()
        .find(|job| job.phase == Phase::Test)
        .expect("test job");
    assert_eq!(test_job.status, JobStatus::Failed);
    assert!(
        test_job
            .last_error
            .as_deref()
            .is_some_and(|error| error.starts_with("Tests failed"))
    );
}
