use std::sync::Arc;

use concerto_protocol::JobStatus;
use concerto_protocol::Phase;
use concerto_protocol::RunStatus;
use engine_test_support::MockWorkspace;
use engine_test_support::ScriptedAgents;
use engine_test_support::TestHarness;
use engine_test_support::blocked_review;
use engine_test_support::drain_queue;
use engine_test_support::rejected_review;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn rejection_within_budget_loops_back_to_implement() {
    let harness = TestHarness::new().await;
    let run_id = harness.submit_task("x").await;
    let agents = Arc::new(
        ScriptedAgents::new().script_reviews(vec![rejected_review(vec!["y"])]),
    );
    let worker = harness.worker(agents.clone(), Arc::new(MockWorkspace));

    drain_queue(&worker, 40).await;

    let handoff = harness.read_handoff(&run_id).await;
    assert_eq!(handoff.state.status, RunStatus::Completed);
    assert_eq!(handoff.state.phase, Phase::Pr);
    // The rejection consumed one iteration of the review budget.
    assert_eq!(handoff.state.iteration, 2);
    assert!(
        handoff
            .notes
            .iter()
            .any(|note| note.starts_with("Reviewer rejected:"))
    );

    let jobs = harness.store.jobs_for_run(&run_id).await.expect("jobs");
    assert_eq!(
        jobs.iter().map(|job| job.phase).collect::<Vec<_>>(),
        vec![
            Phase::Plan,
            Phase::Implement,
            Phase::Review,
            Phase::Implement,
            Phase::Review,
            Phase::Test,
            Phase::Pr
        ]
    );
    assert!(jobs.iter().all(|job| job.status == JobStatus::Done));
    assert_eq!(agents.implement_calls(), 2);
}

#[tokio::test]
async fn rejection_beyond_budget_fails_the_run() {
    let harness = TestHarness::with_config(|config| config.max_review_retries = 1).await;
    let run_id = harness.submit_task("x").await;
    let agents = Arc::new(ScriptedAgents::new().script_reviews(vec![
        rejected_review(vec!["y"]),
        rejected_review(vec!["y"]),
        rejected_review(vec!["y"]),
    ]));
    let worker = harness.worker(agents, Arc::new(MockWorkspace));

    drain_queue(&worker, 40).await;

    let handoff = harness.read_handoff(&run_id).await;
    assert_eq!(handoff.state.status, RunStatus::Failed);
    assert!(handoff.next.is_none());
    assert!(
        handoff
            .notes
            .iter()
            .any(|note| note.starts_with("Reviewer rejected:")),
        "notes: {:?}",
        handoff.notes
    );

    let jobs = harness.store.jobs_for_run(&run_id).await.expect("jobs");
    assert!(jobs.iter().all(|job| job.phase != Phase::Test));
    let review = jobs
        .iter()
        .find(|job| job.phase == Phase::Review)
        .expect("review job");
    assert_eq!(review.status, JobStatus::Failed);
    assert!(
        review
            .last_error
            .as_deref()
            .is_some_and(|error| error.starts_with("Reviewer rejected:"))
    );
    assert!(harness.artifact_exists(&run_id, "review.error.json").await);
}

#[tokio::test]
async fn blocked_review_fails_immediately_despite_budget() {
    let harness = TestHarness::new().await;
    let run_id = harness.submit_task("x").await;
    let agents =
        Arc::new(ScriptedAgents::new().script_reviews(vec![blocked_review("policy violation")]));
    let worker = harness.worker(agents.clone(), Arc::new(MockWorkspace));

    drain_queue(&worker, 40).await;

    let handoff = harness.read_handoff(&run_id).await;
    assert_eq!(handoff.state.status, RunStatus::Failed);
    assert!(
        handoff
            .notes
            .iter()
            .any(|note| note.starts_with("Reviewer blocked:"))
    );
    // No second implement attempt: blocked ignores the retry budget.
    assert_eq!(agents.implement_calls(), 1);

    let jobs = harness.store.jobs_for_run(&run_id).await.expect("jobs");
    assert_eq!(
        jobs.iter()
            .filter(|job| job.phase == Phase::Implement)
            .count(),
        1
    );
}
