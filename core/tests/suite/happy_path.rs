use std::sync::Arc;

use concerto_core::SubmitParams;
use concerto_core::submit;
use concerto_protocol::JobStatus;
use concerto_protocol::Phase;
use concerto_protocol::RunStatus;
use engine_test_support::MockWorkspace;
use engine_test_support::ScriptedAgents;
use engine_test_support::TEST_REPO_URL;
use engine_test_support::TestHarness;
use engine_test_support::drain_queue;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn full_pipeline_reaches_pr() {
    let harness = TestHarness::new().await;
    let run_id = harness.submit_task("hello").await;
    let worker = harness.worker(Arc::new(ScriptedAgents::new()), Arc::new(MockWorkspace));

    drain_queue(&worker, 30).await;

    for artifact in [
        "plan.json",
        "handoff.implementor.json",
        "implementor.json",
        "handoff.review.json",
        "review.json",
        "handoff.test.json",
        "test.json",
        "pr-draft.json",
    ] {
        assert!(
            harness.artifact_exists(&run_id, artifact).await,
            "missing {artifact}"
        );
    }
    assert_eq!(
        harness.artifact_json(&run_id, "review.json").await["decision"],
        "approved"
    );
    assert_eq!(
        harness.artifact_json(&run_id, "test.json").await["status"],
        "passed"
    );
    assert_eq!(
        harness.artifact_json(&run_id, "pr-draft.json").await["status"],
        "ready_for_review"
    );

    let handoff = harness.read_handoff(&run_id).await;
    assert_eq!(handoff.state.phase, Phase::Pr);
    assert_eq!(handoff.state.status, RunStatus::Completed);
    assert_eq!(handoff.state.history.len(), 5);
    assert_eq!(
        handoff
            .state
            .history
            .iter()
            .map(|entry| entry.phase)
            .collect::<Vec<_>>(),
        vec![
            Phase::Plan,
            Phase::Implement,
            Phase::Review,
            Phase::Test,
            Phase::Pr
        ]
    );
    assert!(handoff.next.is_none());
    // Plan stored the workspace coordinates back into the handoff.
    assert!(!handoff.run.repo.root.is_empty());
    assert!(handoff.run.repo.branch.starts_with("concerto/"));

    let jobs = harness.store.jobs_for_run(&run_id).await.expect("jobs");
    assert_eq!(jobs.len(), 5);
    assert_eq!(
        jobs.iter().map(|job| job.phase).collect::<Vec<_>>(),
        vec![
            Phase::Plan,
            Phase::Implement,
            Phase::Review,
            Phase::Test,
            Phase::Pr
        ]
    );
    assert!(jobs.iter().all(|job| job.status == JobStatus::Done));
    assert_eq!(jobs.iter().map(|job| job.attempt).collect::<Vec<_>>(), vec![1; 5]);

    // keep_workspace is false: the clone is gone after pr.
    assert!(!harness.config.workspace_dir(&run_id).exists());
}

#[tokio::test]
async fn skipped_tests_still_reach_pr() {
    let harness = TestHarness::new().await;
    let run_id = harness.submit_task("docs only").await;
    let worker = harness.worker(
        Arc::new(ScriptedAgents::without_tests()),
        Arc::new(MockWorkspace),
    );

    drain_queue(&worker, 30).await;

    let test_artifact = harness.artifact_json(&run_id, "test.json").await;
    assert_eq!(test_artifact["status"], "passed");
    assert_eq!(test_artifact["skipped"], true);

    let handoff = harness.read_handoff(&run_id).await;
    assert_eq!(handoff.state.status, RunStatus::Completed);
    assert_eq!(
        handoff
            .constraints
            .as_ref()
            .and_then(|constraints| constraints.require_tests_for_behavior_change),
        Some(false)
    );
}

#[tokio::test]
async fn submit_warns_when_no_worker_is_draining() {
    let harness = TestHarness::new().await;
    let submission = submit(
        &harness.config,
        &harness.store,
        SubmitParams {
            task: "hello".to_string(),
            repo_url: TEST_REPO_URL.to_string(),
            keep_workspace: false,
            base_branch: None,
        },
    )
    .await
    .expect("submit");
    assert!(!submission.worker_detected);

    let handoff = harness.read_handoff(&submission.run_id).await;
    assert_eq!(handoff.state.phase, Phase::Plan);
    assert_eq!(handoff.state.status, RunStatus::Queued);
    assert_eq!(handoff.state.iteration, 1);
    assert_eq!(
        handoff.next.as_ref().map(|next| next.agent.as_str()),
        Some("planner")
    );
}

#[tokio::test]
async fn keep_workspace_preserves_the_clone() {
    let harness = TestHarness::new().await;
    let submission = submit(
        &harness.config,
        &harness.store,
        SubmitParams {
            task: "hello".to_string(),
            repo_url: TEST_REPO_URL.to_string(),
            keep_workspace: true,
            base_branch: Some("develop".to_string()),
        },
    )
    .await
    .expect("submit");
    let worker = harness.worker(Arc::new(ScriptedAgents::new()), Arc::new(MockWorkspace));

    drain_queue(&worker, 30).await;

    let handoff = harness.read_handoff(&submission.run_id).await;
    assert_eq!(handoff.state.status, RunStatus::Completed);
    assert_eq!(handoff.run.repo.base_branch, "develop");
    assert!(harness.config.workspace_dir(&submission.run_id).exists());
}
