use std::path::Path;

use async_trait::async_trait;
use concerto_protocol::ImplementorArtifact;
use concerto_protocol::ImplementorHandoff;
use concerto_protocol::ImplementorStepResult;
use concerto_protocol::PlanArtifact;
use concerto_protocol::PlanStep;
use concerto_protocol::ReviewArtifact;
use concerto_protocol::RunHandoff;
use concerto_protocol::TestArtifact;
use thiserror::Error;

/// Failure surfaced by an external phase executor.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AgentError {
    pub message: String,
}

impl AgentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub struct PlanRequest<'a> {
    pub handoff: &'a RunHandoff,
    pub repo_root: &'a Path,
}

pub struct ImplementRequest<'a> {
    pub handoff: &'a ImplementorHandoff,
    pub step: &'a PlanStep,
    pub repo_root: &'a Path,
}

pub struct ReviewRequest<'a> {
    pub handoff: &'a ImplementorHandoff,
    pub implementor: &'a ImplementorArtifact,
    pub repo_root: &'a Path,
}

pub struct TestRequest<'a> {
    pub handoff: &'a RunHandoff,
    pub test_command: Option<&'a str>,
    pub test_framework: Option<&'a str>,
    pub repo_root: &'a Path,
}

/// The four external phase executors.
///
/// The engine treats artifact content opaquely beyond the fields the
/// state machine reads; executors are free to enrich their artifacts.
/// Implementations live outside the engine (`concerto-agents` in this
/// workspace) and are injected into the worker at startup.
#[async_trait]
pub trait PhaseAgents: Send + Sync {
    async fn plan(&self, request: PlanRequest<'_>) -> Result<PlanArtifact, AgentError>;

    async fn implement_step(
        &self,
        request: ImplementRequest<'_>,
    ) -> Result<ImplementorStepResult, AgentError>;

    async fn review(&self, request: ReviewRequest<'_>) -> Result<ReviewArtifact, AgentError>;

    async fn test(&self, request: TestRequest<'_>) -> Result<TestArtifact, AgentError>;
}
