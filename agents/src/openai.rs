use async_trait::async_trait;
use concerto_core::agents::AgentError;
use concerto_core::agents::ImplementRequest;
use concerto_core::agents::PhaseAgents;
use concerto_core::agents::PlanRequest;
use concerto_core::agents::ReviewRequest;
use concerto_core::agents::TestRequest;
use concerto_protocol::ImplementorStepResult;
use concerto_protocol::PlanArtifact;
use concerto_protocol::ReviewArtifact;
use concerto_protocol::TestArtifact;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::tester::run_test_command;

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Error)]
pub enum OpenAiSetupError {
    #[error("{OPENAI_API_KEY_ENV} is not set")]
    MissingApiKey,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub planner_model: String,
    pub implementor_model: String,
    pub reviewer_model: String,
    pub tester_model: String,
}

impl OpenAiConfig {
    pub fn from_env() -> Result<Self, OpenAiSetupError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Per-phase model selection: `OPENAI_<PHASE>_MODEL`, falling back
    /// to `OPENAI_MODEL`, falling back to the default.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, OpenAiSetupError> {
        let api_key = lookup(OPENAI_API_KEY_ENV)
            .filter(|value| !value.is_empty())
            .ok_or(OpenAiSetupError::MissingApiKey)?;
        let default_model = lookup("OPENAI_MODEL")
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let model_for = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default_model.clone())
        };
        Ok(Self {
            api_key,
            base_url: lookup("OPENAI_BASE_URL")
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            planner_model: model_for("OPENAI_PLANNER_MODEL"),
            implementor_model: model_for("OPENAI_IMPLEMENTOR_MODEL"),
            reviewer_model: model_for("OPENAI_REVIEWER_MODEL"),
            tester_model: model_for("OPENAI_TESTER_MODEL"),
        })
    }
}

pub struct OpenAiAgents {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiAgents {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn from_env() -> Result<Self, OpenAiSetupError> {
        Ok(Self::new(OpenAiConfig::from_env()?))
    }

    /// One chat-completion round that must answer with a single JSON
    /// document matching `T`.
    async fn complete_json<T: DeserializeOwned>(
        &self,
        model: &str,
        system: &str,
        user: String,
    ) -> Result<T, AgentError> {
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let url = format!("{}/chat/completions", self.config.base_url);
        debug!(model, "calling chat completions");
        let response = self
            .client
            .post(url)
            .bearer_auth(self.config.api_key.as_str())
            .json(&request)
            .send()
            .await
            .map_err(|err| AgentError::new(format!("request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::new(format!(
                "chat completions returned {status}: {body}"
            )));
        }
        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|err| AgentError::new(format!("malformed completion response: {err}")))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AgentError::new("completion carried no choices"))?;
        let payload = extract_json_block(content.as_str());
        serde_json::from_str(payload)
            .map_err(|err| AgentError::new(format!("executor reply is not the expected JSON: {err}")))
    }
}

#[async_trait]
impl PhaseAgents for OpenAiAgents {
    async fn plan(&self, request: PlanRequest<'_>) -> Result<PlanArtifact, AgentError> {
        let user = serde_json::to_string_pretty(&serde_json::json!({
            "task": request.handoff.task.prompt,
            "repoRoot": request.repo_root,
            "baseBranch": request.handoff.run.repo.base_branch,
        }))
        .map_err(|err| AgentError::new(err.to_string()))?;
        self.complete_json(self.config.planner_model.as_str(), PLANNER_SYSTEM, user)
            .await
    }

    async fn implement_step(
        &self,
        request: ImplementRequest<'_>,
    ) -> Result<ImplementorStepResult, AgentError> {
        let user = serde_json::to_string_pretty(&serde_json::json!({
            "step": request.step,
            "handoff": request.handoff,
        }))
        .map_err(|err| AgentError::new(err.to_string()))?;
        self.complete_json(self.config.implementor_model.as_str(), IMPLEMENTOR_SYSTEM, user)
            .await
    }

    async fn review(&self, request: ReviewRequest<'_>) -> Result<ReviewArtifact, AgentError> {
        let user = serde_json::to_string_pretty(&serde_json::json!({
            "handoff": request.handoff,
            "implementor": request.implementor,
        }))
        .map_err(|err| AgentError::new(err.to_string()))?;
        self.complete_json(self.config.reviewer_model.as_str(), REVIEWER_SYSTEM, user)
            .await
    }

    /// The tester is not a model call: it runs the planned test command
    /// in the workspace, subject to the shell allowlist.
    async fn test(&self, request: TestRequest<'_>) -> Result<TestArtifact, AgentError> {
        let command = request
            .test_command
            .ok_or_else(|| AgentError::new("no test command configured"))?;
        run_test_command(command, request.test_framework, request.repo_root).await
    }
}

/// Models sometimes wrap JSON in a markdown fence despite the response
/// format; strip it before parsing.
fn extract_json_block(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map_or(rest, str::trim)
}

const PLANNER_SYSTEM: &str = "You are the planning agent of a code-modification pipeline. \
Answer with one JSON object: {\"tasks\": [{\"id\", \"description\", \"requiresTests\"}], \
\"allowed_files\": [..], \"steps\": [{\"id\", \"file\", \"description\"}], \
\"test_command\"?, \"test_framework\"?, \"summary\"?}. Globs are allowed in \
allowed_files and steps[].file.";

const IMPLEMENTOR_SYSTEM: &str = "You are the implementing agent of a code-modification \
pipeline. Given one plan step and the current file contents, answer with one JSON \
object carrying either {\"actions\": [{\"path\", \"action\": \"write\"|\"delete\", \
\"content\"?}]} or {\"diff\": \"<unified diff>\"}; optionally add \"summary\". \
Touch only files listed in the plan's allowed_files.";

const REVIEWER_SYSTEM: &str = "You are the reviewing agent of a code-modification \
pipeline. Answer with one JSON object: {\"decision\": \"approved\"|\"rejected\"|\"blocked\", \
\"reasons\": [..], \"notes\"?}. Use rejected for fixable problems and blocked only \
when the run must stop.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}
