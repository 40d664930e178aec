use std::path::Path;
use std::process::Stdio;

use concerto_core::agents::AgentError;
use concerto_protocol::TestArtifact;
use tokio::process::Command;
use tracing::info;

use crate::shell_gate::check_command_allowed;

/// Cap on captured test output carried into the artifact.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Run the planned test command in the workspace and report the outcome
/// as a test artifact. A non-zero exit is a failed artifact, not an
/// executor error; the engine turns it into a run failure.
pub(crate) async fn run_test_command(
    command: &str,
    framework: Option<&str>,
    repo_root: &Path,
) -> Result<TestArtifact, AgentError> {
    check_command_allowed(command)?;
    info!(command, framework, "running tests");

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(repo_root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| AgentError::new(format!("failed to run test command: {err}")))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        combined.push_str("\n--- stderr ---\n");
        combined.push_str(stderr.as_ref());
    }
    if combined.len() > MAX_OUTPUT_BYTES {
        let mut cut = MAX_OUTPUT_BYTES;
        while !combined.is_char_boundary(cut) {
            cut -= 1;
        }
        combined.truncate(cut);
        combined.push_str("\n[output truncated]");
    }

    Ok(TestArtifact {
        status: if output.status.success() {
            TestArtifact::STATUS_PASSED.to_string()
        } else {
            "failed".to_string()
        },
        skipped: false,
        command: Some(command.to_string()),
        output: Some(combined),
    })
}
