use concerto_core::agents::AgentError;

pub const ALLOWED_SHELL_COMMANDS_ENV: &str = "ALLOWED_SHELL_COMMANDS";

/// Gate a shell command against the `ALLOWED_SHELL_COMMANDS` allowlist.
///
/// The variable holds comma-separated command names; a command passes
/// when its first word matches one of them. An unset or empty variable
/// allows everything (the gate is opt-in).
pub(crate) fn check_command_allowed(command: &str) -> Result<(), AgentError> {
    let allowlist = std::env::var(ALLOWED_SHELL_COMMANDS_ENV).unwrap_or_default();
    check_against(command, allowlist.as_str())
}

pub(crate) fn check_against(command: &str, allowlist: &str) -> Result<(), AgentError> {
    let allowlist = allowlist.trim();
    if allowlist.is_empty() {
        return Ok(());
    }
    let first_word = command.trim().split_whitespace().next().unwrap_or_default();
    let allowed = allowlist
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .any(|entry| entry == first_word);
    if allowed {
        Ok(())
    } else {
        Err(AgentError::new(format!(
            "command {first_word:?} is not in {ALLOWED_SHELL_COMMANDS_ENV}"
        )))
    }
}
