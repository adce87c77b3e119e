//! Shell step backend
//!
//! Runs `sh` steps through `<shell> -c` in the agent workspace. The step sees
//! the agent and pipeline environment plus the built-in variables:
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `WORKSPACE` | Agent workspace directory |
//! | `BUILD_ID` | Run id |
//! | `JOB_NAME` | Pipeline name |
//! | `STAGE_NAME` | Name of the current stage |
//! | `NODE_NAME` | Name of the agent |
//!
//! `${VAR}` references in the command are expanded before the shell sees it.

use super::traits::{StepBackend, StepContext, StepError, StepFailure};
use crate::agent::Agent;
use crate::pipeline::{Environment, Step, StepType};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Shell execution configuration
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Working directory
    pub cwd: PathBuf,

    /// Environment variables
    pub env: Environment,

    /// Shell to use, with optional leading arguments (default: sh)
    pub shell: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            cwd: std::env::temp_dir(),
            env: Environment::new(),
            shell: "sh".to_string(),
        }
    }
}

/// Result of shell command execution
#[derive(Debug, Clone)]
pub struct ShellResult {
    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Exit code
    pub exit_code: i32,

    /// Duration of execution
    pub duration: Duration,
}

impl ShellResult {
    /// Returns true if command succeeded (exit code 0)
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr
    #[must_use]
    pub fn combined_output(&self) -> String {
        let mut output = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&self.stderr);
        }
        output
    }
}

/// Runs `command` with `config`, capturing its output.
///
/// The child is killed if the returned future is dropped, so callers can
/// bound it with a timeout.
///
/// # Errors
///
/// Returns [`StepError::Spawn`] if the shell line cannot be parsed or the
/// shell cannot be started.
pub async fn run_shell(command: &str, config: &ShellConfig) -> Result<ShellResult, StepError> {
    let expanded = config.env.resolve(command);
    debug!(command = %expanded, cwd = %config.cwd.display(), "Executing shell command");

    let words = shell_words::split(&config.shell)
        .map_err(|e| StepError::Spawn(format!("invalid shell '{}': {e}", config.shell)))?;
    let Some((program, args)) = words.split_first() else {
        return Err(StepError::Spawn("shell is empty".to_string()));
    };

    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .arg("-c")
        .arg(&expanded)
        .current_dir(&config.cwd)
        .envs(config.env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| StepError::Spawn(format!("{}: {e}", config.shell)))?;

    Ok(ShellResult {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
        duration: start.elapsed(),
    })
}

/// Backend for `sh` steps
#[derive(Debug, Clone)]
pub struct ShellBackend {
    shell: String,
}

impl Default for ShellBackend {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl ShellBackend {
    /// Backend running commands through `shell -c`
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Shell configuration for a step on `agent`
    #[must_use]
    pub fn config_for(&self, agent: &Agent, ctx: &StepContext) -> ShellConfig {
        ShellConfig {
            cwd: agent.workspace.clone(),
            env: ctx.environment_for(agent),
            shell: self.shell.clone(),
        }
    }

    /// Runs one command and maps a non-zero exit to a failure.
    ///
    /// # Errors
    ///
    /// Returns a [`StepFailure`] if the shell cannot start or the command
    /// exits non-zero.
    pub async fn run(&self, command: &str, config: &ShellConfig) -> Result<String, StepFailure> {
        let result = run_shell(command, config).await?;
        let output = result.combined_output();

        if result.is_success() {
            Ok(output)
        } else {
            warn!(
                exit_code = result.exit_code,
                stderr = %result.stderr.trim_end(),
                "Shell command failed"
            );
            Err(StepFailure::with_output(
                StepError::NonZeroExit {
                    code: result.exit_code,
                },
                output,
            ))
        }
    }
}

#[async_trait]
impl StepBackend for ShellBackend {
    async fn execute(
        &self,
        step: &Step,
        agent: &Agent,
        ctx: &StepContext,
    ) -> Result<String, StepFailure> {
        let StepType::Shell { ref command } = step.step_type else {
            return Err(StepError::Backend(format!(
                "shell backend cannot run '{}' steps",
                step.action_type()
            ))
            .into());
        };

        let config = self.config_for(agent, ctx);
        self.run(command, &config).await
    }
}
