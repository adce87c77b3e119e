//! Step execution traits
//!
//! A [`StepBackend`] performs one kind of step (shell, notify, deploy, or a
//! plugin action) against a borrowed agent. Backends never retry; retry policy
//! belongs to the scheduler.

use crate::agent::Agent;
use crate::pipeline::{Environment, Step};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a step did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StepError {
    /// No backend is registered for the action type
    #[error("Unsupported step type: '{action}'")]
    UnsupportedStep {
        /// The unknown action type
        action: String,
    },

    /// Command ran and exited non-zero
    #[error("Command exited with code {code}")]
    NonZeroExit {
        /// Exit code, -1 when killed by a signal
        code: i32,
    },

    /// Step exceeded its timeout
    #[error("Step timed out after {secs}s")]
    Timeout {
        /// Timeout in seconds
        secs: u64,
    },

    /// Process could not be started
    #[error("Failed to start command: {0}")]
    Spawn(String),

    /// Step is missing a parameter it needs
    #[error("Missing parameter '{0}'")]
    MissingParam(String),

    /// Backend-specific failure
    #[error("Step failed: {0}")]
    Backend(String),
}

/// Terminal status of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Step completed
    Success,
    /// Step failed
    Failure,
}

/// Outcome of executing one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    /// Terminal status
    pub status: StepStatus,
    /// Combined output
    pub output: String,
    /// Failure cause
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Wall time
    pub duration: Duration,
}

impl StepResult {
    /// Successful result
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Success,
            output: output.into(),
            error: None,
            duration: Duration::ZERO,
        }
    }

    /// Failed result
    #[must_use]
    pub fn failure(error: StepError, output: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failure,
            output: output.into(),
            error: Some(error),
            duration: Duration::ZERO,
        }
    }

    /// Sets the duration
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Returns true if the step succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// What a backend returns on failure: the error plus whatever was printed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    /// Failure cause
    pub error: StepError,
    /// Output produced before failing
    pub output: String,
}

impl StepFailure {
    /// Failure without output
    #[must_use]
    pub fn new(error: StepError) -> Self {
        Self {
            error,
            output: String::new(),
        }
    }

    /// Failure with output
    #[must_use]
    pub fn with_output(error: StepError, output: impl Into<String>) -> Self {
        Self {
            error,
            output: output.into(),
        }
    }
}

impl From<StepError> for StepFailure {
    fn from(error: StepError) -> Self {
        Self::new(error)
    }
}

/// Per-stage information handed to every step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    /// Pipeline name
    pub pipeline: String,
    /// Stage (or post-action) the step belongs to
    pub stage: String,
    /// Run id
    pub build_id: String,
    /// Pipeline environment
    pub env: Environment,
}

impl StepContext {
    /// Creates a context
    #[must_use]
    pub fn new(
        pipeline: impl Into<String>,
        stage: impl Into<String>,
        build_id: impl Into<String>,
        env: Environment,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            stage: stage.into(),
            build_id: build_id.into(),
            env,
        }
    }

    /// Variables visible to a step on `agent`.
    ///
    /// Pipeline variables override agent variables; the built-in variables
    /// override both.
    #[must_use]
    pub fn environment_for(&self, agent: &Agent) -> Environment {
        agent
            .env
            .merged(&self.env)
            .set("STAGE_NAME", self.stage.clone())
            .set("NODE_NAME", agent.id.clone())
            .set("WORKSPACE", agent.workspace.display().to_string())
            .set("BUILD_ID", self.build_id.clone())
            .set("JOB_NAME", self.pipeline.clone())
    }
}

impl fmt::Display for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.pipeline, self.stage, self.build_id)
    }
}

/// Performs one kind of step
#[async_trait]
pub trait StepBackend: Send + Sync {
    /// Executes `step` on `agent` and returns its output.
    ///
    /// # Errors
    ///
    /// Returns a [`StepFailure`] carrying the cause and any captured output.
    async fn execute(
        &self,
        step: &Step,
        agent: &Agent,
        ctx: &StepContext,
    ) -> Result<String, StepFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_for_layers_variables() {
        let agent = Agent::new("linux-1")
            .with_workspace("/work")
            .with_env("MODE", "agent")
            .with_env("JAVA_HOME", "/opt/jdk");
        let ctx = StepContext::new(
            "web",
            "Build",
            "run-1",
            Environment::new().set("MODE", "pipeline"),
        );

        let env = ctx.environment_for(&agent);
        assert_eq!(env.get("MODE"), Some(&"pipeline".to_string()));
        assert_eq!(env.get("JAVA_HOME"), Some(&"/opt/jdk".to_string()));
        assert_eq!(env.get("STAGE_NAME"), Some(&"Build".to_string()));
        assert_eq!(env.get("NODE_NAME"), Some(&"linux-1".to_string()));
        assert_eq!(env.get("WORKSPACE"), Some(&"/work".to_string()));
        assert_eq!(env.get("BUILD_ID"), Some(&"run-1".to_string()));
    }

    #[test]
    fn test_step_result_helpers() {
        let ok = StepResult::success("done").with_duration(Duration::from_millis(5));
        assert!(ok.is_success());
        assert_eq!(ok.duration, Duration::from_millis(5));

        let failed = StepResult::failure(StepError::NonZeroExit { code: 2 }, "boom");
        assert!(!failed.is_success());
        assert_eq!(failed.error.unwrap().to_string(), "Command exited with code 2");
    }

    #[test]
    fn test_unsupported_message() {
        let err = StepError::UnsupportedStep {
            action: "slack".to_string(),
        };
        assert_eq!(err.to_string(), "Unsupported step type: 'slack'");
    }
}
