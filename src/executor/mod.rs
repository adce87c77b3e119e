//! Step execution layer
//!
//! [`StepExecutor`] runs exactly one step on a borrowed agent through the
//! backend registered for its action type and reports a [`StepResult`].

mod deploy;
mod notify;
mod registry;
mod shell;
mod traits;

pub use deploy::DeployBackend;
pub use notify::{LOG_CHANNEL, NotifyBackend, WEBHOOK_CHANNEL};
pub use registry::{FnBackend, StepRegistry};
pub use shell::{ShellBackend, ShellConfig, ShellResult, run_shell};
pub use traits::{StepBackend, StepContext, StepError, StepFailure, StepResult, StepStatus};

use crate::agent::Agent;
use crate::pipeline::Step;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Runs single steps through a [`StepRegistry`]
#[derive(Debug, Clone)]
pub struct StepExecutor {
    registry: StepRegistry,
    default_timeout: Option<Duration>,
}

impl Default for StepExecutor {
    fn default() -> Self {
        Self::new(StepRegistry::builtin("sh"))
    }
}

impl StepExecutor {
    /// Executor over `registry`
    #[must_use]
    pub fn new(registry: StepRegistry) -> Self {
        Self {
            registry,
            default_timeout: None,
        }
    }

    /// Timeout applied to steps that do not declare one
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// The registry steps are resolved against
    #[must_use]
    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Executes `step` on `agent`.
    ///
    /// Never retries. An unregistered action type fails with
    /// [`StepError::UnsupportedStep`].
    pub async fn execute(&self, step: &Step, agent: &Agent, ctx: &StepContext) -> StepResult {
        let action = step.action_type();
        let Some(backend) = self.registry.get(action) else {
            warn!(stage = %ctx.stage, %action, "Unsupported step type");
            return StepResult::failure(
                StepError::UnsupportedStep {
                    action: action.to_string(),
                },
                String::new(),
            );
        };

        debug!(stage = %ctx.stage, agent = %agent.id, step = %step.label(), "Executing step");
        let start = Instant::now();
        let outcome = match step.timeout().or(self.default_timeout) {
            Some(limit) => match tokio::time::timeout(limit, backend.execute(step, agent, ctx)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(StepFailure::new(StepError::Timeout {
                    secs: limit.as_secs(),
                })),
            },
            None => backend.execute(step, agent, ctx).await,
        };

        let result = match outcome {
            Ok(output) => StepResult::success(output),
            Err(failure) => StepResult::failure(failure.error, failure.output),
        };
        result.with_duration(start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Environment;

    fn ctx() -> StepContext {
        StepContext::new("web", "Build", "run-1", Environment::new())
    }

    #[tokio::test]
    async fn test_unsupported_step_fails() {
        let executor = StepExecutor::default();
        let result = executor
            .execute(&Step::custom("slack"), &Agent::new("local"), &ctx())
            .await;

        assert_eq!(result.status, StepStatus::Failure);
        assert_eq!(
            result.error,
            Some(StepError::UnsupportedStep {
                action: "slack".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_shell_step_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Agent::new("local").with_workspace(dir.path());
        let result = StepExecutor::default()
            .execute(&Step::shell("echo built"), &agent, &ctx())
            .await;

        assert!(result.is_success());
        assert_eq!(result.output.trim(), "built");
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Agent::new("local").with_workspace(dir.path());
        let step = Step::shell("sleep 5").with_timeout(Duration::from_secs(1));

        let result = StepExecutor::default().execute(&step, &agent, &ctx()).await;
        assert_eq!(result.error, Some(StepError::Timeout { secs: 1 }));
    }

    #[tokio::test]
    async fn test_default_timeout_applies() {
        let registry = StepRegistry::new().with(
            "wait",
            FnBackend::new(|_: &Step, _: &Agent, _: &StepContext| Ok("instant".to_string())),
        );
        let executor = StepExecutor::new(registry).with_default_timeout(Some(Duration::from_secs(5)));

        let result = executor
            .execute(&Step::custom("wait"), &Agent::new("local"), &ctx())
            .await;
        assert!(result.is_success());
        assert_eq!(result.output, "instant");
    }
}
