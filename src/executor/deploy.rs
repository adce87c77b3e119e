//! Deploy step backend
//!
//! A deploy step runs its `command` parameter on the agent with
//! `DEPLOY_TARGET` exported. Without a command the deployment is only
//! recorded, which is what dry runs and tests rely on.

use super::shell::ShellBackend;
use super::traits::{StepBackend, StepContext, StepError, StepFailure};
use crate::agent::Agent;
use crate::pipeline::{Step, StepType};
use async_trait::async_trait;
use tracing::info;

/// Backend for `deploy` steps
#[derive(Debug, Clone, Default)]
pub struct DeployBackend {
    shell: ShellBackend,
}

impl DeployBackend {
    /// Deploy backend running commands through `shell`
    #[must_use]
    pub fn new(shell: ShellBackend) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl StepBackend for DeployBackend {
    async fn execute(
        &self,
        step: &Step,
        agent: &Agent,
        ctx: &StepContext,
    ) -> Result<String, StepFailure> {
        let StepType::Deploy { ref target } = step.step_type else {
            return Err(StepError::Backend(format!(
                "deploy backend cannot run '{}' steps",
                step.action_type()
            ))
            .into());
        };

        let mut config = self.shell.config_for(agent, ctx);
        let target = config.env.resolve(target);
        config.env = config.env.set("DEPLOY_TARGET", target.clone());

        info!(stage = %ctx.stage, agent = %agent.id, %target, "Deploying");
        match step.param("command") {
            Some(command) => self.shell.run(command, &config).await,
            None => Ok(format!("deployed to {target}")),
        }
    }
}
