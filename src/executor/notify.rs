//! Notification step backend
//!
//! Channels:
//! - `log`: the message is emitted as a tracing event
//! - `webhook`: the message is posted as JSON to the `url` parameter

use super::traits::{StepBackend, StepContext, StepError, StepFailure};
use crate::agent::Agent;
use crate::pipeline::{Step, StepType};
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Channel that writes through tracing
pub const LOG_CHANNEL: &str = "log";

/// Channel that posts to an HTTP endpoint
pub const WEBHOOK_CHANNEL: &str = "webhook";

/// Body posted to webhooks
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    pipeline: &'a str,
    stage: &'a str,
    build_id: &'a str,
    message: &'a str,
}

/// Backend for `notify` steps
#[derive(Debug, Clone, Default)]
pub struct NotifyBackend {
    client: reqwest::Client,
}

impl NotifyBackend {
    /// Creates a backend with a fresh HTTP client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn post(
        &self,
        step: &Step,
        ctx: &StepContext,
        message: &str,
    ) -> Result<String, StepFailure> {
        let url = step
            .param("url")
            .ok_or_else(|| StepError::MissingParam("url".to_string()))?;
        let url = url::Url::parse(&ctx.env.resolve(url))
            .map_err(|e| StepError::Backend(format!("invalid webhook url: {e}")))?;

        let payload = WebhookPayload {
            pipeline: &ctx.pipeline,
            stage: &ctx.stage,
            build_id: &ctx.build_id,
            message,
        };

        let response = self
            .client
            .post(url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| StepError::Backend(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StepError::Backend(format!("webhook {url} answered {status}")).into());
        }
        Ok(format!("posted to {url}"))
    }
}

#[async_trait]
impl StepBackend for NotifyBackend {
    async fn execute(
        &self,
        step: &Step,
        agent: &Agent,
        ctx: &StepContext,
    ) -> Result<String, StepFailure> {
        let StepType::Notify {
            ref channel,
            ref message,
        } = step.step_type
        else {
            return Err(StepError::Backend(format!(
                "notify backend cannot run '{}' steps",
                step.action_type()
            ))
            .into());
        };

        let message = ctx.environment_for(agent).resolve(message);
        match channel.as_str() {
            LOG_CHANNEL => {
                info!(
                    target: "stageline::notify",
                    pipeline = %ctx.pipeline,
                    stage = %ctx.stage,
                    "{message}"
                );
                Ok(message)
            }
            WEBHOOK_CHANNEL => self.post(step, ctx, &message).await,
            other => Err(StepError::Backend(format!("unknown notify channel '{other}'")).into()),
        }
    }
}
