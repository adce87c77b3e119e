//! Work done for one dispatched node

use crate::agent::{AgentError, AgentLease, AgentPool};
use crate::executor::{StepContext, StepError, StepExecutor};
use crate::graph::{Node, NodeId};
use crate::pipeline::{AgentRequirement, StageStatus};
use crate::run::CANCELLED_REASON;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Progress reported by a stage task before it finishes
#[derive(Debug)]
pub(crate) enum TaskEvent {
    /// An agent was leased and steps are about to run
    Started { node: NodeId, agent: String },
}

/// Terminal result of a stage task
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StageOutcome {
    pub status: StageStatus,
    pub output: String,
    pub error: Option<String>,
    pub reason: Option<String>,
    pub attempts: u32,
    pub agent: Option<String>,
}

impl StageOutcome {
    fn not_run(status: StageStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            output: String::new(),
            error: None,
            reason: Some(reason.into()),
            attempts: 0,
            agent: None,
        }
    }

    pub(crate) fn panicked() -> Self {
        Self {
            status: StageStatus::Failure,
            output: String::new(),
            error: Some("stage task panicked".to_string()),
            reason: None,
            attempts: 0,
            agent: None,
        }
    }
}

/// Everything a stage task owns
pub(crate) struct StageJob {
    pub node: Node,
    pub ctx: StepContext,
    pub pool: AgentPool,
    pub executor: Arc<StepExecutor>,
    pub token: CancellationToken,
    pub events: mpsc::UnboundedSender<TaskEvent>,
    pub agent_timeout: Option<Duration>,
    pub retry_backoff: Option<Duration>,
}

async fn acquire(
    pool: &AgentPool,
    requirement: &AgentRequirement,
    timeout: Option<Duration>,
) -> Result<AgentLease, AgentError> {
    match timeout {
        Some(timeout) => pool.acquire_timeout(requirement, timeout).await,
        None => pool.acquire(requirement).await,
    }
}

/// Acquires an agent, runs the node's steps in order and releases the agent.
///
/// Cancellation is observed while waiting for an agent and between steps.
pub(crate) async fn run_stage(job: StageJob) -> StageOutcome {
    let StageJob {
        node,
        ctx,
        pool,
        executor,
        token,
        events,
        agent_timeout,
        retry_backoff,
    } = job;

    let acquired = tokio::select! {
        biased;
        () = token.cancelled() => {
            return StageOutcome::not_run(StageStatus::Skipped, CANCELLED_REASON);
        }
        acquired = acquire(&pool, &node.agent, agent_timeout) => acquired,
    };
    let lease = match acquired {
        Ok(lease) => lease,
        Err(e) => {
            warn!(stage = %node.name, error = %e, "Stage could not get an agent");
            return StageOutcome::not_run(StageStatus::Failure, e.to_string());
        }
    };

    let agent_id = lease.id().to_string();
    // The receiver lives as long as the scheduler loop.
    let _ = events.send(TaskEvent::Started {
        node: node.id,
        agent: agent_id.clone(),
    });

    let mut outcome = StageOutcome {
        status: StageStatus::Success,
        output: String::new(),
        error: None,
        reason: None,
        attempts: 1,
        agent: Some(agent_id),
    };

    if token.is_cancelled() {
        outcome.status = StageStatus::Aborted;
        outcome.reason = Some(CANCELLED_REASON.to_string());
        return outcome;
    }

    for resolved in &node.steps {
        if !resolved.supported {
            let error = StepError::UnsupportedStep {
                action: resolved.step.action_type().to_string(),
            };
            outcome.status = StageStatus::Failure;
            outcome.error = Some(error.to_string());
            return outcome;
        }

        let mut retries = 0;
        loop {
            let result = executor.execute(&resolved.step, lease.agent(), &ctx).await;
            outcome.output.push_str(&result.output);
            if result.is_success() {
                break;
            }

            let retryable = !matches!(result.error, Some(StepError::UnsupportedStep { .. }));
            if !retryable || retries >= node.retry || token.is_cancelled() {
                outcome.status = StageStatus::Failure;
                outcome.error = result.error.map(|e| e.to_string());
                return outcome;
            }

            retries += 1;
            outcome.attempts += 1;
            warn!(
                stage = %node.name,
                step = %resolved.step.label(),
                attempt = retries,
                of = node.retry,
                "Retrying failed step"
            );
            if let Some(backoff) = retry_backoff {
                tokio::time::sleep(backoff).await;
            }
        }

        if token.is_cancelled() {
            debug!(stage = %node.name, "Cancelled between steps");
            outcome.status = StageStatus::Aborted;
            outcome.reason = Some(CANCELLED_REASON.to_string());
            return outcome;
        }
    }

    outcome
}
