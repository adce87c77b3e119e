//! Pipeline scheduler
//!
//! Walks a [`StageGraph`] and drives every stage to a terminal status:
//!
//! ```text
//! pending -> eligible -> running -> success | failure | aborted
//!        \-> skipped
//! ```
//!
//! A single loop owns the run record. Stage tasks run concurrently in a
//! [`JoinSet`] and report back over a channel; a node is only evaluated
//! after every predecessor's terminal status has been written.
//!
//! A failure or skip keeps travelling downstream through fail-safe stages:
//! those run anyway, but every non-fail-safe descendant is still skipped.

mod task;

use crate::agent::AgentPool;
use crate::executor::{StepContext, StepExecutor};
use crate::graph::{EdgeKind, Node, NodeId, StageGraph};
use crate::pipeline::{GuardContext, RunStatus, StageStatus};
use crate::run::{CANCELLED_REASON, SharedRecord, StageCompletion};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use task::{StageJob, StageOutcome, TaskEvent, run_stage};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What the loop decided for a node whose predecessors are all terminal
#[derive(Debug, Clone, PartialEq, Eq)]
enum Decision {
    /// Ends without running
    Resolve(StageStatus, String),
    /// Join with nothing to run
    Succeed,
    /// Hand to a stage task
    Dispatch,
}

/// Runs compiled graphs against an agent pool
#[derive(Debug, Clone)]
pub struct Scheduler {
    pool: AgentPool,
    executor: Arc<StepExecutor>,
    agent_timeout: Option<Duration>,
    retry_backoff: Option<Duration>,
}

impl Scheduler {
    /// Scheduler leasing agents from `pool`
    #[must_use]
    pub fn new(pool: AgentPool, executor: Arc<StepExecutor>) -> Self {
        Self {
            pool,
            executor,
            agent_timeout: None,
            retry_backoff: None,
        }
    }

    /// Agent wait limit for pipelines that do not set one
    #[must_use]
    pub fn with_agent_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.agent_timeout = timeout;
        self
    }

    /// Pause between retries of a failing step
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Option<Duration>) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// The pool stages lease agents from
    #[must_use]
    pub fn pool(&self) -> &AgentPool {
        &self.pool
    }

    /// The executor stages run steps through
    #[must_use]
    pub fn executor(&self) -> &Arc<StepExecutor> {
        &self.executor
    }

    /// Agent wait limit for pipelines that do not set one
    #[must_use]
    pub fn agent_timeout(&self) -> Option<Duration> {
        self.agent_timeout
    }

    /// Runs `graph` to completion, writing progress into `record`.
    ///
    /// Returns the aggregate of the stage statuses, so a stage failure makes
    /// the run fail even when it was cancelled afterwards. A cancelled run
    /// without failed stages is [`RunStatus::Aborted`]. Execution errors never
    /// escape; they end up as stage statuses and reasons.
    pub async fn run(
        &self,
        graph: &StageGraph,
        record: &SharedRecord,
        token: &CancellationToken,
    ) -> RunStatus {
        let run_id = record.read().id.clone();
        info!(pipeline = %graph.name(), run = %run_id, stages = graph.stages().count(), "Run started");

        let mut states = vec![StageStatus::Pending; graph.nodes().len()];
        states[NodeId::ENTRY.index()] = StageStatus::Success;
        // Reason a node sits downstream of a failure or skip, if it does.
        let mut broken: Vec<Option<String>> = vec![None; graph.nodes().len()];

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks: JoinSet<(NodeId, StageOutcome)> = JoinSet::new();
        let mut cancelled = false;

        loop {
            if !cancelled && token.is_cancelled() {
                cancelled = true;
                info!(run = %run_id, "Cancellation requested");
            }

            if cancelled {
                skip_pending(graph, &mut states, record);
            } else {
                for id in advance(graph, &mut states, &mut broken, record) {
                    let Some(node) = graph.node(id) else {
                        continue;
                    };
                    self.dispatch(graph, node, &run_id, &mut tasks, &tx, token);
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                Some(event) = rx.recv() => {
                    let TaskEvent::Started { node, agent } = event;
                    states[node.index()] = StageStatus::Running;
                    if let Some(node) = graph.node(node) {
                        info!(stage = %node.name, %agent, "Stage running");
                        record.write().mark_running(&node.name, Some(&agent));
                    }
                }
                Some(joined) = tasks.join_next() => {
                    match joined {
                        Ok((id, outcome)) => finish(graph, &mut states, record, id, outcome),
                        Err(e) => error!(error = %e, "Stage task lost"),
                    }
                }
                () = token.cancelled(), if !cancelled => {}
            }
        }

        // Only reachable if a task was lost without reporting.
        for node in graph.stages() {
            let state = &mut states[node.id.index()];
            if !state.is_terminal() {
                *state = StageStatus::Failure;
                record
                    .write()
                    .resolve_stage(&node.name, StageStatus::Failure, "stage task lost");
            }
        }

        let status = overall_status(graph, &states, cancelled);
        info!(pipeline = %graph.name(), run = %run_id, %status, "Stages finished");
        status
    }

    fn dispatch(
        &self,
        graph: &StageGraph,
        node: &Node,
        run_id: &str,
        tasks: &mut JoinSet<(NodeId, StageOutcome)>,
        tx: &mpsc::UnboundedSender<TaskEvent>,
        token: &CancellationToken,
    ) {
        debug!(stage = %node.name, agent = %node.agent, "Dispatching stage");
        let id = node.id;
        let job = StageJob {
            node: node.clone(),
            ctx: StepContext::new(
                graph.name(),
                node.name.clone(),
                run_id,
                graph.environment().clone(),
            ),
            pool: self.pool.clone(),
            executor: Arc::clone(&self.executor),
            token: token.clone(),
            events: tx.clone(),
            agent_timeout: graph.agent_timeout().or(self.agent_timeout),
            retry_backoff: self.retry_backoff,
        };
        tasks.spawn(async move {
            let outcome = AssertUnwindSafe(run_stage(job))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| StageOutcome::panicked());
            (id, outcome)
        });
    }
}

/// A failed stage decides the run even if cancellation came later.
fn overall_status(graph: &StageGraph, states: &[StageStatus], cancelled: bool) -> RunStatus {
    let failed = graph
        .stages()
        .any(|node| states[node.id.index()] == StageStatus::Failure);
    if cancelled && !failed {
        RunStatus::Aborted
    } else {
        RunStatus::aggregate(graph.stages().map(|node| states[node.id.index()]))
    }
}

/// Resolves every pending node whose predecessors are terminal and returns
/// the ones to dispatch.
fn advance(
    graph: &StageGraph,
    states: &mut [StageStatus],
    broken: &mut [Option<String>],
    record: &SharedRecord,
) -> Vec<NodeId> {
    let mut dispatch = Vec::new();

    for &id in graph.topological_order() {
        if states[id.index()] != StageStatus::Pending {
            continue;
        }
        let Some(node) = graph.node(id) else {
            continue;
        };
        if graph
            .incoming(id)
            .any(|edge| !states[edge.from.index()].is_terminal())
        {
            continue;
        }

        let upstream = upstream_break(graph, node, states, broken);
        let decision = decide(graph, node, states, upstream.as_deref(), record);
        broken[id.index()] = upstream;

        match decision {
            Decision::Resolve(status, reason) => {
                info!(stage = %node.name, %status, %reason, "Stage not run");
                states[id.index()] = status;
                record.write().resolve_stage(&node.name, status, reason);
            }
            Decision::Succeed => {
                states[id.index()] = StageStatus::Success;
                record.write().finish_stage(
                    &node.name,
                    StageCompletion {
                        status: StageStatus::Success,
                        output: String::new(),
                        error: None,
                        reason: None,
                        attempts: 0,
                        agent: None,
                    },
                );
            }
            Decision::Dispatch => {
                states[id.index()] = StageStatus::Eligible;
                record.write().mark_eligible(&node.name);
                dispatch.push(id);
            }
        }
    }

    dispatch
}

/// Why `node` is downstream of a failed, skipped or aborted stage.
///
/// Direct predecessors are checked first; otherwise the reason is inherited
/// from a predecessor that itself sits behind a break. Joins only inherit,
/// their branch outcomes are aggregated in [`decide`].
fn upstream_break(
    graph: &StageGraph,
    node: &Node,
    states: &[StageStatus],
    broken: &[Option<String>],
) -> Option<String> {
    let mut inherited = None;
    for edge in graph.incoming(node.id).filter(|edge| edge.kind.is_blocking()) {
        let status = states[edge.from.index()];
        if !node.is_join()
            && matches!(
                status,
                StageStatus::Failure | StageStatus::Skipped | StageStatus::Aborted
            )
        {
            let name = graph.node(edge.from).map_or("?", |n| n.name.as_str());
            return Some(format!("upstream stage '{name}' ended {status}"));
        }
        if inherited.is_none() {
            inherited.clone_from(&broken[edge.from.index()]);
        }
    }
    inherited
}

fn decide(
    graph: &StageGraph,
    node: &Node,
    states: &[StageStatus],
    upstream: Option<&str>,
    record: &SharedRecord,
) -> Decision {
    let name_of = |id: NodeId| graph.node(id).map_or("?", |n| n.name.as_str());

    if node.is_join() {
        let branches: Vec<NodeId> = graph
            .incoming(node.id)
            .filter(|edge| edge.kind == EdgeKind::FanIn)
            .map(|edge| edge.from)
            .collect();

        let broken = branches.iter().find(|&&branch| {
            matches!(
                states[branch.index()],
                StageStatus::Failure | StageStatus::Aborted
            )
        });
        if let Some(&branch) = broken
            && !node.fail_safe
        {
            let status = states[branch.index()];
            return Decision::Resolve(
                StageStatus::Failure,
                format!("branch '{}' ended {status}", name_of(branch)),
            );
        }
        if !branches.is_empty()
            && branches
                .iter()
                .all(|branch| states[branch.index()].is_skipped())
        {
            return Decision::Resolve(StageStatus::Skipped, "all branches skipped".to_string());
        }
        if let Some(reason) = upstream
            && !node.fail_safe
        {
            return Decision::Resolve(StageStatus::Skipped, reason.to_string());
        }
        if node.steps.is_empty() {
            return Decision::Succeed;
        }
        return Decision::Dispatch;
    }

    if let Some(reason) = upstream {
        if !node.fail_safe {
            return Decision::Resolve(StageStatus::Skipped, reason.to_string());
        }
        debug!(stage = %node.name, %reason, "Fail-safe stage ignores upstream result");
    }

    if let Some(ref guard) = node.guard {
        let stages = record.read().statuses();
        let ctx = GuardContext {
            stages: &stages,
            env: graph.environment(),
        };
        if !guard.evaluate(&ctx) {
            return Decision::Resolve(StageStatus::Skipped, format!("guard not met: {guard}"));
        }
    }

    Decision::Dispatch
}

fn finish(
    graph: &StageGraph,
    states: &mut [StageStatus],
    record: &SharedRecord,
    id: NodeId,
    outcome: StageOutcome,
) {
    states[id.index()] = outcome.status;
    let Some(node) = graph.node(id) else {
        return;
    };

    match outcome.status {
        StageStatus::Success => info!(stage = %node.name, attempts = outcome.attempts, "Stage succeeded"),
        status => warn!(
            stage = %node.name,
            %status,
            error = outcome.error.as_deref().unwrap_or("-"),
            "Stage did not succeed"
        ),
    }

    record.write().finish_stage(
        &node.name,
        StageCompletion {
            status: outcome.status,
            output: outcome.output,
            error: outcome.error,
            reason: outcome.reason,
            attempts: outcome.attempts,
            agent: outcome.agent,
        },
    );
}

fn skip_pending(graph: &StageGraph, states: &mut [StageStatus], record: &SharedRecord) {
    for node in graph.stages() {
        let state = &mut states[node.id.index()];
        if *state == StageStatus::Pending {
            *state = StageStatus::Skipped;
            record
                .write()
                .resolve_stage(&node.name, StageStatus::Skipped, CANCELLED_REASON);
        }
    }
}
