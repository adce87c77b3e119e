//! Run controller
//!
//! Compiles a pipeline, launches the scheduler on its own task and runs the
//! matching post-actions once the stages are done. Callers hold a
//! [`RunHandle`] to cancel, observe or await the run.

use super::record::{PostActionRecord, RunRecord, SharedRecord};
use crate::agent::AgentPool;
use crate::executor::{StepContext, StepError, StepExecutor};
use crate::graph::{CompiledPost, Compiler, StageGraph};
use crate::infrastructure::MetricsCollector;
use crate::pipeline::{CompileError, PipelineDefinition, RunStatus, Script, StageStatus};
use crate::scheduler::Scheduler;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// Handle to a launched run
pub struct RunHandle {
    id: String,
    record: SharedRecord,
    token: CancellationToken,
    task: JoinHandle<RunStatus>,
}

impl RunHandle {
    /// Run id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Copy of the record as it is right now
    #[must_use]
    pub fn snapshot(&self) -> RunRecord {
        self.record.read().clone()
    }

    /// Requests cooperative cancellation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token cancelling this run, for signal handlers and watchdogs
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Returns true once the run, post-actions included, has ended
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHandle")
            .field("id", &self.id)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Starts and supervises pipeline runs
#[derive(Debug, Clone)]
pub struct RunController {
    compiler: Compiler,
    scheduler: Scheduler,
    metrics: MetricsCollector,
}

impl RunController {
    /// Controller over `pool`, resolving steps against the executor's registry
    #[must_use]
    pub fn new(pool: AgentPool, executor: StepExecutor) -> Self {
        Self::with_scheduler(Scheduler::new(pool, Arc::new(executor)))
    }

    /// Controller driving a preconfigured scheduler
    #[must_use]
    pub fn with_scheduler(scheduler: Scheduler) -> Self {
        Self {
            compiler: Compiler::with_registry(scheduler.executor().registry()),
            scheduler,
            metrics: MetricsCollector::new(),
        }
    }

    /// Reports finished runs to `metrics` instead of a private collector
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Metrics of runs this controller finished
    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// The pool runs lease agents from
    #[must_use]
    pub fn pool(&self) -> &AgentPool {
        self.scheduler.pool()
    }

    /// Compiles `definition` and launches it.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the [`CompileError`]; nothing is launched and no agent is
    /// acquired in that case.
    pub fn start(&self, definition: &PipelineDefinition) -> Result<RunHandle, CompileError> {
        let graph = self.compiler.compile(definition)?;
        Ok(self.launch(graph))
    }

    /// Lowers and compiles `script`, then launches it.
    ///
    /// # Errors
    ///
    /// Returns the [`CompileError`] of lowering or compilation.
    pub fn start_script(&self, script: &Script) -> Result<RunHandle, CompileError> {
        let graph = self.compiler.compile_script(script)?;
        Ok(self.launch(graph))
    }

    /// Launches an already compiled graph
    pub fn launch(&self, graph: StageGraph) -> RunHandle {
        let id = Uuid::new_v4().to_string();
        let record = RunRecord::new(id.clone(), &graph).shared();
        let token = CancellationToken::new();

        let span = info_span!("run", pipeline = %graph.name(), run = %id);
        let task = tokio::spawn(
            drive(
                self.scheduler.clone(),
                self.metrics.clone(),
                graph,
                Arc::clone(&record),
                token.clone(),
            )
            .instrument(span),
        );

        RunHandle {
            id,
            record,
            token,
            task,
        }
    }

    /// Requests cancellation of `handle`'s run
    pub fn cancel(&self, handle: &RunHandle) {
        handle.cancel();
    }

    /// Waits for the run and its post-actions to finish
    pub async fn await_result(&self, handle: RunHandle) -> RunStatus {
        match handle.task.await {
            Ok(status) => status,
            Err(e) => {
                error!(run = %handle.id, error = %e, "Run task ended abnormally");
                let mut record = handle.record.write();
                record.recover();
                record.status
            }
        }
    }

    /// Waits for the run and returns its final record
    pub async fn await_record(&self, handle: RunHandle) -> RunRecord {
        let record = Arc::clone(&handle.record);
        self.await_result(handle).await;
        record.read().clone()
    }

    /// Copy of the record of `handle`'s run
    #[must_use]
    pub fn snapshot(&self, handle: &RunHandle) -> RunRecord {
        handle.snapshot()
    }
}

async fn drive(
    scheduler: Scheduler,
    metrics: MetricsCollector,
    graph: StageGraph,
    record: SharedRecord,
    token: CancellationToken,
) -> RunStatus {
    let status = scheduler.run(&graph, &record, &token).await;
    // Terminal as soon as the stages are; post-action records follow.
    record.write().complete(status);
    info!(%status, "Stages complete");

    for post in graph.post() {
        if !post.condition.should_execute(status) {
            continue;
        }
        let outcome = run_post(&scheduler, &graph, &record, post).await;
        if outcome.status.is_success() {
            info!(condition = %post.condition, "Post-action finished");
        } else {
            warn!(
                condition = %post.condition,
                error = outcome.error.as_deref().unwrap_or("-"),
                "Post-action failed"
            );
        }
        record.write().record_post(outcome);
    }

    let metrics = metrics.observe(&record.read());
    info!(%status, duration_ms = metrics.duration.as_millis(), "Run finished");
    status
}

/// Runs one post-action on an agent matching the pipeline requirement.
///
/// Steps stop at the first failure. Cancellation is not observed here so that
/// post-actions still run after a cancelled run.
async fn run_post(
    scheduler: &Scheduler,
    graph: &StageGraph,
    record: &SharedRecord,
    post: &CompiledPost,
) -> PostActionRecord {
    let mut outcome = PostActionRecord {
        condition: post.condition,
        status: StageStatus::Success,
        output: String::new(),
        error: None,
        agent: None,
    };

    let pool = scheduler.pool();
    let lease = match graph.agent_timeout().or(scheduler.agent_timeout()) {
        Some(timeout) => pool.acquire_timeout(graph.agent(), timeout).await,
        None => pool.acquire(graph.agent()).await,
    };
    let lease = match lease {
        Ok(lease) => lease,
        Err(e) => {
            outcome.status = StageStatus::Failure;
            outcome.error = Some(e.to_string());
            return outcome;
        }
    };
    outcome.agent = Some(lease.id().to_string());

    let run_id = record.read().id.clone();
    let ctx = StepContext::new(
        graph.name(),
        format!("post:{}", post.condition),
        run_id,
        graph.environment().clone(),
    );

    for resolved in &post.steps {
        if !resolved.supported {
            outcome.status = StageStatus::Failure;
            outcome.error = Some(
                StepError::UnsupportedStep {
                    action: resolved.step.action_type().to_string(),
                }
                .to_string(),
            );
            break;
        }
        let result = scheduler
            .executor()
            .execute(&resolved.step, lease.agent(), &ctx)
            .await;
        outcome.output.push_str(&result.output);
        if !result.is_success() {
            outcome.status = StageStatus::Failure;
            outcome.error = result.error.map(|e| e.to_string());
            break;
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::executor::{FnBackend, StepRegistry};
    use crate::executor::{StepBackend, StepFailure};
    use crate::pipeline::{PostAction, StageDefinition, Step};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;

    /// Blocks until `release` is notified
    struct Hold {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl StepBackend for Hold {
        async fn execute(
            &self,
            _step: &Step,
            _agent: &Agent,
            _ctx: &StepContext,
        ) -> Result<String, StepFailure> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok("released".to_string())
        }
    }

    fn controller() -> RunController {
        let registry = StepRegistry::new()
            .with(
                "ok",
                FnBackend::new(|_: &Step, _: &Agent, ctx: &StepContext| Ok(ctx.stage.clone())),
            )
            .with(
                "fail",
                FnBackend::new(|_: &Step, _: &Agent, _: &StepContext| {
                    Err(StepError::Backend("boom".to_string()).into())
                }),
            );
        RunController::new(
            AgentPool::with_agents([Agent::new("local")]),
            StepExecutor::new(registry),
        )
    }

    #[tokio::test]
    async fn test_start_and_await() {
        let definition = PipelineDefinition::builder()
            .name("web")
            .stage(StageDefinition::new("Build", vec![Step::custom("ok")]))
            .post(PostAction::success(vec![Step::custom("ok")]))
            .post(PostAction::failure(vec![Step::custom("ok")]))
            .build_unchecked();

        let controller = controller();
        let handle = controller.start(&definition).unwrap();
        assert!(!handle.id().is_empty());

        let status = controller.await_result(handle).await;
        assert_eq!(status, RunStatus::Success);

        let pool = controller.pool().snapshot();
        assert_eq!(pool.acquired, 2);
        assert_eq!(pool.acquired, pool.released);
    }

    #[tokio::test]
    async fn test_finished_runs_reach_shared_metrics() {
        let definition = PipelineDefinition::builder()
            .name("web")
            .stage(StageDefinition::new("Build", vec![Step::custom("fail")]))
            .post(PostAction::failure(vec![Step::custom("fail")]))
            .build_unchecked();
        let metrics = MetricsCollector::new();
        let controller = controller().with_metrics(metrics.clone());

        let handle = controller.start(&definition).unwrap();
        let id = handle.id().to_string();
        controller.await_result(handle).await;

        let observed = metrics.get(&id).unwrap();
        assert_eq!(observed.pipeline_name, "web");
        assert_eq!(observed.status, RunStatus::Failure);
        assert_eq!(observed.count(StageStatus::Failure), 1);
        assert_eq!(observed.failed_post_actions, 1);
        assert_eq!(controller.metrics().for_pipeline("web").len(), 1);
    }

    #[tokio::test]
    async fn test_post_actions_recorded_in_order() {
        let definition = PipelineDefinition::builder()
            .stage(StageDefinition::new("Build", vec![Step::custom("fail")]))
            .post(PostAction::always(vec![Step::custom("ok")]))
            .post(PostAction::success(vec![Step::custom("ok")]))
            .post(PostAction::failure(vec![Step::custom("fail")]))
            .build_unchecked();

        let controller = controller();
        let handle = controller.start(&definition).unwrap();
        let observer = Arc::clone(&handle.record);
        let status = controller.await_result(handle).await;
        assert_eq!(status, RunStatus::Failure);

        let record = observer.read().clone();
        let conditions: Vec<_> = record.post.iter().map(|p| p.condition).collect();
        assert_eq!(
            conditions,
            vec![
                crate::pipeline::PostCondition::Always,
                crate::pipeline::PostCondition::Failure
            ]
        );
        assert_eq!(record.post[0].output, "post:always");
        assert_eq!(record.post[1].status, StageStatus::Failure);
        assert_eq!(record.status, RunStatus::Failure);
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_record_terminal_while_post_actions_run() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let registry = StepRegistry::new()
            .with(
                "ok",
                FnBackend::new(|_: &Step, _: &Agent, ctx: &StepContext| Ok(ctx.stage.clone())),
            )
            .with(
                "hold",
                Hold {
                    entered: Arc::clone(&entered),
                    release: Arc::clone(&release),
                },
            );
        let controller = RunController::new(
            AgentPool::with_agents([Agent::new("local")]),
            StepExecutor::new(registry),
        );
        let definition = PipelineDefinition::builder()
            .stage(StageDefinition::new("Build", vec![Step::custom("ok")]))
            .post(PostAction::always(vec![Step::custom("hold")]))
            .build_unchecked();

        let handle = controller.start(&definition).unwrap();
        entered.notified().await;

        let snapshot = controller.snapshot(&handle);
        assert_eq!(snapshot.status, RunStatus::Success);
        assert!(snapshot.is_terminal());
        assert!(snapshot.finished_at.is_some());
        assert!(snapshot.post.is_empty());
        assert!(!handle.is_finished());

        release.notify_one();
        let record = controller.await_record(handle).await;
        assert_eq!(record.post.len(), 1);
        assert_eq!(record.post[0].output, "released");
    }

    #[tokio::test]
    async fn test_compile_error_starts_nothing() {
        let definition = PipelineDefinition::builder().build_unchecked();
        let controller = controller();

        let err = controller.start(&definition).unwrap_err();
        assert_eq!(err, CompileError::EmptyPipeline);
        assert_eq!(controller.pool().acquired(), 0);
    }
}
