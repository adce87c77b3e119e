use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

use stageline::executor::{FnBackend, StepFailure};
use stageline::prelude::*;
use stageline::{CompileError, StepError};

fn ok() -> Step {
    Step::custom("ok")
}

fn fail() -> Step {
    Step::custom("fail")
}

fn registry() -> StepRegistry {
    StepRegistry::new()
        .with(
            "ok",
            FnBackend::new(|_: &Step, agent: &Agent, ctx: &StepContext| {
                Ok(format!("{} on {}", ctx.stage, agent.id))
            }),
        )
        .with(
            "fail",
            FnBackend::new(|_: &Step, _: &Agent, _: &StepContext| {
                Err(StepError::Backend("step failed".to_string()).into())
            }),
        )
}

fn controller(registry: StepRegistry, agents: usize) -> RunController {
    let pool = AgentPool::with_agents((0..agents).map(|i| Agent::new(format!("agent-{i}"))));
    RunController::new(pool, StepExecutor::new(registry))
}

fn build_test_deploy(test_step: Step) -> PipelineDefinition {
    PipelineDefinition::builder()
        .name("web")
        .stage(StageDefinition::new("Build", vec![ok()]))
        .stage(StageDefinition::new("Test", vec![test_step]))
        .stage(StageDefinition::new("Deploy", vec![ok()]))
        .build_unchecked()
}

#[tokio::test]
async fn build_test_deploy_all_succeed() {
    let controller = controller(registry(), 1);
    let handle = controller.start(&build_test_deploy(ok())).unwrap();
    let record = controller.await_record(handle).await;

    assert_eq!(record.status, RunStatus::Success);
    for name in ["Build", "Test", "Deploy"] {
        let entry = record.stage(name).unwrap();
        assert_eq!(entry.status, StageStatus::Success, "{name}");
        assert_eq!(entry.output, format!("{name} on agent-0"));
    }
    assert_eq!(controller.pool().acquired(), 3);
    assert_eq!(controller.pool().acquired(), controller.pool().released());
}

#[tokio::test]
async fn failing_test_skips_deploy() {
    let controller = controller(registry(), 1);
    let handle = controller.start(&build_test_deploy(fail())).unwrap();
    let record = controller.await_record(handle).await;

    assert_eq!(record.status, RunStatus::Failure);
    assert_eq!(record.status_of("Build"), Some(StageStatus::Success));
    let test = record.stage("Test").unwrap();
    assert_eq!(test.status, StageStatus::Failure);
    assert_eq!(test.error.as_deref(), Some("step failed"));
    let deploy = record.stage("Deploy").unwrap();
    assert_eq!(deploy.status, StageStatus::Skipped);
    assert!(deploy.reason.as_deref().unwrap().contains("Test"));
    assert_eq!(controller.pool().acquired(), controller.pool().released());
}

#[tokio::test]
async fn parallel_branch_failure_waits_for_both_branches() {
    let slow_finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&slow_finished);
    let registry = registry().with(
        "slow",
        Sleep {
            delay: Duration::from_millis(100),
            finished: counter,
        },
    );

    let definition = PipelineDefinition::builder()
        .stage(StageDefinition::new("Build", vec![ok()]))
        .stage(StageDefinition::parallel(
            "Checks",
            vec![
                StageDefinition::new("Slow", vec![Step::custom("slow")]),
                StageDefinition::new("Broken", vec![fail()]),
            ],
        ))
        .stage(StageDefinition::new("Publish", vec![ok()]))
        .build_unchecked();

    let controller = controller(registry, 2);
    let handle = controller.start(&definition).unwrap();
    let record = controller.await_record(handle).await;

    assert_eq!(record.status, RunStatus::Failure);
    assert_eq!(slow_finished.load(Ordering::SeqCst), 1);
    assert_eq!(record.status_of("Slow"), Some(StageStatus::Success));
    assert_eq!(record.status_of("Broken"), Some(StageStatus::Failure));
    assert_eq!(record.status_of("Checks"), Some(StageStatus::Failure));
    assert_eq!(record.status_of("Publish"), Some(StageStatus::Skipped));

    let join_finished = record.stage("Checks").unwrap().finished_at.unwrap();
    let slow_done = record.stage("Slow").unwrap().finished_at.unwrap();
    assert!(join_finished >= slow_done);
}

#[tokio::test]
async fn always_post_action_runs_once_after_cancel() {
    let started = Arc::new(Notify::new());
    let posts = Arc::new(AtomicUsize::new(0));
    let post_counter = Arc::clone(&posts);
    let registry = registry()
        .with(
            "gate",
            Gate {
                started: Arc::clone(&started),
                hold: Duration::from_millis(100),
            },
        )
        .with(
            "count",
            FnBackend::new(move |_: &Step, _: &Agent, _: &StepContext| {
                post_counter.fetch_add(1, Ordering::SeqCst);
                Ok(String::new())
            }),
        );

    let definition = PipelineDefinition::builder()
        .stage(StageDefinition::new("Build", vec![Step::custom("gate"), ok()]))
        .stage(StageDefinition::new("Deploy", vec![ok()]))
        .post(PostAction::always(vec![Step::custom("count")]))
        .post(PostAction::success(vec![Step::custom("count")]))
        .build_unchecked();

    let controller = controller(registry, 1);
    let handle = controller.start(&definition).unwrap();
    started.notified().await;
    controller.cancel(&handle);
    let record = controller.await_record(handle).await;

    assert_eq!(record.status, RunStatus::Aborted);
    let build = record.stage("Build").unwrap();
    assert_eq!(build.status, StageStatus::Aborted);
    assert_eq!(build.output, "gated");
    let deploy = record.stage("Deploy").unwrap();
    assert_eq!(deploy.status, StageStatus::Skipped);
    assert_eq!(deploy.reason.as_deref(), Some("run cancelled"));

    assert_eq!(posts.load(Ordering::SeqCst), 1);
    assert_eq!(record.post.len(), 1);
    assert_eq!(record.post[0].condition, PostCondition::Always);
    assert_eq!(controller.pool().acquired(), controller.pool().released());
}

#[tokio::test]
async fn cancel_after_a_failure_reports_failure() {
    let started = Arc::new(Notify::new());
    let failure_posts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failure_posts);
    let registry = registry()
        .with(
            "gate",
            Gate {
                started: Arc::clone(&started),
                hold: Duration::from_millis(500),
            },
        )
        .with(
            "count",
            FnBackend::new(move |_: &Step, _: &Agent, _: &StepContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(String::new())
            }),
        );

    let definition = PipelineDefinition::builder()
        .stage(StageDefinition::parallel(
            "Tests",
            vec![
                StageDefinition::new("Lint", vec![fail()]),
                StageDefinition::new("Unit", vec![Step::custom("gate")]),
            ],
        ))
        .stage(StageDefinition::new("Deploy", vec![ok()]))
        .post(PostAction::failure(vec![Step::custom("count")]))
        .post(PostAction::aborted(vec![ok()]))
        .build_unchecked();

    let controller = controller(registry, 2);
    let handle = controller.start(&definition).unwrap();
    started.notified().await;
    for _ in 0..50 {
        if controller.snapshot(&handle).status_of("Lint") == Some(StageStatus::Failure) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        controller.snapshot(&handle).status_of("Lint"),
        Some(StageStatus::Failure)
    );
    controller.cancel(&handle);
    let record = controller.await_record(handle).await;

    assert_eq!(record.status, RunStatus::Failure);
    assert_eq!(record.status_of("Unit"), Some(StageStatus::Aborted));
    assert_eq!(record.status_of("Deploy"), Some(StageStatus::Skipped));
    assert_eq!(failure_posts.load(Ordering::SeqCst), 1);
    assert_eq!(record.post.len(), 1);
    assert_eq!(record.post[0].condition, PostCondition::Failure);
    assert_eq!(controller.pool().acquired(), controller.pool().released());
}

#[tokio::test]
async fn agent_wait_times_out_into_stage_failure() {
    let registry = registry().with(
        "slow",
        Sleep {
            delay: Duration::from_millis(1500),
            finished: Arc::new(AtomicUsize::new(0)),
        },
    );
    let definition = PipelineDefinition::builder()
        .stage(StageDefinition::parallel(
            "Matrix",
            vec![
                StageDefinition::new("A", vec![Step::custom("slow")]),
                StageDefinition::new("B", vec![Step::custom("slow")]),
            ],
        ))
        .options(PipelineOptions::new().with_agent_timeout(Duration::from_secs(1)))
        .build_unchecked();

    let controller = controller(registry, 1);
    let handle = controller.start(&definition).unwrap();
    let record = controller.await_record(handle).await;

    assert_eq!(record.status, RunStatus::Failure);
    let (ran, waited): (Vec<_>, Vec<_>) = ["A", "B"]
        .into_iter()
        .map(|name| record.stage(name).unwrap())
        .partition(|entry| entry.status == StageStatus::Success);
    assert_eq!(ran.len(), 1);
    assert_eq!(waited.len(), 1);
    let waited = waited[0];
    assert_eq!(waited.status, StageStatus::Failure);
    assert_eq!(waited.attempts, 0);
    assert!(waited.reason.as_deref().unwrap().contains("timed out"));
    assert_eq!(record.status_of("Matrix"), Some(StageStatus::Failure));
    assert_eq!(controller.pool().acquired(), 1);
    assert_eq!(controller.pool().acquired(), controller.pool().released());
}

#[tokio::test]
async fn cyclic_pipeline_acquires_no_agent() {
    let definition = PipelineDefinition::builder()
        .stage(StageDefinition::new("Build", vec![ok()]))
        .stage(
            StageDefinition::new("Deploy", vec![ok()])
                .with_when(Guard::succeeded("Deploy")),
        )
        .build_unchecked();

    let controller = controller(registry(), 1);
    let err = controller.start(&definition).unwrap_err();

    assert_eq!(
        err,
        CompileError::CyclicGraph {
            stages: vec!["Deploy".to_string(), "Deploy".to_string()]
        }
    );
    assert_eq!(controller.pool().acquired(), 0);
}

#[tokio::test]
async fn stages_wait_for_a_busy_agent() {
    let registry = registry().with(
        "slow",
        Sleep {
            delay: Duration::from_millis(50),
            finished: Arc::new(AtomicUsize::new(0)),
        },
    );
    let definition = PipelineDefinition::builder()
        .stage(StageDefinition::parallel(
            "Matrix",
            vec![
                StageDefinition::new("A", vec![Step::custom("slow")]),
                StageDefinition::new("B", vec![Step::custom("slow")]),
                StageDefinition::new("C", vec![Step::custom("slow")]),
            ],
        ))
        .build_unchecked();

    let controller = controller(registry, 1);
    let handle = controller.start(&definition).unwrap();
    let record = controller.await_record(handle).await;

    assert_eq!(record.status, RunStatus::Success);
    assert_eq!(controller.pool().acquired(), 3);
    assert_eq!(controller.pool().released(), 3);
    assert_eq!(controller.pool().snapshot().waiting, 0);
}

#[tokio::test]
async fn script_runs_like_a_definition() {
    let script = Script::new(vec![
        Statement::env("TARGET", "prod"),
        Statement::stage(StageDefinition::new("Build", vec![ok()])),
        Statement::when(
            Guard::env("TARGET", "staging"),
            Statement::stage(StageDefinition::new("Smoke", vec![ok()])),
        ),
    ])
    .with_name("scripted");

    let controller = controller(registry(), 1);
    let handle = controller.start_script(&script).unwrap();
    let record = controller.await_record(handle).await;

    assert_eq!(record.pipeline, "scripted");
    assert_eq!(record.status, RunStatus::Success);
    assert_eq!(record.status_of("Smoke"), Some(StageStatus::Skipped));
}

#[tokio::test]
async fn record_survives_json_export() {
    let controller = controller(registry(), 1);
    let handle = controller.start(&build_test_deploy(fail())).unwrap();
    let record = controller.await_record(handle).await;

    let restored = RunRecord::from_json(&record.to_json().unwrap()).unwrap();
    assert_eq!(restored, record);
}

/// Sleeps, then succeeds
struct Sleep {
    delay: Duration,
    finished: Arc<AtomicUsize>,
}

#[async_trait]
impl StepBackend for Sleep {
    async fn execute(
        &self,
        _step: &Step,
        _agent: &Agent,
        _ctx: &StepContext,
    ) -> Result<String, StepFailure> {
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok("slept".to_string())
    }
}

/// Signals that it started, then holds the stage long enough to be cancelled
struct Gate {
    started: Arc<Notify>,
    hold: Duration,
}

#[async_trait]
impl StepBackend for Gate {
    async fn execute(
        &self,
        _step: &Step,
        _agent: &Agent,
        _ctx: &StepContext,
    ) -> Result<String, StepFailure> {
        self.started.notify_one();
        tokio::time::sleep(self.hold).await;
        Ok("gated".to_string())
    }
}
