//! Declarative macros for pipeline definitions
//!
//! Thin sugar over the builder API:
//!
//! ```
//! use stageline::prelude::*;
//!
//! let definition = pipeline!(
//!     name: "web",
//!     agent: agent_label!("linux"),
//!     stages: [
//!         stage!("Build", steps!(sh!("make"))),
//!         parallel!("Tests", [
//!             stage!("Unit", steps!(sh!("make unit"))),
//!             stage!("Lint", steps!(sh!("make lint"))),
//!         ]),
//!         stage!("Deploy", steps!(deploy!("prod"))).with_when(when!(succeeded("Tests"))),
//!     ],
//!     post: [always(notify!("log", "done"))]
//! );
//! assert_eq!(definition.all_stages().len(), 5);
//! ```

/// Requirement matched by every agent
#[macro_export]
macro_rules! agent_any {
    () => {
        $crate::pipeline::AgentRequirement::any()
    };
}

/// Requirement for agents carrying all given labels
#[macro_export]
macro_rules! agent_label {
    ($($label:expr),+ $(,)?) => {
        $crate::pipeline::AgentRequirement::labels([$($label),+])
    };
}

/// Shell command step
#[macro_export]
macro_rules! sh {
    ($cmd:expr) => {
        $crate::pipeline::Step::shell($cmd)
    };
}

/// Notification step
#[macro_export]
macro_rules! notify {
    ($channel:expr, $message:expr) => {
        $crate::pipeline::Step::notify($channel, $message)
    };
}

/// Deployment step
#[macro_export]
macro_rules! deploy {
    ($target:expr) => {
        $crate::pipeline::Step::deploy($target)
    };
}

/// List of steps
#[macro_export]
macro_rules! steps {
    ($($step:expr),* $(,)?) => {
        vec![$($step),*]
    };
}

/// Stage with steps
#[macro_export]
macro_rules! stage {
    ($name:expr, $steps:expr) => {
        $crate::pipeline::StageDefinition::new($name, $steps)
    };
}

/// Parallel stage with branches
#[macro_export]
macro_rules! parallel {
    ($name:expr, [$($branch:expr),* $(,)?]) => {
        $crate::pipeline::StageDefinition::parallel($name, vec![$($branch),*])
    };
}

/// Guard condition
#[macro_export]
macro_rules! when {
    (succeeded($stage:expr)) => {
        $crate::pipeline::Guard::succeeded($stage)
    };
    (failed($stage:expr)) => {
        $crate::pipeline::Guard::failed($stage)
    };
    (branch($pattern:expr)) => {
        $crate::pipeline::Guard::branch($pattern)
    };
    (tag($pattern:expr)) => {
        $crate::pipeline::Guard::tag($pattern)
    };
    (env($name:expr, $value:expr)) => {
        $crate::pipeline::Guard::env($name, $value)
    };
}

/// Post-actions, one step per condition
#[macro_export]
macro_rules! post {
    ($($cond:ident($step:expr)),* $(,)?) => {
        vec![$($crate::pipeline::PostAction::$cond(vec![$step])),*]
    };
}

/// Pipeline definition, unvalidated; compilation validates it
#[macro_export]
macro_rules! pipeline {
    (
        $(name: $name:expr,)?
        $(agent: $agent:expr,)?
        stages: [$($stage:expr),* $(,)?]
        $(, post: [$($cond:ident($step:expr)),* $(,)?])?
        $(,)?
    ) => {{
        let builder = $crate::pipeline::PipelineDefinition::builder();
        $(let builder = builder.name($name);)?
        $(let builder = builder.agent($agent);)?
        let builder = builder.stages(vec![$($stage),*]);
        $($(let builder = builder.post($crate::pipeline::PostAction::$cond(vec![$step]));)*)?
        builder.build_unchecked()
    }};
}

#[cfg(test)]
mod tests {
    use crate::pipeline::{AgentRequirement, Guard, PostCondition, StageStatus, StepType};

    #[test]
    fn test_step_macros() {
        assert_eq!(sh!("make").step_type, StepType::shell("make"));
        assert_eq!(notify!("log", "hi").action_type(), "notify");
        assert_eq!(deploy!("prod").step_type, StepType::deploy("prod"));
        assert_eq!(steps!(sh!("a"), sh!("b")).len(), 2);
    }

    #[test]
    fn test_agent_macros() {
        assert!(agent_any!().is_any());
        assert_eq!(
            agent_label!("linux", "docker"),
            AgentRequirement::labels(["linux", "docker"])
        );
    }

    #[test]
    fn test_when_macro() {
        assert_eq!(
            when!(succeeded("Build")),
            Guard::stage("Build", StageStatus::Success)
        );
        assert_eq!(when!(branch("main")), Guard::branch("main"));
    }

    #[test]
    fn test_post_macro() {
        let post = post!(always(sh!("echo done")), failure(notify!("log", "broken")));
        assert_eq!(post.len(), 2);
        assert_eq!(post[1].condition, PostCondition::Failure);
    }

    #[test]
    fn test_pipeline_macro() {
        let definition = pipeline!(
            name: "web",
            stages: [
                stage!("Build", steps!(sh!("make"))),
                parallel!("Tests", [stage!("Unit", steps!(sh!("make unit")))]),
            ],
            post: [always(sh!("echo done"))]
        );

        assert_eq!(definition.name.as_deref(), Some("web"));
        assert_eq!(definition.stage_count(), 2);
        assert_eq!(definition.all_stages().len(), 3);
        assert_eq!(definition.post.len(), 1);
        assert!(definition.agent.is_any());
    }

    #[test]
    fn test_pipeline_macro_minimal() {
        let definition = pipeline!(stages: [stage!("Build", steps!(sh!("make")))]);
        assert!(definition.name.is_none());
        assert_eq!(definition.stages.len(), 1);
    }
}
