//! Scripted pipeline front-end
//!
//! Scripted pipelines are an ordered list of statements rather than a
//! declarative block tree. They are lowered to a [`PipelineDefinition`] so the
//! compiler only ever sees one shape. Conditional logic is limited to guards:
//! `when` wraps a stage and attaches (or tightens) its guard, it cannot run
//! arbitrary code.

use super::agent::AgentRequirement;
use super::errors::{LoadError, ValidationError};
use super::guard::Guard;
use super::pipeline_def::PipelineDefinition;
use super::post::PostAction;
use super::stage::StageDefinition;
use super::{Environment, PipelineOptions};
use serde::{Deserialize, Serialize};

/// One scripted statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    /// A stage block
    Stage(StageDefinition),

    /// Concurrent branches joined under one name
    Parallel {
        /// Name of the join
        name: String,
        /// Branch statements, each lowering to one stage
        branches: Vec<Statement>,
    },

    /// Guarded statement
    When {
        /// Guard to attach
        guard: Guard,
        /// Guarded statement
        then: Box<Statement>,
    },

    /// Statements that run on agents carrying the given labels
    Node {
        /// Required labels
        agent: AgentRequirement,
        /// Nested statements
        body: Vec<Statement>,
    },

    /// Pipeline-wide environment variable
    Env {
        /// Variable name
        name: String,
        /// Variable value
        value: String,
    },

    /// Post-action
    Post(PostAction),
}

impl Statement {
    /// Creates a stage statement
    #[must_use]
    pub fn stage(stage: StageDefinition) -> Self {
        Self::Stage(stage)
    }

    /// Creates a parallel statement
    #[must_use]
    pub fn parallel(name: impl Into<String>, branches: Vec<Statement>) -> Self {
        Self::Parallel {
            name: name.into(),
            branches,
        }
    }

    /// Creates a guarded statement
    #[must_use]
    pub fn when(guard: Guard, then: Statement) -> Self {
        Self::When {
            guard,
            then: Box::new(then),
        }
    }

    /// Creates a node block
    #[must_use]
    pub fn node(agent: AgentRequirement, body: Vec<Statement>) -> Self {
        Self::Node { agent, body }
    }

    /// Creates an environment assignment
    #[must_use]
    pub fn env(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Env {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A scripted pipeline
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Script {
    /// Pipeline name
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,

    /// Pipeline options
    #[serde(default)]
    pub options: PipelineOptions,

    /// Statements in order
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub statements: Vec<Statement>,
}

#[derive(Default)]
struct Lowering {
    stages: Vec<StageDefinition>,
    environment: Environment,
    post: Vec<PostAction>,
}

impl Script {
    /// Creates a script from statements
    #[must_use]
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            statements,
            ..Self::default()
        }
    }

    /// Sets the pipeline name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parses a script from YAML
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Yaml`] if the document does not describe a script.
    pub fn from_yaml(source: &str) -> Result<Self, LoadError> {
        serde_yaml::from_str(source).map_err(|e| LoadError::Yaml(e.to_string()))
    }

    /// Lowers the statements into a declarative definition
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidScript`] when a statement cannot be
    /// expressed as stages, e.g. a parallel branch that is not a stage.
    pub fn lower(&self) -> Result<PipelineDefinition, ValidationError> {
        let mut out = Lowering::default();
        for statement in &self.statements {
            lower_top(statement, None, &mut out)?;
        }

        Ok(PipelineDefinition {
            name: self.name.clone(),
            agent: AgentRequirement::any(),
            stages: out.stages,
            environment: out.environment,
            triggers: Vec::new(),
            options: self.options.clone(),
            post: out.post,
        })
    }
}

fn lower_top(
    statement: &Statement,
    agent: Option<&AgentRequirement>,
    out: &mut Lowering,
) -> Result<(), ValidationError> {
    match statement {
        Statement::Env { name, value } => {
            out.environment.vars.insert(name.clone(), value.clone());
        }
        Statement::Post(action) => out.post.push(action.clone()),
        Statement::Node { agent, body } => {
            for inner in body {
                lower_top(inner, Some(agent), out)?;
            }
        }
        Statement::Stage(_) | Statement::Parallel { .. } | Statement::When { .. } => {
            out.stages.push(lower_stage(statement, agent)?);
        }
    }
    Ok(())
}

fn lower_stage(
    statement: &Statement,
    agent: Option<&AgentRequirement>,
) -> Result<StageDefinition, ValidationError> {
    match statement {
        Statement::Stage(stage) => {
            let mut stage = stage.clone();
            if stage.agent.is_none() {
                stage.agent = agent.cloned();
            }
            Ok(stage)
        }
        Statement::Parallel { name, branches } => {
            let branches = branches
                .iter()
                .map(|branch| lower_stage(branch, agent))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(StageDefinition::parallel(name.clone(), branches))
        }
        Statement::When { guard, then } => {
            let mut stage = lower_stage(then, agent)?;
            stage.when = Some(match stage.when.take() {
                Some(existing) => Guard::all_of(vec![guard.clone(), existing]),
                None => guard.clone(),
            });
            Ok(stage)
        }
        Statement::Node { agent, body } => match body.as_slice() {
            [single] => lower_stage(single, Some(agent)),
            _ => Err(ValidationError::InvalidScript(
                "a node block used as a branch must hold exactly one stage".to_string(),
            )),
        },
        Statement::Env { name, .. } => Err(ValidationError::InvalidScript(format!(
            "env '{name}' cannot be used as a stage"
        ))),
        Statement::Post(_) => Err(ValidationError::InvalidScript(
            "post cannot be used as a stage".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Step;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lower_sequence_with_node_and_when() {
        let script = Script::new(vec![
            Statement::env("BRANCH_NAME", "main"),
            Statement::node(
                AgentRequirement::label("linux"),
                vec![
                    Statement::stage(StageDefinition::new("Build", vec![Step::shell("make")])),
                    Statement::when(
                        Guard::branch("main"),
                        Statement::stage(StageDefinition::new(
                            "Deploy",
                            vec![Step::deploy("prod")],
                        )),
                    ),
                ],
            ),
            Statement::Post(PostAction::always(vec![Step::notify("log", "done")])),
        ])
        .with_name("scripted");

        let pipeline = script.lower().unwrap();

        assert_eq!(pipeline.display_name(), "scripted");
        assert_eq!(pipeline.stages.len(), 2);
        assert_eq!(pipeline.stages[0].agent, Some(AgentRequirement::label("linux")));
        assert_eq!(pipeline.stages[1].when, Some(Guard::branch("main")));
        assert_eq!(pipeline.environment.get("BRANCH_NAME"), Some(&"main".to_string()));
        assert_eq!(pipeline.post.len(), 1);
    }

    #[test]
    fn test_lower_parallel() {
        let script = Script::new(vec![Statement::parallel(
            "Checks",
            vec![
                Statement::stage(StageDefinition::new("Unit", vec![Step::shell("make test")])),
                Statement::stage(StageDefinition::new("Lint", vec![Step::shell("make lint")])),
            ],
        )]);

        let pipeline = script.lower().unwrap();
        assert_eq!(pipeline.stages.len(), 1);
        assert_eq!(pipeline.stages[0].parallel.len(), 2);
    }

    #[test]
    fn test_nested_when_combines_guards() {
        let stage = StageDefinition::new("Deploy", vec![Step::deploy("prod")])
            .with_when(Guard::env("DEPLOY", "true"));
        let script = Script::new(vec![Statement::when(
            Guard::branch("main"),
            Statement::stage(stage),
        )]);

        let pipeline = script.lower().unwrap();
        assert_eq!(
            pipeline.stages[0].when,
            Some(Guard::all_of(vec![
                Guard::branch("main"),
                Guard::env("DEPLOY", "true")
            ]))
        );
    }

    #[test]
    fn test_env_inside_parallel_is_rejected() {
        let script = Script::new(vec![Statement::parallel(
            "Checks",
            vec![Statement::env("A", "1")],
        )]);
        assert!(matches!(
            script.lower(),
            Err(ValidationError::InvalidScript(_))
        ));
    }

    #[test]
    fn test_script_from_yaml() {
        let yaml = r"
name: nightly
statements:
  - env:
      name: BRANCH_NAME
      value: main
  - stage:
      name: Build
      steps:
        - type: sh
          command: make
  - when:
      guard:
        branch:
          pattern: main
      then:
        stage:
          name: Publish
          steps:
            - type: deploy
              target: registry
";
        let script = Script::from_yaml(yaml).unwrap();
        let pipeline = script.lower().unwrap();
        assert_eq!(pipeline.stages.len(), 2);
        assert_eq!(pipeline.stages[1].when, Some(Guard::branch("main")));
    }
}
