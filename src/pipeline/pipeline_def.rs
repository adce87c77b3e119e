//! Pipeline definition and builder

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use crate::pipeline::Environment;
use crate::pipeline::agent::AgentRequirement;
use crate::pipeline::errors::{LoadError, ValidationError};
use crate::pipeline::options::{PipelineOptions, Trigger};
use crate::pipeline::post::PostAction;
use crate::pipeline::stage::StageDefinition;
use crate::pipeline::types::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// A declarative pipeline: ordered stages plus global options
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,

    /// Default agent requirement for every stage
    #[serde(default)]
    pub agent: AgentRequirement,

    /// Stages in declaration order
    pub stages: Vec<StageDefinition>,

    /// Environment variables
    #[serde(default)]
    pub environment: Environment,

    /// Pipeline triggers
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub triggers: Vec<Trigger>,

    /// Pipeline options
    #[serde(default)]
    pub options: PipelineOptions,

    /// Post-actions, in declaration order
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub post: Vec<PostAction>,
}

impl Validate for PipelineDefinition {
    type Error = ValidationError;

    // Emptiness is reported by the compiler so that it surfaces as its own error.
    fn validate(&self) -> Result<(), Self::Error> {
        self.agent.validate()?;

        for stage in &self.stages {
            stage.validate()?;
        }

        for trigger in &self.triggers {
            trigger.validate()?;
        }

        self.options.validate()?;

        for action in &self.post {
            for step in &action.steps {
                step.check().map_err(|reason| ValidationError::InvalidStep {
                    stage: format!("post/{}", action.condition),
                    reason,
                })?;
            }
        }

        Ok(())
    }
}

impl PipelineDefinition {
    /// Creates a new pipeline builder
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Parses a definition from YAML
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Yaml`] if the document does not describe a pipeline.
    pub fn from_yaml(source: &str) -> Result<Self, LoadError> {
        serde_yaml::from_str(source).map_err(|e| LoadError::Yaml(e.to_string()))
    }

    /// Parses a definition from JSON
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Json`] if the document does not describe a pipeline.
    pub fn from_json(source: &str) -> Result<Self, LoadError> {
        serde_json::from_str(source).map_err(|e| LoadError::Json(e.to_string()))
    }

    /// Loads a definition file, choosing the format from the extension
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&source),
            _ => Self::from_yaml(&source),
        }
    }

    /// Returns pipeline name, or `unnamed`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    /// Returns number of top-level stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Every stage including nested branches, parents before children
    pub fn all_stages(&self) -> Vec<&StageDefinition> {
        fn walk<'a>(stages: &'a [StageDefinition], out: &mut Vec<&'a StageDefinition>) {
            for stage in stages {
                out.push(stage);
                walk(&stage.parallel, out);
            }
        }

        let mut out = Vec::new();
        walk(&self.stages, &mut out);
        out
    }
}

impl fmt::Display for PipelineDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline({}): {} stages",
            self.display_name(),
            self.stages.len()
        )
    }
}

/// Builder for creating pipelines
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    pipeline: PipelineDefinition,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder
    pub fn new() -> Self {
        Self {
            pipeline: PipelineDefinition {
                name: None,
                agent: AgentRequirement::any(),
                stages: Vec::new(),
                environment: Environment::new(),
                triggers: Vec::new(),
                options: PipelineOptions::default(),
                post: Vec::new(),
            },
        }
    }

    /// Sets pipeline name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.pipeline.name = Some(name.into());
        self
    }

    /// Sets default agent requirement
    pub fn agent(mut self, agent: AgentRequirement) -> Self {
        self.pipeline.agent = agent;
        self
    }

    /// Adds a stage to pipeline
    pub fn stage(mut self, stage: StageDefinition) -> Self {
        self.pipeline.stages.push(stage);
        self
    }

    /// Adds multiple stages to pipeline
    pub fn stages(mut self, mut stages: Vec<StageDefinition>) -> Self {
        self.pipeline.stages.append(&mut stages);
        self
    }

    /// Configures environment with a closure
    pub fn environment<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Environment) -> Environment,
    {
        self.pipeline.environment = f(self.pipeline.environment);
        self
    }

    /// Adds a trigger to pipeline
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.pipeline.triggers.push(trigger);
        self
    }

    /// Sets pipeline options
    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.pipeline.options = options;
        self
    }

    /// Adds a post-action to pipeline
    pub fn post(mut self, action: PostAction) -> Self {
        self.pipeline.post.push(action);
        self
    }

    /// Builds pipeline
    #[allow(clippy::missing_errors_doc)]
    pub fn build(self) -> Result<PipelineDefinition, ValidationError> {
        self.pipeline.validate()?;
        Ok(self.pipeline)
    }

    /// Builds pipeline without validation (for internal use)
    #[must_use]
    pub fn build_unchecked(self) -> PipelineDefinition {
        self.pipeline
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
