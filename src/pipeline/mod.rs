//! Pipeline domain types and logic

pub mod agent;
pub mod errors;
pub mod guard;
pub mod options;
pub mod pipeline_def;
pub mod post;
pub mod script;
pub mod stage;
pub mod steps;
pub mod types;


pub use serde::{Deserialize, Serialize};

pub use agent::AgentRequirement;
pub use errors::{CompileError, LoadError, ValidationError};
pub use guard::{Guard, GuardContext};
pub use options::{PipelineOptions, Trigger};
pub use pipeline_def::{PipelineBuilder, PipelineDefinition};
pub use post::{PostAction, PostCondition};
pub use script::{Script, Statement};
pub use stage::{StageBuilder, StageDefinition};
pub use steps::{Step, StepType};
pub use types::{RunStatus, StageStatus, Validate};

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Defines environment variables that can be used in pipeline steps.
///
/// Variables can be resolved using the [`resolve`][Environment::resolve] method
/// which supports `${VAR}` syntax. Unknown variables are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Environment {
    /// Environment variables as key-value pairs.
    #[serde(flatten)]
    pub vars: BTreeMap<String, String>,
}

impl Environment {
    /// Creates a new empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Gets an environment variable by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&String> {
        self.vars.get(key)
    }

    /// Returns a copy with `other` layered on top.
    #[must_use]
    pub fn merged(&self, other: &Environment) -> Self {
        let mut vars = self.vars.clone();
        vars.extend(other.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { vars }
    }

    /// Iterates over variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    /// Resolves a value that may contain variable expansions like `${VAR}`.
    #[must_use]
    pub fn resolve(&self, value: &str) -> String {
        VAR_PATTERN
            .replace_all(value, |caps: &regex::Captures<'_>| {
                let name = caps.get(1).map_or("", |m| m.as_str());
                match self.vars.get(name) {
                    Some(value) => value.clone(),
                    None => caps
                        .get(0)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                }
            })
            .into_owned()
    }
}

static VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("variable pattern is valid")
});

impl FromIterator<(String, String)> for Environment {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}
