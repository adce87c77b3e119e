//! Agent requirements declared by pipelines and stages
//!
//! A requirement is a set of capability labels. Any agent whose label set is a
//! superset of the requirement can run the stage; the empty set matches every
//! agent (`agent any` in declarative syntax).

use super::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Labels an agent must carry to run a stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentRequirement {
    labels: BTreeSet<String>,
}

impl AgentRequirement {
    /// Matches any agent
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Requires a single label
    #[must_use]
    pub fn label(label: impl Into<String>) -> Self {
        Self::labels([label])
    }

    /// Requires every label in `labels`
    #[must_use]
    pub fn labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if this requirement matches every agent
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.labels.is_empty()
    }

    /// Required labels, sorted
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    /// Returns true if `offered` contains every required label
    #[must_use]
    pub fn is_satisfied_by(&self, offered: &BTreeSet<String>) -> bool {
        self.labels.is_subset(offered)
    }
}

impl super::Validate for AgentRequirement {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        for label in &self.labels {
            if label.is_empty() {
                return Err(ValidationError::InvalidAgentLabel(
                    "Label cannot be empty".to_string(),
                ));
            }
            if label.chars().any(char::is_whitespace) {
                return Err(ValidationError::InvalidAgentLabel(format!(
                    "Label '{label}' cannot contain whitespace"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for AgentRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return write!(f, "any");
        }
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "label:{}", joined.join("&&"))
    }
}
