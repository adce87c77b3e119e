//! Configuration management
//!
//! Engine settings and the agent inventory, read from a YAML file:
//!
//! ```yaml
//! log_level: debug
//! shell: bash
//! agent_timeout: 300
//! retry_backoff_ms: 500
//! agents:
//!   - id: linux-1
//!     labels: [linux, docker]
//!     workspace: /var/lib/stageline/linux-1
//! ```

use crate::agent::{Agent, AgentPool};
use crate::executor::{StepExecutor, StepRegistry};
use crate::pipeline::Validate;
use crate::run::RunController;
use crate::scheduler::Scheduler;
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// File could not be read
    #[error("Cannot read config '{path}': {message}")]
    Io {
        /// Path that was read
        path: String,
        /// Underlying error
        message: String,
    },

    /// File is not valid YAML for [`Config`]
    #[error("Invalid config: {0}")]
    Parse(String),

    /// Agent inventory is empty
    #[error("Config declares no agents")]
    NoAgents,

    /// Two agents share an id
    #[error("Duplicate agent id: '{0}'")]
    DuplicateAgent(String),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level used when `STAGELINE_LOG` is unset
    pub log_level: String,
    /// Shell running `sh` steps
    pub shell: String,
    /// Default agent wait limit in seconds; unset waits forever
    #[serde(rename = "agent_timeout", skip_serializing_if = "Option::is_none")]
    pub agent_timeout_secs: Option<u64>,
    /// Pause between step retries in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff_ms: Option<u64>,
    /// Default step timeout in seconds
    #[serde(rename = "step_timeout", skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,
    /// Agent inventory
    pub agents: Vec<Agent>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            shell: "sh".to_string(),
            agent_timeout_secs: None,
            retry_backoff_ms: None,
            step_timeout_secs: None,
            agents: vec![Agent::new("local").with_workspace(PathBuf::from("."))],
        }
    }
}

impl Validate for Config {
    type Error = ConfigError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.agents.is_empty() {
            return Err(ConfigError::NoAgents);
        }
        let mut seen = AHashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id.as_str()) {
                return Err(ConfigError::DuplicateAgent(agent.id.clone()));
            }
        }
        Ok(())
    }
}

impl Config {
    /// Parses and validates a YAML document
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed YAML and the validation
    /// error for an unusable agent inventory.
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a YAML file
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_yaml`](Self::from_yaml).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&source)
    }

    /// Default agent wait limit
    #[must_use]
    pub fn agent_timeout(&self) -> Option<Duration> {
        self.agent_timeout_secs.map(Duration::from_secs)
    }

    /// Pause between step retries
    #[must_use]
    pub fn retry_backoff(&self) -> Option<Duration> {
        self.retry_backoff_ms.map(Duration::from_millis)
    }

    /// Default step timeout
    #[must_use]
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }

    /// Pool holding the configured agents
    #[must_use]
    pub fn pool(&self) -> AgentPool {
        AgentPool::with_agents(self.agents.iter().cloned())
    }

    /// Executor with the built-in backends on the configured shell
    #[must_use]
    pub fn executor(&self) -> StepExecutor {
        StepExecutor::new(StepRegistry::builtin(&self.shell))
            .with_default_timeout(self.step_timeout())
    }

    /// Controller wired from this configuration
    #[must_use]
    pub fn controller(&self) -> RunController {
        let scheduler = Scheduler::new(self.pool(), Arc::new(self.executor()))
            .with_agent_timeout(self.agent_timeout())
            .with_retry_backoff(self.retry_backoff());
        RunController::with_scheduler(scheduler)
    }
}
