//! Definition-level options and trigger declarations
//!
//! Triggers are descriptive: an external event source (a push hook, a timer)
//! decides when to call `start`, the engine only validates what the
//! definition declares.

use super::errors::ValidationError;
use super::types::RunStatus;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Event source that may start a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Periodic schedule in cron syntax
    Timer {
        /// Five fields, or six with leading seconds
        schedule: String,
        /// IANA zone name, UTC when absent
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timezone: Option<String>,
    },

    /// Source-control push
    Push {
        /// Repository URL or name
        repository: String,
        /// Branch filter; empty matches every branch
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        branches: Vec<String>,
    },

    /// Another pipeline finishing
    Upstream {
        /// Name of the upstream pipeline
        pipeline: String,
        /// Outcomes of `pipeline` that start this one
        #[serde(default = "default_upstream_statuses")]
        on: Vec<RunStatus>,
    },

    /// Started by hand only
    Manual,
}

fn default_upstream_statuses() -> Vec<RunStatus> {
    vec![RunStatus::Success]
}

impl Trigger {
    /// Timer trigger with a cron schedule
    pub fn timer(schedule: impl Into<String>) -> Self {
        Self::Timer {
            schedule: schedule.into(),
            timezone: None,
        }
    }

    /// Push trigger on `repository`, any branch
    pub fn push(repository: impl Into<String>) -> Self {
        Self::Push {
            repository: repository.into(),
            branches: Vec::new(),
        }
    }

    /// Upstream trigger fired when `pipeline` succeeds
    pub fn upstream(pipeline: impl Into<String>) -> Self {
        Self::Upstream {
            pipeline: pipeline.into(),
            on: default_upstream_statuses(),
        }
    }

    /// Restricts a push trigger to `branch`; no effect on other kinds
    #[must_use]
    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        if let Self::Push { branches, .. } = &mut self {
            branches.push(branch.into());
        }
        self
    }

    /// Returns true if a push of `branch` to `repository` matches
    #[must_use]
    pub fn matches_push(&self, repository: &str, branch: &str) -> bool {
        match self {
            Self::Push {
                repository: repo,
                branches,
            } => repo == repository && (branches.is_empty() || branches.iter().any(|b| b == branch)),
            _ => false,
        }
    }
}

impl super::Validate for Trigger {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        match self {
            Self::Timer { schedule, .. } => {
                let fields = schedule.split_whitespace().count();
                if fields != 5 && fields != 6 {
                    return Err(ValidationError::InvalidSchedule(schedule.clone()));
                }
            }
            Self::Push {
                repository,
                branches,
            } => {
                if repository.trim().is_empty() {
                    return Err(ValidationError::InvalidTrigger(
                        "push trigger needs a repository".to_string(),
                    ));
                }
                if branches.iter().any(|b| b.trim().is_empty()) {
                    return Err(ValidationError::InvalidTrigger(format!(
                        "empty branch filter on '{repository}'"
                    )));
                }
            }
            Self::Upstream { pipeline, on } => {
                if pipeline.trim().is_empty() {
                    return Err(ValidationError::InvalidTrigger(
                        "upstream trigger needs a pipeline".to_string(),
                    ));
                }
                if on.is_empty() || on.contains(&RunStatus::Running) {
                    return Err(ValidationError::InvalidTrigger(format!(
                        "upstream '{pipeline}' must name finished statuses"
                    )));
                }
            }
            Self::Manual => {}
        }
        Ok(())
    }
}

/// Pipeline configuration options
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct PipelineOptions {
    /// Stages that run regardless of upstream outcome
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fail_safe: Vec<String>,

    /// How long a stage may wait for an agent, in seconds
    #[serde(
        rename = "agent_timeout",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub agent_timeout_secs: Option<u64>,

    /// Default retry count for failing steps
    #[serde(skip_serializing_if = "is_zero", default)]
    pub retry: u32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl super::Validate for PipelineOptions {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.agent_timeout_secs == Some(0) {
            return Err(ValidationError::InvalidTimeout { value: 0 });
        }

        if let Some(name) = self.fail_safe.iter().find(|name| name.is_empty()) {
            return Err(ValidationError::InvalidNameChars { name: name.clone() });
        }

        Ok(())
    }
}

impl PipelineOptions {
    /// Creates new pipeline options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a stage fail-safe
    #[must_use]
    pub fn with_fail_safe(mut self, stage: impl Into<String>) -> Self {
        self.fail_safe.push(stage.into());
        self
    }

    /// Sets agent acquisition timeout
    #[must_use]
    pub fn with_agent_timeout(mut self, duration: Duration) -> Self {
        self.agent_timeout_secs = Some(duration.as_secs().max(1));
        self
    }

    /// Sets default retry count
    #[must_use]
    pub fn with_retry(mut self, count: u32) -> Self {
        self.retry = count;
        self
    }

    /// Agent acquisition timeout as a duration
    #[must_use]
    pub fn agent_timeout(&self) -> Option<Duration> {
        self.agent_timeout_secs.map(Duration::from_secs)
    }

    /// Returns true if `stage` is listed as fail-safe
    #[must_use]
    pub fn is_fail_safe(&self, stage: &str) -> bool {
        self.fail_safe.iter().any(|name| name == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Validate;

    #[test]
    fn test_timer_schedule_fields() {
        assert!(Trigger::timer("*/15 * * * *").validate().is_ok());
        assert!(Trigger::timer("0 */15 * * * *").validate().is_ok());
        assert_eq!(
            Trigger::timer("* * *").validate(),
            Err(ValidationError::InvalidSchedule("* * *".to_string()))
        );
        assert!(Trigger::timer("").validate().is_err());
    }

    #[test]
    fn test_push_branch_filter() {
        let any = Trigger::push("git@example.com:web.git");
        assert!(any.matches_push("git@example.com:web.git", "feature/x"));

        let main = Trigger::push("git@example.com:web.git").on_branch("main");
        assert!(main.matches_push("git@example.com:web.git", "main"));
        assert!(!main.matches_push("git@example.com:web.git", "dev"));
        assert!(!main.matches_push("git@example.com:api.git", "main"));
        assert!(!Trigger::Manual.matches_push("git@example.com:web.git", "main"));
    }

    #[test]
    fn test_invalid_push_and_upstream() {
        assert!(Trigger::push(" ").validate().is_err());
        assert!(Trigger::push("web").on_branch("").validate().is_err());
        assert!(Trigger::upstream("").validate().is_err());

        let running = Trigger::Upstream {
            pipeline: "core".to_string(),
            on: vec![RunStatus::Running],
        };
        assert!(running.validate().is_err());
    }

    #[test]
    fn test_trigger_deserialize_yaml() {
        let trigger: Trigger = serde_yaml::from_str("type: manual\n").unwrap();
        assert_eq!(trigger, Trigger::Manual);

        let trigger: Trigger = serde_yaml::from_str("type: upstream\npipeline: core\n").unwrap();
        assert_eq!(trigger, Trigger::upstream("core"));

        let trigger: Trigger =
            serde_yaml::from_str("type: push\nrepository: web\nbranches: [main]\n").unwrap();
        assert_eq!(trigger, Trigger::push("web").on_branch("main"));
    }

    #[test]
    fn test_options_fail_safe_lookup() {
        let options = PipelineOptions::new()
            .with_fail_safe("Cleanup")
            .with_agent_timeout(Duration::from_secs(30))
            .with_retry(1);

        assert!(options.is_fail_safe("Cleanup"));
        assert!(!options.is_fail_safe("Build"));
        assert_eq!(options.agent_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(options.retry, 1);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_zero_timeout_invalid() {
        let options = PipelineOptions {
            agent_timeout_secs: Some(0),
            ..PipelineOptions::default()
        };
        assert_eq!(
            options.validate(),
            Err(ValidationError::InvalidTimeout { value: 0 })
        );
    }
}
