//! Core status types for pipeline runs
//!
//! This module contains the per-stage and per-run outcome types shared by
//! the scheduler, the run controller and post-action dispatch.

#![allow(clippy::must_use_candidate)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a single stage inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Not yet evaluated
    Pending,
    /// Dependencies resolved and guard passed, waiting for dispatch
    Eligible,
    /// Steps are executing on an agent
    Running,
    /// All steps completed successfully
    Success,
    /// A step failed or the stage could not run
    Failure,
    /// Not run because of its guard, upstream policy or cancellation
    Skipped,
    /// Stopped between steps by a cancellation request
    Aborted,
}

impl StageStatus {
    /// Returns true if status is successful
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if status is a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }

    /// Returns true if status is skipped
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// Returns true once the stage can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Skipped | Self::Aborted
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Eligible => write!(f, "ELIGIBLE"),
            Self::Running => write!(f, "RUNNING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Overall outcome of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run has not finished yet
    Running,
    /// Every stage that ran succeeded
    Success,
    /// At least one stage that ran did not succeed
    Failure,
    /// Run was cancelled before it finished
    Aborted,
}

impl RunStatus {
    /// Returns true if the run succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the run failed
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }

    /// Returns true if the run was cancelled
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Aggregates terminal stage statuses.
    ///
    /// Skipped stages are ignored; the run succeeds only if every remaining
    /// stage succeeded.
    pub fn aggregate<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = StageStatus>,
    {
        let all_ok = statuses
            .into_iter()
            .filter(|s| !s.is_skipped())
            .all(|s| s.is_success());
        if all_ok { Self::Success } else { Self::Failure }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Trait for types that can be validated
#[allow(clippy::missing_errors_doc)]
pub trait Validate {
    /// Type of validation error
    type Error;

    /// Validates this type
    fn validate(&self) -> std::result::Result<(), Self::Error>;
}
