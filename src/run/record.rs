//! Run record
//!
//! The execution ledger of one run. Only the scheduler loop and the run
//! controller write to it; everybody else reads clones.

#![allow(clippy::must_use_candidate)]

use crate::graph::{NodeKind, StageGraph};
use crate::pipeline::{PostCondition, RunStatus, StageStatus};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Record shared between the scheduler and observers
pub type SharedRecord = Arc<RwLock<RunRecord>>;

/// Reason recorded for stages that never ran because of cancellation
pub const CANCELLED_REASON: &str = "run cancelled";

/// Whether an entry is a plain stage or a parallel join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Stage with its own steps
    Stage,
    /// Join of a parallel stage
    Join,
}

/// Per-stage ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
    /// Stage name
    pub name: String,
    /// Entry kind
    pub kind: EntryKind,
    /// Current status
    pub status: StageStatus,
    /// Combined step output
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    /// Error of the failing step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the stage was skipped or failed without running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// 1 plus the retries used, 0 if the stage never ran
    #[serde(default)]
    pub attempts: u32,
    /// Agent that ran the stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// When the stage started running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageEntry {
    fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
            status: StageStatus::Pending,
            output: String::new(),
            error: None,
            reason: None,
            attempts: 0,
            agent: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Time between start and finish
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

/// Outcome of one post-action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostActionRecord {
    /// Condition that selected it
    pub condition: PostCondition,
    /// Success or failure
    pub status: StageStatus,
    /// Combined step output
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    /// Error of the failing step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Agent it ran on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// Result of a stage that ran (or tried to)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCompletion {
    /// Terminal status
    pub status: StageStatus,
    /// Combined output
    pub output: String,
    /// Error of the failing step
    pub error: Option<String>,
    /// Why it ended without running its steps
    pub reason: Option<String>,
    /// Attempts made
    pub attempts: u32,
    /// Agent that ran it
    pub agent: Option<String>,
}

/// Execution ledger for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run id
    pub id: String,
    /// Pipeline name
    pub pipeline: String,
    /// Overall status
    pub status: RunStatus,
    /// Entries in declaration order
    pub stages: Vec<StageEntry>,
    /// Post-actions in the order they ran
    #[serde(default)]
    pub post: Vec<PostActionRecord>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Creates a record with every stage of `graph` pending
    pub fn new(id: impl Into<String>, graph: &StageGraph) -> Self {
        let stages = graph
            .stages()
            .map(|node| {
                let kind = match node.kind {
                    NodeKind::Join => EntryKind::Join,
                    NodeKind::Stage | NodeKind::Entry => EntryKind::Stage,
                };
                StageEntry::new(node.name.clone(), kind)
            })
            .collect();

        Self {
            id: id.into(),
            pipeline: graph.name().to_string(),
            status: RunStatus::Running,
            stages,
            post: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Wraps the record for sharing
    pub fn shared(self) -> SharedRecord {
        Arc::new(RwLock::new(self))
    }

    /// Looks up a stage entry
    pub fn stage(&self, name: &str) -> Option<&StageEntry> {
        self.stages.iter().find(|entry| entry.name == name)
    }

    fn stage_mut(&mut self, name: &str) -> Option<&mut StageEntry> {
        self.stages.iter_mut().find(|entry| entry.name == name)
    }

    /// Status of a stage
    pub fn status_of(&self, name: &str) -> Option<StageStatus> {
        self.stage(name).map(|entry| entry.status)
    }

    /// Name to status map used for guard evaluation
    pub fn statuses(&self) -> BTreeMap<String, StageStatus> {
        self.stages
            .iter()
            .map(|entry| (entry.name.clone(), entry.status))
            .collect()
    }

    /// Returns true once the overall status is final
    pub fn is_terminal(&self) -> bool {
        self.status != RunStatus::Running
    }

    pub(crate) fn mark_eligible(&mut self, name: &str) {
        if let Some(entry) = self.stage_mut(name) {
            entry.status = StageStatus::Eligible;
        }
    }

    pub(crate) fn mark_running(&mut self, name: &str, agent: Option<&str>) {
        if let Some(entry) = self.stage_mut(name) {
            entry.status = StageStatus::Running;
            entry.agent = agent.map(str::to_string);
            entry.started_at = Some(Utc::now());
        }
    }

    pub(crate) fn finish_stage(&mut self, name: &str, completion: StageCompletion) {
        if let Some(entry) = self.stage_mut(name) {
            let now = Utc::now();
            entry.status = completion.status;
            entry.output = completion.output;
            entry.error = completion.error;
            entry.reason = completion.reason;
            entry.attempts = completion.attempts;
            if completion.agent.is_some() {
                entry.agent = completion.agent;
            }
            entry.started_at.get_or_insert(now);
            entry.finished_at = Some(now);
        }
    }

    /// Ends a stage without running it
    pub(crate) fn resolve_stage(&mut self, name: &str, status: StageStatus, reason: impl Into<String>) {
        if let Some(entry) = self.stage_mut(name) {
            entry.status = status;
            entry.reason = Some(reason.into());
            entry.finished_at = Some(Utc::now());
        }
    }

    pub(crate) fn record_post(&mut self, post: PostActionRecord) {
        self.post.push(post);
    }

    pub(crate) fn complete(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Marks a record left unfinished by a crash as failed.
    ///
    /// Stages that were still pending become skipped and stages that were
    /// running become failed. Returns true if anything changed; runs are never
    /// resumed.
    pub fn recover(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }

        for entry in &mut self.stages {
            match entry.status {
                StageStatus::Pending | StageStatus::Eligible => {
                    entry.status = StageStatus::Skipped;
                    entry.reason = Some("run interrupted".to_string());
                }
                StageStatus::Running => {
                    entry.status = StageStatus::Failure;
                    entry.reason = Some("run interrupted".to_string());
                }
                StageStatus::Success
                | StageStatus::Failure
                | StageStatus::Skipped
                | StageStatus::Aborted => {}
            }
        }
        self.complete(RunStatus::Failure);
        true
    }

    /// Count of entries per status
    pub fn summary(&self) -> BTreeMap<StageStatus, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.stages {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        counts
    }

    /// Pretty JSON rendering
    ///
    /// # Errors
    ///
    /// Returns the serializer error, which only happens on broken writers.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parses a record written by [`to_json`](Self::to_json)
    ///
    /// # Errors
    ///
    /// Returns the parse error for malformed input.
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }
}

impl fmt::Display for RunRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} of {}: {}", self.id, self.pipeline, self.status)?;
        for entry in &self.stages {
            write!(f, "  {:<24} {:<8}", entry.name, entry.status)?;
            if let Some(ref agent) = entry.agent {
                write!(f, " on {agent}")?;
            }
            if let Some(ref reason) = entry.reason {
                write!(f, " ({reason})")?;
            } else if let Some(ref error) = entry.error {
                write!(f, " ({error})")?;
            }
            writeln!(f)?;
        }
        for post in &self.post {
            writeln!(f, "  post {:<19} {:<8}", post.condition, post.status)?;
        }
        Ok(())
    }
}
