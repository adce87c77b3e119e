//! Metrics collection
//!
//! Provides metrics for finished runs, derived from their records.

use crate::pipeline::{RunStatus, StageStatus};
use crate::run::RunRecord;
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Metrics for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetrics {
    /// Run id
    pub run_id: String,

    /// Pipeline name
    pub pipeline_name: String,

    /// Overall status
    pub status: RunStatus,

    /// Wall-clock duration, zero for unfinished records
    pub duration: Duration,

    /// Number of stages, joins included
    pub stage_count: usize,

    /// Stage counts by terminal status
    pub by_status: BTreeMap<StageStatus, usize>,

    /// Retries spent across all stages
    pub retries: u32,

    /// Failed post-actions
    pub failed_post_actions: usize,
}

impl RunMetrics {
    /// Derives metrics from a record
    #[must_use]
    pub fn from_record(record: &RunRecord) -> Self {
        let duration = record
            .finished_at
            .and_then(|end| (end - record.started_at).to_std().ok())
            .unwrap_or_default();

        Self {
            run_id: record.id.clone(),
            pipeline_name: record.pipeline.clone(),
            status: record.status,
            duration,
            stage_count: record.stages.len(),
            by_status: record.summary(),
            retries: record
                .stages
                .iter()
                .map(|entry| entry.attempts.saturating_sub(1))
                .sum(),
            failed_post_actions: record
                .post
                .iter()
                .filter(|post| post.status.is_failure())
                .count(),
        }
    }

    /// Stages that ended with `status`
    #[must_use]
    pub fn count(&self, status: StageStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Runs a collector keeps unless told otherwise
pub const DEFAULT_RETENTION: usize = 256;

/// Metrics of recent runs, oldest evicted first
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<VecDeque<RunMetrics>>>,
    retention: usize,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl MetricsCollector {
    /// Collector keeping the last [`DEFAULT_RETENTION`] runs
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector keeping the last `retention` runs (at least one)
    #[must_use]
    pub fn with_retention(retention: usize) -> Self {
        Self {
            metrics: Arc::new(RwLock::new(VecDeque::new())),
            retention: retention.max(1),
        }
    }

    /// Records metrics for a run, replacing earlier ones with the same id
    pub fn record(&self, metrics: RunMetrics) {
        let mut stored = self.metrics.write();
        stored.retain(|m| m.run_id != metrics.run_id);
        stored.push_back(metrics);
        while stored.len() > self.retention {
            stored.pop_front();
        }
    }

    /// Derives and records metrics for a finished record
    pub fn observe(&self, record: &RunRecord) -> RunMetrics {
        let metrics = RunMetrics::from_record(record);
        self.record(metrics.clone());
        metrics
    }

    /// Gets metrics for a specific run
    #[must_use]
    pub fn get(&self, run_id: &str) -> Option<RunMetrics> {
        self.metrics
            .read()
            .iter()
            .find(|m| m.run_id == run_id)
            .cloned()
    }

    /// Gets all retained metrics of one pipeline, oldest first
    #[must_use]
    pub fn for_pipeline(&self, pipeline_name: &str) -> Vec<RunMetrics> {
        self.metrics
            .read()
            .iter()
            .filter(|m| m.pipeline_name == pipeline_name)
            .cloned()
            .collect()
    }

    /// Gets all retained metrics, oldest first
    #[must_use]
    pub fn get_all(&self) -> Vec<RunMetrics> {
        self.metrics.read().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::compile;
    use crate::pipeline::{PipelineDefinition, StageDefinition, Step};

    fn record() -> RunRecord {
        let definition = PipelineDefinition::builder()
            .name("web")
            .stage(StageDefinition::new("Build", vec![Step::shell("make")]))
            .stage(StageDefinition::new("Test", vec![Step::shell("make test")]))
            .build_unchecked();
        let mut record = RunRecord::new("run-7", &compile(&definition).unwrap());
        record.stages[0].status = StageStatus::Success;
        record.stages[0].attempts = 3;
        record.stages[1].status = StageStatus::Failure;
        record.stages[1].attempts = 1;
        record.status = RunStatus::Failure;
        record.finished_at = Some(record.started_at + chrono::Duration::seconds(4));
        record
    }

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new();

        assert!(collector.get("run-7").is_none());
        assert!(collector.get_all().is_empty());
    }

    #[test]
    fn test_metrics_from_record() {
        let metrics = RunMetrics::from_record(&record());

        assert_eq!(metrics.pipeline_name, "web");
        assert_eq!(metrics.status, RunStatus::Failure);
        assert_eq!(metrics.duration, Duration::from_secs(4));
        assert_eq!(metrics.stage_count, 2);
        assert_eq!(metrics.count(StageStatus::Success), 1);
        assert_eq!(metrics.count(StageStatus::Failure), 1);
        assert_eq!(metrics.count(StageStatus::Skipped), 0);
        assert_eq!(metrics.retries, 2);
    }

    #[test]
    fn test_metrics_collector_observe() {
        let collector = MetricsCollector::new();
        collector.observe(&record());

        let retrieved = collector.get("run-7").unwrap();
        assert_eq!(retrieved.stage_count, 2);
        assert_eq!(collector.for_pipeline("web").len(), 1);
        assert!(collector.for_pipeline("api").is_empty());
    }

    #[test]
    fn test_metrics_collector_evicts_oldest() {
        let collector = MetricsCollector::with_retention(2);
        for id in ["run-1", "run-2", "run-1", "run-3"] {
            let mut record = record();
            record.id = id.to_string();
            collector.observe(&record);
        }

        let ids: Vec<_> = collector.get_all().into_iter().map(|m| m.run_id).collect();
        assert_eq!(ids, vec!["run-1".to_string(), "run-3".to_string()]);
        assert!(collector.get("run-2").is_none());
    }
}
