//! Per-item processing metrics with a bounded in-memory history.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// Which stage a work item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Audio,
    Transcript,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Audio => "audio",
            ItemKind::Transcript => "transcript",
        }
    }
}

/// Outcome of one processing attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingMetric {
    pub kind: ItemKind,
    pub started: DateTime<Utc>,
    pub duration_secs: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub file_size: u64,
    pub api_calls: u32,
    pub worker: String,
}

/// Aggregate view over the recorded history.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSummary {
    pub total_processed: usize,
    pub successes: usize,
    pub failures: usize,
    /// 0.0 when nothing has been processed yet.
    pub success_rate: f64,
    pub average_duration_secs: BTreeMap<String, f64>,
    pub api_calls_by_worker: BTreeMap<String, u64>,
}

/// Thread-safe collector keeping the most recent `max_history` metrics.
pub struct MetricsCollector {
    history: Mutex<VecDeque<ProcessingMetric>>,
    max_history: usize,
}

impl MetricsCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(max_history.min(1024))),
            max_history: max_history.max(1),
        }
    }

    pub fn record(&self, metric: ProcessingMetric) {
        let Ok(mut history) = self.history.lock() else {
            return;
        };
        if history.len() == self.max_history {
            history.pop_front();
        }
        history.push_back(metric);
    }

    pub fn len(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> MetricsSummary {
        let history = match self.history.lock() {
            Ok(history) => history,
            Err(_) => {
                return MetricsSummary {
                    total_processed: 0,
                    successes: 0,
                    failures: 0,
                    success_rate: 0.0,
                    average_duration_secs: BTreeMap::new(),
                    api_calls_by_worker: BTreeMap::new(),
                };
            }
        };

        let total = history.len();
        let successes = history.iter().filter(|m| m.success).count();

        let mut duration_sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let mut api_calls: BTreeMap<String, u64> = BTreeMap::new();
        for metric in history.iter() {
            let entry = duration_sums
                .entry(metric.kind.as_str().to_string())
                .or_insert((0.0, 0));
            entry.0 += metric.duration_secs;
            entry.1 += 1;
            *api_calls.entry(metric.worker.clone()).or_insert(0) += u64::from(metric.api_calls);
        }

        MetricsSummary {
            total_processed: total,
            successes,
            failures: total - successes,
            success_rate: if total > 0 {
                successes as f64 / total as f64
            } else {
                0.0
            },
            average_duration_secs: duration_sums
                .into_iter()
                .map(|(kind, (sum, count))| (kind, sum / count as f64))
                .collect(),
            api_calls_by_worker: api_calls,
        }
    }

    /// Log the current summary as structured JSON.
    pub fn report(&self) {
        let summary = self.summary();
        match serde_json::to_string(&summary) {
            Ok(json) => tracing::info!(summary = %json, "processing metrics"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize metrics summary"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(kind: ItemKind, success: bool, duration: f64, worker: &str) -> ProcessingMetric {
        ProcessingMetric {
            kind,
            started: Utc::now(),
            duration_secs: duration,
            success,
            error: if success { None } else { Some("boom".to_string()) },
            file_size: 1024,
            api_calls: 1,
            worker: worker.to_string(),
        }
    }

    #[test]
    fn test_summary_counts_and_rates() {
        let collector = MetricsCollector::new(100);
        collector.record(metric(ItemKind::Audio, true, 2.0, "transcribe-0"));
        collector.record(metric(ItemKind::Audio, true, 4.0, "transcribe-1"));
        collector.record(metric(ItemKind::Transcript, false, 1.0, "analyze-0"));

        let summary = collector.summary();
        assert_eq!(summary.total_processed, 3);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.failures, 1);
        assert!((summary.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.average_duration_secs["audio"], 3.0);
        assert_eq!(summary.average_duration_secs["transcript"], 1.0);
        assert_eq!(summary.api_calls_by_worker["transcribe-0"], 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let collector = MetricsCollector::new(5);
        for _ in 0..20 {
            collector.record(metric(ItemKind::Audio, true, 1.0, "w"));
        }
        assert_eq!(collector.len(), 5);
        assert_eq!(collector.summary().total_processed, 5);
    }

    #[test]
    fn test_empty_summary() {
        let collector = MetricsCollector::new(10);
        let summary = collector.summary();
        assert_eq!(summary.total_processed, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert!(summary.average_duration_secs.is_empty());
    }
}
