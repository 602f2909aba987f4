//! Dead-letter queue for failed work items.
//!
//! Every retryable failure is persisted to an append-only JSONL log and
//! pushed onto a bounded in-memory queue for retry. The log survives the
//! process, so a full queue only costs timeliness, never the record.

use crate::error::Result;
use crate::pipeline::metrics::ItemKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// What failed: the audio file awaiting transcription or the transcript
/// awaiting analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum FailedPayload {
    Audio(PathBuf),
    Transcript(PathBuf),
}

impl FailedPayload {
    pub fn path(&self) -> &Path {
        match self {
            FailedPayload::Audio(path) | FailedPayload::Transcript(path) => path,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            FailedPayload::Audio(_) => ItemKind::Audio,
            FailedPayload::Transcript(_) => ItemKind::Transcript,
        }
    }
}

/// One failed work item awaiting retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: FailedPayload,
    pub error: String,
    pub retry_count: u32,
    pub worker: String,
}

impl FailedItem {
    pub fn new(payload: FailedPayload, error: &str, worker: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
            error: error.to_string(),
            retry_count: 0,
            worker: worker.to_string(),
        }
    }
}

/// Bounded retry queue backed by `failed_items.jsonl`.
pub struct DeadLetterQueue {
    items: Mutex<VecDeque<FailedItem>>,
    capacity: usize,
    log_path: PathBuf,
}

impl DeadLetterQueue {
    pub fn new(state_dir: &Path, capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            log_path: state_dir.join("failed_items.jsonl"),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Persist the item to the JSONL log and enqueue it for retry. A full
    /// queue drops the in-memory copy with a warning; the log entry remains.
    pub fn record(&self, item: FailedItem) -> Result<()> {
        self.persist(&item)?;
        let Ok(mut items) = self.items.lock() else {
            return Ok(());
        };
        if items.len() >= self.capacity {
            tracing::warn!(
                path = %item.payload.path().display(),
                "dead-letter queue full, item kept only in log"
            );
            return Ok(());
        }
        items.push_back(item);
        Ok(())
    }

    fn persist(&self, item: &FailedItem) -> Result<()> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        let line = serde_json::to_string(item)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn pop(&self) -> Option<FailedItem> {
        self.items.lock().ok()?.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
