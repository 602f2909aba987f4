//! The two-stage processing pipeline: transcription, then analysis.

pub mod dead_letter;
pub mod handlers;
pub mod metrics;
pub mod scheduler;

pub use dead_letter::{DeadLetterQueue, FailedItem, FailedPayload};
pub use handlers::{
    AnalysisHandler, ProcessedSet, StageFailure, StageOutcome, StageResult, TranscriptionHandler,
};
pub use metrics::{ItemKind, MetricsCollector, MetricsSummary, ProcessingMetric};
pub use scheduler::{Pipeline, PipelineHandle, scan_unanalyzed, scan_untranscribed};
