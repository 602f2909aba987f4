//! Default configuration constants for callscribe.
//!
//! Shared constants used across configuration types to ensure consistency
//! and eliminate duplication.

/// Default interval between completion-detector polls, in seconds.
pub const POLL_INTERVAL_SECS: u64 = 3;

/// Default age a candidate file must reach before the stability probe runs,
/// in seconds.
///
/// Size and modification-time heuristics are unreliable over network
/// filesystems; the age gate plus an active-handle probe is the stronger
/// signal, so the gate can stay short.
pub const COMPLETION_THRESHOLD_SECS: u64 = 10;

/// Default bounded capacity of the transcription queue.
pub const TRANSCRIPTION_QUEUE_SIZE: usize = 200;

/// Default bounded capacity of the analysis queue.
pub const ANALYSIS_QUEUE_SIZE: usize = 50;

/// Default bounded capacity of the dead-letter queue.
pub const DEAD_LETTER_QUEUE_SIZE: usize = 1000;

/// Default worker count per pipeline stage.
pub const WORKERS_PER_STAGE: usize = 2;

/// How long a blocked worker waits for a queue item before re-checking the
/// shutdown flag, in milliseconds.
pub const WORKER_RECV_TIMEOUT_MS: u64 = 5000;

/// Maximum retry attempts for a failed work item before it is logged as
/// permanently failed.
pub const MAX_RETRIES: u32 = 3;

/// Base of the exponential backoff between dead-letter retries, in seconds.
/// Attempt n sleeps `BACKOFF_BASE_SECS << n` (1s, 2s, 4s).
pub const BACKOFF_BASE_SECS: u64 = 1;

/// Default interval between metrics summary reports, in seconds.
pub const METRICS_REPORT_INTERVAL_SECS: u64 = 300;

/// Maximum number of processing metrics retained in memory.
pub const METRICS_MAX_HISTORY: usize = 1000;

/// How long shutdown waits for the stage queues to drain before forcing
/// termination, in seconds.
pub const SHUTDOWN_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Minimum transcript length (bytes, trimmed) worth sending to analysis.
pub const MIN_TRANSCRIPT_SIZE: usize = 100;

/// Confidence below which a word is flagged `low_confidence`.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.60;

/// Confidence below which a word is flagged `critical_confidence`.
pub const CRITICAL_CONFIDENCE_THRESHOLD: f64 = 0.50;

/// Critical-confidence threshold applied to common words.
///
/// Function words, acknowledgements and contractions are both frequent and
/// intrinsically hard for engines to score, so they get a lower bar.
pub const COMMON_WORDS_CONFIDENCE_THRESHOLD: f64 = 0.25;

/// Minimum similarity for an alignment candidate to count as a match.
pub const ALIGNMENT_MATCH_THRESHOLD: f64 = 0.6;

/// How many external tokens past the cursor the aligner will consider.
pub const ALIGNMENT_SEARCH_WINDOW: usize = 8;

/// Similarity above which two differently-spelled tokens are still treated
/// as agreeing (no mismatch flag).
pub const CLOSE_MATCH_THRESHOLD: f64 = 0.8;

/// Words of context captured on each side of a reviewed word.
pub const CONTEXT_WORDS: usize = 5;

/// Lookahead window when detecting spelled-out phone number sequences.
pub const PHONE_SEQUENCE_WINDOW: usize = 10;

/// Default audio extensions accepted by the completion detector.
pub const ALLOWED_EXTENSIONS: &[&str] = &["wav"];
