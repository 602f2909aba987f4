//! Two-stage worker pipeline over bounded queues.
//!
//! Audio paths enter the transcription queue; finished transcripts are handed
//! to the analysis queue. Each stage runs a fixed pool of worker threads. A
//! dead-letter worker retries failed items with exponential backoff, and a
//! reporter thread logs aggregate metrics periodically.

use crate::config::Config;
use crate::engine::{CallAnalyzer, TranscriptionEngine};
use crate::error::{CallscribeError, Result};
use crate::pipeline::dead_letter::{DeadLetterQueue, FailedItem, FailedPayload};
use crate::pipeline::handlers::{
    AnalysisHandler, ProcessedSet, StageFailure, StageOutcome, StageResult, TranscriptionHandler,
};
use crate::pipeline::metrics::{ItemKind, MetricsCollector, ProcessingMetric};
use crate::watch::{ProbeOutcome, RenameProbe, StabilityProbe};
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Work item on a stage queue.
pub enum QueueItem {
    Job(PathBuf),
    /// One per worker; tells it to stop after the queued jobs ahead of it.
    Shutdown,
}

/// Sleep in short slices so shutdown is observed promptly.
fn sleep_while_running(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(100).min(duration));
    }
}

/// The assembled pipeline, ready to start.
pub struct Pipeline {
    config: Arc<Config>,
    engine: Arc<dyn TranscriptionEngine>,
    analyzer: Arc<dyn CallAnalyzer>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        engine: Arc<dyn TranscriptionEngine>,
        analyzer: Arc<dyn CallAnalyzer>,
    ) -> Self {
        Self {
            config,
            engine,
            analyzer,
        }
    }

    /// Spawns the worker pools, dead-letter worker and metrics reporter.
    pub fn start(self) -> Result<PipelineHandle> {
        let cfg = &self.config.pipeline;
        let running = Arc::new(AtomicBool::new(true));
        let recv_timeout = Duration::from_millis(cfg.worker_recv_timeout_ms);

        let (transcription_tx, transcription_rx) =
            bounded::<QueueItem>(cfg.transcription_queue_size);
        let (analysis_tx, analysis_rx) = bounded::<QueueItem>(cfg.analysis_queue_size);

        let metrics = Arc::new(MetricsCollector::new(cfg.metrics_max_history));
        let dead_letters = Arc::new(DeadLetterQueue::new(
            &self.config.paths.state_dir,
            cfg.dead_letter_queue_size,
        ));
        let processed = Arc::new(ProcessedSet::load(&self.config.paths.state_dir));

        let transcription_handler = Arc::new(TranscriptionHandler::new(
            self.engine.clone(),
            self.config.clone(),
        ));
        let analysis_handler = Arc::new(AnalysisHandler::new(
            self.analyzer.clone(),
            self.config.clone(),
            processed.clone(),
            self.engine.name(),
        ));

        let mut threads = Vec::new();

        for i in 0..cfg.transcription_workers.max(1) {
            let worker = TranscriptionWorker {
                name: format!("transcribe-{i}"),
                rx: transcription_rx.clone(),
                analysis_tx: analysis_tx.clone(),
                handler: transcription_handler.clone(),
                metrics: metrics.clone(),
                dead_letters: dead_letters.clone(),
                running: running.clone(),
                recv_timeout,
            };
            threads.push(thread::spawn(move || worker.run()));
        }

        for i in 0..cfg.analysis_workers.max(1) {
            let worker = AnalysisWorker {
                name: format!("analyze-{i}"),
                rx: analysis_rx.clone(),
                handler: analysis_handler.clone(),
                metrics: metrics.clone(),
                dead_letters: dead_letters.clone(),
                running: running.clone(),
                recv_timeout,
            };
            threads.push(thread::spawn(move || worker.run()));
        }

        {
            let worker = DeadLetterWorker {
                dead_letters: dead_letters.clone(),
                transcription_handler,
                analysis_handler,
                analysis_tx: analysis_tx.clone(),
                running: running.clone(),
                max_retries: cfg.max_retries,
                backoff_base: Duration::from_secs(cfg.backoff_base_secs),
            };
            threads.push(thread::spawn(move || worker.run()));
        }

        {
            let metrics = metrics.clone();
            let running = running.clone();
            let interval = Duration::from_secs(cfg.metrics_report_interval_secs.max(1));
            threads.push(thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    sleep_while_running(&running, interval);
                    if !metrics.is_empty() {
                        metrics.report();
                    }
                }
            }));
        }

        tracing::info!(
            transcription_workers = cfg.transcription_workers.max(1),
            analysis_workers = cfg.analysis_workers.max(1),
            "pipeline started"
        );

        Ok(PipelineHandle {
            running,
            threads,
            transcription_tx,
            analysis_tx,
            metrics,
            dead_letters,
            processed,
            transcription_workers: cfg.transcription_workers.max(1),
            analysis_workers: cfg.analysis_workers.max(1),
            drain_timeout: Duration::from_secs(cfg.shutdown_drain_timeout_secs),
        })
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    transcription_tx: Sender<QueueItem>,
    analysis_tx: Sender<QueueItem>,
    metrics: Arc<MetricsCollector>,
    dead_letters: Arc<DeadLetterQueue>,
    processed: Arc<ProcessedSet>,
    transcription_workers: usize,
    analysis_workers: usize,
    drain_timeout: Duration,
}

impl PipelineHandle {
    /// Queue an audio file for transcription without blocking.
    pub fn submit_audio(&self, path: &Path) -> Result<()> {
        match self
            .transcription_tx
            .try_send(QueueItem::Job(path.to_path_buf()))
        {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CallscribeError::QueueFull {
                queue: "transcription".to_string(),
            }),
            Err(TrySendError::Disconnected(_)) => {
                Err(CallscribeError::Other("pipeline stopped".to_string()))
            }
        }
    }

    /// Queue a transcript directly for analysis.
    pub fn submit_transcript(&self, path: &Path) -> Result<()> {
        match self.analysis_tx.try_send(QueueItem::Job(path.to_path_buf())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CallscribeError::QueueFull {
                queue: "analysis".to_string(),
            }),
            Err(TrySendError::Disconnected(_)) => {
                Err(CallscribeError::Other("pipeline stopped".to_string()))
            }
        }
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn dead_letters(&self) -> Arc<DeadLetterQueue> {
        self.dead_letters.clone()
    }

    pub fn processed(&self) -> Arc<ProcessedSet> {
        self.processed.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the pipeline: lets queued work drain up to the configured
    /// timeout, then signals shutdown and joins the worker threads.
    pub fn stop(mut self) {
        // Sentinels queue behind the remaining jobs, one per worker.
        for _ in 0..self.transcription_workers {
            let _ = self
                .transcription_tx
                .send_timeout(QueueItem::Shutdown, Duration::from_secs(1));
        }

        let deadline = Instant::now() + self.drain_timeout;
        while (!self.transcription_tx.is_empty() || !self.analysis_tx.is_empty())
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(50));
        }
        if !self.transcription_tx.is_empty() || !self.analysis_tx.is_empty() {
            tracing::warn!(
                transcription = self.transcription_tx.len(),
                analysis = self.analysis_tx.len(),
                "shutdown drain timeout reached with queued items remaining"
            );
        }

        for _ in 0..self.analysis_workers {
            let _ = self
                .analysis_tx
                .send_timeout(QueueItem::Shutdown, Duration::from_secs(1));
        }
        self.running.store(false, Ordering::SeqCst);

        // Join with a deadline; anything still running is detached and dies
        // with the process, as with the recording pipeline before it.
        let join_deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let mut remaining = Vec::new();
            for handle in self.threads.drain(..) {
                if handle.is_finished() {
                    if handle.join().is_err() {
                        tracing::error!("pipeline thread panicked");
                    }
                } else {
                    remaining.push(handle);
                }
            }
            self.threads = remaining;

            if self.threads.is_empty() {
                break;
            }
            if Instant::now() >= join_deadline {
                tracing::warn!(
                    threads = self.threads.len(),
                    "shutdown timeout, detaching remaining threads"
                );
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }

        if let Err(e) = self.processed.persist() {
            tracing::warn!(error = %e, "failed to persist processed set on shutdown");
        }
        tracing::info!("pipeline stopped");
    }
}

fn record_attempt(
    metrics: &MetricsCollector,
    kind: ItemKind,
    path: &Path,
    worker: &str,
    started: chrono::DateTime<Utc>,
    elapsed: Duration,
    result: &StageResult,
) {
    let (success, error, api_calls) = match result {
        Ok(StageOutcome::Skipped { .. }) => (true, None, 0),
        Ok(_) => (true, None, 1),
        Err(failure) => (false, Some(failure.message.clone()), 1),
    };
    metrics.record(ProcessingMetric {
        kind,
        started,
        duration_secs: elapsed.as_secs_f64(),
        success,
        error,
        file_size: fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        api_calls,
        worker: worker.to_string(),
    });
}

fn record_failure(
    dead_letters: &DeadLetterQueue,
    payload: FailedPayload,
    failure: &StageFailure,
    worker: &str,
) {
    let path = payload.path().to_path_buf();
    if failure.retryable {
        tracing::warn!(path = %path.display(), error = %failure.message, "stage failed, queued for retry");
        if let Err(e) = dead_letters.record(FailedItem::new(payload, &failure.message, worker)) {
            tracing::error!(error = %e, "failed to record dead-letter item");
        }
    } else {
        tracing::error!(path = %path.display(), error = %failure.message, "stage failed permanently, skipping");
    }
}

struct TranscriptionWorker {
    name: String,
    rx: Receiver<QueueItem>,
    analysis_tx: Sender<QueueItem>,
    handler: Arc<TranscriptionHandler>,
    metrics: Arc<MetricsCollector>,
    dead_letters: Arc<DeadLetterQueue>,
    running: Arc<AtomicBool>,
    recv_timeout: Duration,
}

impl TranscriptionWorker {
    fn run(self) {
        loop {
            match self.rx.recv_timeout(self.recv_timeout) {
                Ok(QueueItem::Job(path)) => self.process(&path),
                Ok(QueueItem::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!(worker = %self.name, "transcription worker stopped");
    }

    fn process(&self, path: &Path) {
        let started = Utc::now();
        let t0 = Instant::now();
        let result = self.handler.handle(path);
        record_attempt(
            &self.metrics,
            ItemKind::Audio,
            path,
            &self.name,
            started,
            t0.elapsed(),
            &result,
        );

        match result {
            Ok(StageOutcome::Completed { next: Some(transcript) }) => {
                self.hand_off(transcript);
            }
            Ok(_) => {}
            Err(failure) => record_failure(
                &self.dead_letters,
                FailedPayload::Audio(path.to_path_buf()),
                &failure,
                &self.name,
            ),
        }
    }

    fn hand_off(&self, transcript: PathBuf) {
        match self.analysis_tx.try_send(QueueItem::Job(transcript.clone())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // The dead-letter worker re-runs it once the queue recovers.
                record_failure(
                    &self.dead_letters,
                    FailedPayload::Transcript(transcript),
                    &StageFailure::retryable("analysis queue full"),
                    &self.name,
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!(path = %transcript.display(), "analysis queue closed, dropping hand-off");
            }
        }
    }
}

struct AnalysisWorker {
    name: String,
    rx: Receiver<QueueItem>,
    handler: Arc<AnalysisHandler>,
    metrics: Arc<MetricsCollector>,
    dead_letters: Arc<DeadLetterQueue>,
    running: Arc<AtomicBool>,
    recv_timeout: Duration,
}

impl AnalysisWorker {
    fn run(self) {
        loop {
            match self.rx.recv_timeout(self.recv_timeout) {
                Ok(QueueItem::Job(path)) => self.process(&path),
                Ok(QueueItem::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!(worker = %self.name, "analysis worker stopped");
    }

    fn process(&self, path: &Path) {
        let started = Utc::now();
        let t0 = Instant::now();
        let result = self.handler.handle(path);
        record_attempt(
            &self.metrics,
            ItemKind::Transcript,
            path,
            &self.name,
            started,
            t0.elapsed(),
            &result,
        );

        if let Err(failure) = result {
            record_failure(
                &self.dead_letters,
                FailedPayload::Transcript(path.to_path_buf()),
                &failure,
                &self.name,
            );
        }
    }
}

struct DeadLetterWorker {
    dead_letters: Arc<DeadLetterQueue>,
    transcription_handler: Arc<TranscriptionHandler>,
    analysis_handler: Arc<AnalysisHandler>,
    analysis_tx: Sender<QueueItem>,
    running: Arc<AtomicBool>,
    max_retries: u32,
    backoff_base: Duration,
}

impl DeadLetterWorker {
    fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            let Some(item) = self.dead_letters.pop() else {
                sleep_while_running(&self.running, Duration::from_millis(500));
                continue;
            };
            self.retry(item);
        }
        tracing::debug!("dead-letter worker stopped");
    }

    fn retry(&self, mut item: FailedItem) {
        if item.retry_count >= self.max_retries {
            tracing::error!(
                path = %item.payload.path().display(),
                retries = item.retry_count,
                "item permanently failed"
            );
            return;
        }

        // 1s, 2s, 4s with the default base.
        let backoff = self.backoff_base * 2u32.pow(item.retry_count);
        tracing::info!(
            path = %item.payload.path().display(),
            attempt = item.retry_count + 1,
            backoff_secs = backoff.as_secs(),
            "retrying failed item"
        );
        sleep_while_running(&self.running, backoff);
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let result = match &item.payload {
            FailedPayload::Audio(path) => {
                let result = self.transcription_handler.handle(path);
                if let Ok(StageOutcome::Completed { next: Some(t) }) = &result {
                    // Success on retry still has to reach the next stage.
                    if self.analysis_tx.try_send(QueueItem::Job(t.clone())).is_err() {
                        let _ = self.dead_letters.record(FailedItem::new(
                            FailedPayload::Transcript(t.clone()),
                            "analysis queue full",
                            "dead-letter",
                        ));
                    }
                }
                result
            }
            FailedPayload::Transcript(path) => self.analysis_handler.handle(path),
        };

        match result {
            Ok(_) => {
                tracing::info!(path = %item.payload.path().display(), "retry succeeded");
            }
            Err(failure) if failure.retryable => {
                item.retry_count += 1;
                item.error = failure.message;
                if item.retry_count >= self.max_retries {
                    tracing::error!(
                        path = %item.payload.path().display(),
                        retries = item.retry_count,
                        error = %item.error,
                        "item permanently failed"
                    );
                } else if let Err(e) = self.dead_letters.record(item) {
                    tracing::error!(error = %e, "failed to re-queue dead-letter item");
                }
            }
            Err(failure) => {
                tracing::error!(
                    path = %item.payload.path().display(),
                    error = %failure.message,
                    "retry failed permanently"
                );
            }
        }
    }
}

/// Audio files without a transcript, skipping anything still locked.
pub fn scan_untranscribed(config: &Config) -> Vec<PathBuf> {
    let probe = RenameProbe;
    let mut found = Vec::new();
    for source in source_dirs(&config.paths.base_dir) {
        let audio_dir = source.join("Audio");
        let transcripts_dir = source.join("Transcripts");
        for path in files_in(&audio_dir) {
            let allowed = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| {
                    config
                        .monitor
                        .allowed_extensions
                        .iter()
                        .any(|a| a.eq_ignore_ascii_case(e))
                });
            if !allowed {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // Append rather than `with_extension`: dotted recorder stems
            // would lose their sequence number and miss the transcript.
            if transcripts_dir.join(format!("{stem}.txt")).exists() {
                continue;
            }
            match probe.probe(&path) {
                ProbeOutcome::Stable => found.push(path),
                outcome => {
                    tracing::debug!(path = %path.display(), ?outcome, "skipping locked or failed audio");
                }
            }
        }
    }
    found
}

/// Transcripts without a call record in the JSON output directory.
pub fn scan_unanalyzed(config: &Config) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for source in source_dirs(&config.paths.base_dir) {
        for path in files_in(&source.join("Transcripts")) {
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !config
                .paths
                .json_output_dir
                .join(format!("{stem}.json"))
                .exists()
            {
                found.push(path);
            }
        }
    }
    found
}

fn source_dirs(base: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(base) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect()
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockAnalyzer, MockEngine};
    use std::time::Duration;

    fn test_config(base: &Path) -> Arc<Config> {
        let mut config = Config::default();
        config.paths.base_dir = base.to_path_buf();
        config.paths.json_output_dir = base.join("json");
        config.paths.state_dir = base.join("state");
        config.analysis.min_transcript_size = 5;
        config.pipeline.transcription_workers = 1;
        config.pipeline.analysis_workers = 1;
        config.pipeline.worker_recv_timeout_ms = 100;
        config.pipeline.metrics_report_interval_secs = 3600;
        config.pipeline.shutdown_drain_timeout_secs = 10;
        Arc::new(config)
    }

    fn source_layout(base: &Path) -> PathBuf {
        let audio_dir = base.join("ext101/Audio");
        fs::create_dir_all(&audio_dir).unwrap();
        fs::create_dir_all(base.join("ext101/Transcripts")).unwrap();
        audio_dir
    }

    fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(25));
        }
        false
    }

    #[test]
    fn test_end_to_end_audio_to_record() {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = source_layout(dir.path());
        let audio = audio_dir.join("x101_2024-03-15.14-30.1.wav");
        fs::write(&audio, b"RIFF").unwrap();

        let config = test_config(dir.path());
        let engine = Arc::new(MockEngine::new("mock").with_text("Hello, calling about my claim."));
        let analyzer = Arc::new(MockAnalyzer::new("mock-model"));
        let handle = Pipeline::new(config.clone(), engine, analyzer.clone())
            .start()
            .unwrap();

        handle.submit_audio(&audio).unwrap();

        let record_path = config
            .paths
            .json_output_dir
            .join("x101_2024-03-15.14-30.1.json");
        assert!(
            wait_for(Duration::from_secs(10), || record_path.exists()),
            "call record was not written"
        );
        assert_eq!(analyzer.call_count(), 1);

        handle.stop();
    }

    #[test]
    fn test_retry_recovers_after_transient_failure() {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = source_layout(dir.path());
        let audio = audio_dir.join("call.wav");
        fs::write(&audio, b"RIFF").unwrap();

        let config = test_config(dir.path());
        let engine = Arc::new(
            MockEngine::new("mock")
                .with_text("a transcript that is long enough")
                .failing_times(1),
        );
        let handle = Pipeline::new(
            config.clone(),
            engine.clone(),
            Arc::new(MockAnalyzer::new("m")),
        )
        .start()
        .unwrap();

        handle.submit_audio(&audio).unwrap();

        // First attempt fails; the dead-letter worker retries after ~1s.
        let transcript = dir.path().join("ext101/Transcripts/call.txt");
        assert!(
            wait_for(Duration::from_secs(10), || transcript.exists()),
            "retry did not produce a transcript"
        );
        assert_eq!(engine.call_count(), 2);

        handle.stop();
    }

    #[test]
    fn test_retry_gives_up_after_max_retries() {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = source_layout(dir.path());
        let audio = audio_dir.join("call.wav");
        fs::write(&audio, b"RIFF").unwrap();

        let config = test_config(dir.path());
        let engine = Arc::new(MockEngine::new("mock").always_failing());
        let handle = Pipeline::new(
            config.clone(),
            engine.clone(),
            Arc::new(MockAnalyzer::new("m")),
        )
        .start()
        .unwrap();

        handle.submit_audio(&audio).unwrap();

        // Initial attempt plus three backed-off retries (1s, 2s, 4s).
        assert!(
            wait_for(Duration::from_secs(20), || engine.call_count() >= 4),
            "retries were not exhausted"
        );
        // The item is dropped as permanently failed, never retried again.
        thread::sleep(Duration::from_secs(2));
        assert_eq!(engine.call_count(), 4);

        handle.stop();
        assert!(!dir.path().join("ext101/Transcripts/call.txt").exists());
    }

    #[test]
    fn test_queue_full_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.base_dir = dir.path().to_path_buf();
        config.paths.json_output_dir = dir.path().join("json");
        config.paths.state_dir = dir.path().join("state");
        config.pipeline.transcription_queue_size = 1;
        config.pipeline.transcription_workers = 1;
        config.pipeline.analysis_workers = 1;
        config.pipeline.worker_recv_timeout_ms = 100;

        // A slow engine keeps the worker busy while the queue fills.
        struct SlowEngine;
        impl TranscriptionEngine for SlowEngine {
            fn transcribe(
                &self,
                _path: &Path,
            ) -> Result<crate::engine::TranscriptionResult> {
                thread::sleep(Duration::from_millis(500));
                Ok(crate::engine::TranscriptionResult::default())
            }
            fn name(&self) -> &str {
                "slow"
            }
        }

        let handle = Pipeline::new(
            Arc::new(config),
            Arc::new(SlowEngine),
            Arc::new(MockAnalyzer::new("m")),
        )
        .start()
        .unwrap();

        // Fill the single-slot queue faster than the worker drains it.
        let mut saw_full = false;
        for i in 0..50 {
            let path = dir.path().join(format!("a{i}.wav"));
            if matches!(
                handle.submit_audio(&path),
                Err(CallscribeError::QueueFull { .. })
            ) {
                saw_full = true;
                break;
            }
        }
        assert!(saw_full, "queue never reported full");

        handle.stop();
    }

    #[test]
    fn test_metrics_recorded_per_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = source_layout(dir.path());
        let audio = audio_dir.join("call.wav");
        fs::write(&audio, b"RIFF").unwrap();

        let config = test_config(dir.path());
        let handle = Pipeline::new(
            config,
            Arc::new(MockEngine::new("mock").with_text("hello there this is long enough")),
            Arc::new(MockAnalyzer::new("m")),
        )
        .start()
        .unwrap();

        handle.submit_audio(&audio).unwrap();
        let metrics = handle.metrics();
        assert!(
            wait_for(Duration::from_secs(10), || metrics.len() >= 2),
            "expected one metric per stage"
        );
        let summary = metrics.summary();
        assert_eq!(summary.failures, 0);
        assert!(summary.average_duration_secs.contains_key("audio"));
        assert!(summary.average_duration_secs.contains_key("transcript"));

        handle.stop();
    }

    #[test]
    fn test_scan_untranscribed_and_unanalyzed() {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = source_layout(dir.path());
        let transcripts_dir = dir.path().join("ext101/Transcripts");

        fs::write(audio_dir.join("new.wav"), b"RIFF").unwrap();
        fs::write(audio_dir.join("done.wav"), b"RIFF").unwrap();
        fs::write(transcripts_dir.join("done.txt"), "transcribed already").unwrap();
        fs::write(audio_dir.join("notes.txt"), "not audio").unwrap();

        let config = test_config(dir.path());
        let untranscribed = scan_untranscribed(&config);
        assert_eq!(untranscribed, vec![audio_dir.join("new.wav")]);

        let unanalyzed = scan_unanalyzed(&config);
        assert_eq!(unanalyzed, vec![transcripts_dir.join("done.txt")]);

        // Once the record exists the transcript is no longer a candidate.
        fs::create_dir_all(&config.paths.json_output_dir).unwrap();
        fs::write(config.paths.json_output_dir.join("done.json"), "{}").unwrap();
        assert!(scan_unanalyzed(&config).is_empty());
    }

    #[test]
    fn test_scan_untranscribed_keeps_dotted_stems() {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = source_layout(dir.path());
        let transcripts_dir = dir.path().join("ext101/Transcripts");

        // Recorder stems carry dots; the transcript check must not truncate
        // the sequence number.
        fs::write(audio_dir.join("x101_2024-03-15.14-30.1.wav"), b"RIFF").unwrap();
        fs::write(
            transcripts_dir.join("x101_2024-03-15.14-30.1.txt"),
            "already transcribed",
        )
        .unwrap();
        fs::write(audio_dir.join("x101_2024-03-15.14-30.2.wav"), b"RIFF").unwrap();

        let config = test_config(dir.path());
        assert_eq!(
            scan_untranscribed(&config),
            vec![audio_dir.join("x101_2024-03-15.14-30.2.wav")]
        );
    }

    #[test]
    fn test_stop_drains_queued_work() {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = source_layout(dir.path());
        let config = test_config(dir.path());

        let mut audio_paths = Vec::new();
        for i in 0..5 {
            let path = audio_dir.join(format!("x101_2024-03-15.14-30.{i}.wav"));
            fs::write(&path, b"RIFF").unwrap();
            audio_paths.push(path);
        }

        let handle = Pipeline::new(
            config.clone(),
            Arc::new(MockEngine::new("mock").with_text("hello this transcript is long enough")),
            Arc::new(MockAnalyzer::new("m")),
        )
        .start()
        .unwrap();

        for path in &audio_paths {
            handle.submit_audio(path).unwrap();
        }
        handle.stop();

        for path in &audio_paths {
            let stem = path.file_stem().unwrap().to_str().unwrap();
            assert!(
                config
                    .paths
                    .json_output_dir
                    .join(format!("{stem}.json"))
                    .exists(),
                "{stem} was not analyzed before shutdown"
            );
        }
    }
}
