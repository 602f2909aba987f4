//! Stage handlers: the work done per item, separated from the worker loops.
//!
//! Handlers return an explicit outcome instead of raising through the stack,
//! so the scheduler can decide retry eligibility without inspecting error
//! types.

use crate::config::{Config, OutputFormat};
use crate::engine::{CallAnalyzer, TranscriptionEngine, WordTiming};
use crate::error::Result;
use crate::record::{self, CallRecord, ProcessingDetails};
use crate::review;
use crate::transcript::TranscriptParser;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Successful handler result.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Done; optionally hands a follow-up path to the next stage.
    Completed { next: Option<PathBuf> },
    /// Deliberately not processed; never retried.
    Skipped { reason: String },
}

/// Failed handler result. Only retryable failures reach the dead-letter
/// queue.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub message: String,
    pub retryable: bool,
}

impl StageFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

pub type StageResult = std::result::Result<StageOutcome, StageFailure>;

/// Paths already analyzed, guarded for concurrent check-then-insert and
/// persisted across runs as `processed_files.json`.
pub struct ProcessedSet {
    paths: Mutex<HashSet<PathBuf>>,
    state_path: PathBuf,
}

#[derive(Serialize, serde::Deserialize)]
struct ProcessedState {
    processed_files: Vec<PathBuf>,
    last_updated: chrono::DateTime<Utc>,
}

impl ProcessedSet {
    /// Load the persisted set, or start empty when the file is missing or
    /// unreadable.
    pub fn load(state_dir: &Path) -> Self {
        let state_path = state_dir.join("processed_files.json");
        let paths = fs::read_to_string(&state_path)
            .ok()
            .and_then(|text| serde_json::from_str::<ProcessedState>(&text).ok())
            .map(|state| state.processed_files.into_iter().collect())
            .unwrap_or_default();
        Self {
            paths: Mutex::new(paths),
            state_path,
        }
    }

    /// Atomically claim a path. Returns false when it was already claimed.
    pub fn insert_if_absent(&self, path: &Path) -> bool {
        self.paths
            .lock()
            .map(|mut paths| paths.insert(path.to_path_buf()))
            .unwrap_or(false)
    }

    /// Release a claim so a failed item can be retried.
    pub fn remove(&self, path: &Path) {
        if let Ok(mut paths) = self.paths.lock() {
            paths.remove(path);
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths
            .lock()
            .map(|paths| paths.contains(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.paths.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn persist(&self) -> Result<()> {
        let paths = match self.paths.lock() {
            Ok(paths) => {
                let mut sorted: Vec<PathBuf> = paths.iter().cloned().collect();
                sorted.sort();
                sorted
            }
            Err(_) => return Ok(()),
        };
        if let Some(parent) = self.state_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let state = ProcessedState {
            processed_files: paths,
            last_updated: Utc::now(),
        };
        fs::write(&self.state_path, serde_json::to_string_pretty(&state)?)?;
        Ok(())
    }
}

/// `<source>/Audio/<stem>.wav` lives next to `<source>/Transcripts/`.
pub fn transcripts_dir_for(audio_path: &Path) -> PathBuf {
    audio_path
        .parent()
        .and_then(|audio_dir| audio_dir.parent())
        .map(|source| source.join("Transcripts"))
        .unwrap_or_else(|| PathBuf::from("Transcripts"))
}

/// Locate the audio file a transcript was produced from.
pub fn audio_path_for(transcript_path: &Path, allowed_extensions: &[String]) -> Option<PathBuf> {
    // Recorder stems contain dots (x101_2024-03-15.14-30.1), so the
    // extension is appended; `with_extension` would eat the sequence number.
    let stem = transcript_path.file_stem()?.to_str()?;
    let audio_dir = transcript_path.parent()?.parent()?.join("Audio");
    for ext in allowed_extensions {
        let candidate = audio_dir.join(format!("{stem}.{ext}"));
        if candidate.exists() {
            return Some(candidate);
        }
    }
    // Best guess for metadata purposes even when the file is gone.
    Some(audio_dir.join(format!("{stem}.wav")))
}

/// Word-timing sidecar written next to the transcript.
#[derive(Serialize)]
struct WordsSidecar<'a> {
    transcript: &'a str,
    overall_confidence: Option<f64>,
    words: &'a [WordTiming],
    engine: &'a str,
}

/// Transcribes one audio file, writes the transcript and its sidecars, and
/// hands the transcript path to the analysis stage.
pub struct TranscriptionHandler {
    engine: Arc<dyn TranscriptionEngine>,
    config: Arc<Config>,
    expected_terms: Vec<String>,
}

impl TranscriptionHandler {
    pub fn new(engine: Arc<dyn TranscriptionEngine>, config: Arc<Config>) -> Self {
        let expected_terms = config.review.load_expected_terms();
        Self {
            engine,
            config,
            expected_terms,
        }
    }

    pub fn handle(&self, audio_path: &Path) -> StageResult {
        let result = self
            .engine
            .transcribe(audio_path)
            .map_err(|e| StageFailure::retryable(e.to_string()))?;

        if result.text.trim().is_empty() {
            tracing::info!(path = %audio_path.display(), "empty transcript, skipping");
            return Ok(StageOutcome::Skipped {
                reason: "empty transcript".to_string(),
            });
        }

        let stem = audio_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StageFailure::permanent("audio path has no usable file stem"))?;

        let transcripts_dir = transcripts_dir_for(audio_path);
        fs::create_dir_all(&transcripts_dir)
            .map_err(|e| StageFailure::retryable(format!("cannot create transcript dir: {e}")))?;

        let transcript_path = transcripts_dir.join(format!("{stem}.txt"));
        fs::write(&transcript_path, &result.text)
            .map_err(|e| StageFailure::retryable(format!("cannot write transcript: {e}")))?;
        tracing::info!(path = %transcript_path.display(), "transcript written");

        if !result.words.is_empty() {
            let sidecar = WordsSidecar {
                transcript: &result.text,
                overall_confidence: result.confidence,
                words: &result.words,
                engine: self.engine.name(),
            };
            if let Err(e) = self.write_sidecar(&transcripts_dir, stem, &sidecar) {
                tracing::warn!(error = %e, "failed to write word-timing sidecar");
            }
        }

        self.generate_review(audio_path, &transcript_path, &result.text, &result.words);

        Ok(StageOutcome::Completed {
            next: Some(transcript_path),
        })
    }

    fn write_sidecar(&self, dir: &Path, stem: &str, sidecar: &WordsSidecar<'_>) -> Result<()> {
        let path = dir.join(format!("{stem}.words.json"));
        fs::write(&path, serde_json::to_string_pretty(sidecar)?)?;
        Ok(())
    }

    /// Review generation is best-effort: a failure here never fails the
    /// stage, the transcript itself is already safe on disk.
    fn generate_review(
        &self,
        audio_path: &Path,
        transcript_path: &Path,
        text: &str,
        words: &[WordTiming],
    ) {
        let audio_file = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let transcript_file = transcript_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let Some(artifact) = review::build_review(
            audio_file,
            transcript_file,
            text,
            words,
            &self.config.review,
            self.expected_terms.clone(),
        ) else {
            return;
        };

        let output_dir = self
            .config
            .paths
            .review_output_dir
            .clone()
            .unwrap_or_else(|| transcript_path.parent().unwrap_or(Path::new(".")).to_path_buf());
        let stem = transcript_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if let Err(e) = review::write_review(&artifact, &output_dir, stem) {
            tracing::warn!(error = %e, "failed to write review artifact");
        }
    }
}

/// Analyzes one transcript and writes the structured call record.
pub struct AnalysisHandler {
    analyzer: Arc<dyn CallAnalyzer>,
    config: Arc<Config>,
    processed: Arc<ProcessedSet>,
    parser: TranscriptParser,
    engine_name: String,
}

impl AnalysisHandler {
    pub fn new(
        analyzer: Arc<dyn CallAnalyzer>,
        config: Arc<Config>,
        processed: Arc<ProcessedSet>,
        engine_name: &str,
    ) -> Self {
        Self {
            analyzer,
            config,
            processed,
            parser: TranscriptParser::new(),
            engine_name: engine_name.to_string(),
        }
    }

    pub fn handle(&self, transcript_path: &Path) -> StageResult {
        if !self.processed.insert_if_absent(transcript_path) {
            return Ok(StageOutcome::Skipped {
                reason: "already processed".to_string(),
            });
        }

        match self.analyze(transcript_path) {
            Ok(outcome) => {
                if let Err(e) = self.processed.persist() {
                    tracing::warn!(error = %e, "failed to persist processed set");
                }
                Ok(outcome)
            }
            Err(failure) => {
                // Release the claim so a retry can run.
                self.processed.remove(transcript_path);
                Err(failure)
            }
        }
    }

    fn analyze(&self, transcript_path: &Path) -> StageResult {
        let text = fs::read_to_string(transcript_path)
            .map_err(|e| StageFailure::retryable(format!("cannot read transcript: {e}")))?;

        if text.trim().len() < self.config.analysis.min_transcript_size {
            tracing::info!(
                path = %transcript_path.display(),
                size = text.trim().len(),
                "transcript below minimum size, skipping"
            );
            return Ok(StageOutcome::Skipped {
                reason: "transcript below minimum size".to_string(),
            });
        }

        let analysis = self
            .analyzer
            .analyze(&text)
            .map_err(|e| StageFailure::retryable(e.to_string()))?;

        let stem = transcript_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StageFailure::permanent("transcript path has no usable file stem"))?;

        let audio_path = audio_path_for(transcript_path, &self.config.monitor.allowed_extensions)
            .unwrap_or_else(|| PathBuf::from(format!("{stem}.wav")));

        let (segments, normalization_info) = if self.config.analysis.enable_normalization {
            let (segments, info) = crate::transcript::normalize_raw(&text);
            (self.parser.normalize_segments(&segments), Some(info))
        } else {
            (self.parser.parse(&text), None)
        };

        let record = CallRecord {
            call_details: record::call_details(&audio_path),
            analysis,
            processing_details: ProcessingDetails {
                transcript_file: transcript_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string(),
                analyzed_at: Utc::now(),
                engine: self.engine_name.clone(),
                model_used: self.analyzer.model_name().to_string(),
            },
            transcript: segments,
            normalization_info,
        };

        let output_dir = &self.config.paths.json_output_dir;
        let format = self.config.analysis.output_format;
        if matches!(format, OutputFormat::Json | OutputFormat::Both) {
            record::write_json(&record, output_dir, stem)
                .map_err(|e| StageFailure::retryable(format!("cannot write call record: {e}")))?;
        }
        if matches!(format, OutputFormat::Markdown | OutputFormat::Both)
            && let Err(e) = record::write_markdown(&record, &text, output_dir, stem)
        {
            tracing::warn!(error = %e, "failed to write markdown summary");
        }

        Ok(StageOutcome::Completed { next: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockAnalyzer, MockEngine, TranscriptionResult};

    fn test_config(base: &Path) -> Arc<Config> {
        let mut config = Config::default();
        config.paths.base_dir = base.to_path_buf();
        config.paths.json_output_dir = base.join("json");
        config.paths.state_dir = base.join("state");
        config.analysis.min_transcript_size = 10;
        Arc::new(config)
    }

    fn source_layout(base: &Path) -> (PathBuf, PathBuf) {
        let audio_dir = base.join("ext101/Audio");
        let transcripts_dir = base.join("ext101/Transcripts");
        fs::create_dir_all(&audio_dir).unwrap();
        fs::create_dir_all(&transcripts_dir).unwrap();
        (audio_dir, transcripts_dir)
    }

    #[test]
    fn test_processed_set_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let set = ProcessedSet::load(dir.path());
        assert!(set.insert_if_absent(Path::new("/t/a.txt")));
        assert!(!set.insert_if_absent(Path::new("/t/a.txt")));
        set.persist().unwrap();

        let reloaded = ProcessedSet::load(dir.path());
        assert!(reloaded.contains(Path::new("/t/a.txt")));
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_processed_set_remove_releases_claim() {
        let dir = tempfile::tempdir().unwrap();
        let set = ProcessedSet::load(dir.path());
        assert!(set.insert_if_absent(Path::new("a.txt")));
        set.remove(Path::new("a.txt"));
        assert!(set.insert_if_absent(Path::new("a.txt")));
    }

    #[test]
    fn test_audio_path_for_keeps_dotted_stem() {
        let dir = tempfile::tempdir().unwrap();
        let (audio_dir, transcripts_dir) = source_layout(dir.path());
        let audio = audio_dir.join("x101_2024-03-15.14-30.1.wav");
        fs::write(&audio, b"RIFF").unwrap();

        let transcript = transcripts_dir.join("x101_2024-03-15.14-30.1.txt");
        let exts = vec!["wav".to_string()];
        assert_eq!(audio_path_for(&transcript, &exts), Some(audio));

        // Fallback guess keeps the sequence number too.
        let gone = transcripts_dir.join("x101_2024-03-15.14-30.2.txt");
        assert_eq!(
            audio_path_for(&gone, &exts),
            Some(audio_dir.join("x101_2024-03-15.14-30.2.wav"))
        );
    }

    #[test]
    fn test_transcription_handler_writes_transcript_and_hands_off() {
        let dir = tempfile::tempdir().unwrap();
        let (audio_dir, transcripts_dir) = source_layout(dir.path());
        let audio = audio_dir.join("x101_2024-03-15.14-30.1.wav");
        fs::write(&audio, b"RIFF").unwrap();

        let engine = Arc::new(MockEngine::new("mock").with_text("Hello there, calling about my case."));
        let handler = TranscriptionHandler::new(engine, test_config(dir.path()));

        let outcome = handler.handle(&audio).unwrap();
        let StageOutcome::Completed { next: Some(next) } = outcome else {
            panic!("expected completion with hand-off");
        };
        assert_eq!(next, transcripts_dir.join("x101_2024-03-15.14-30.1.txt"));
        assert_eq!(
            fs::read_to_string(&next).unwrap(),
            "Hello there, calling about my case."
        );
        // No word timings, so no sidecar.
        assert!(!transcripts_dir.join("x101_2024-03-15.14-30.1.words.json").exists());
    }

    #[test]
    fn test_transcription_handler_writes_sidecar_and_review() {
        let dir = tempfile::tempdir().unwrap();
        let (audio_dir, transcripts_dir) = source_layout(dir.path());
        let audio = audio_dir.join("call.wav");
        fs::write(&audio, b"RIFF").unwrap();

        let words = vec![
            WordTiming::new("hello").with_confidence(0.9),
            WordTiming::new("there").with_confidence(0.3),
        ];
        let engine = Arc::new(
            MockEngine::new("mock")
                .with_text("hello there")
                .with_words(words),
        );
        let handler = TranscriptionHandler::new(engine, test_config(dir.path()));
        handler.handle(&audio).unwrap();

        let sidecar: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(transcripts_dir.join("call.words.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(sidecar["engine"], "mock");
        assert_eq!(sidecar["words"].as_array().unwrap().len(), 2);

        let review: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(transcripts_dir.join("call.review.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(review["statistics"]["total_words"], 2);
    }

    #[test]
    fn test_transcription_handler_empty_transcript_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (audio_dir, _) = source_layout(dir.path());
        let audio = audio_dir.join("silence.wav");
        fs::write(&audio, b"RIFF").unwrap();

        let engine = Arc::new(MockEngine::new("mock").with_text("   "));
        let handler = TranscriptionHandler::new(engine, test_config(dir.path()));
        let outcome = handler.handle(&audio).unwrap();
        assert!(matches!(outcome, StageOutcome::Skipped { .. }));
    }

    #[test]
    fn test_transcription_handler_engine_failure_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let (audio_dir, _) = source_layout(dir.path());
        let audio = audio_dir.join("call.wav");
        fs::write(&audio, b"RIFF").unwrap();

        let engine = Arc::new(MockEngine::new("mock").always_failing());
        let handler = TranscriptionHandler::new(engine, test_config(dir.path()));
        let failure = handler.handle(&audio).unwrap_err();
        assert!(failure.retryable);
    }

    #[test]
    fn test_analysis_handler_writes_record() {
        let dir = tempfile::tempdir().unwrap();
        let (_, transcripts_dir) = source_layout(dir.path());
        let transcript = transcripts_dir.join("x101_2024-03-15.14-30.1.txt");
        fs::write(
            &transcript,
            "[00:00:01] **Agent:** Hello there. [00:00:03] **Caller:** Hi, about my case.",
        )
        .unwrap();

        let config = test_config(dir.path());
        let processed = Arc::new(ProcessedSet::load(&config.paths.state_dir));
        let handler = AnalysisHandler::new(
            Arc::new(MockAnalyzer::new("mock-model")),
            config.clone(),
            processed,
            "mock-engine",
        );

        let outcome = handler.handle(&transcript).unwrap();
        assert_eq!(outcome, StageOutcome::Completed { next: None });

        let record_path = config
            .paths
            .json_output_dir
            .join("x101_2024-03-15.14-30.1.json");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&record_path).unwrap()).unwrap();
        assert_eq!(value["analysis"]["summary"], "mock summary");
        assert_eq!(value["call_details"]["call_date"], "2024-03-15");
        assert_eq!(value["processing_details"]["model_used"], "mock-model");
        assert_eq!(value["transcript"].as_array().unwrap().len(), 2);
        // Default output format is Both.
        assert!(
            config
                .paths
                .json_output_dir
                .join("x101_2024-03-15.14-30.1.md")
                .exists()
        );
    }

    #[test]
    fn test_analysis_handler_at_most_once() {
        let dir = tempfile::tempdir().unwrap();
        let (_, transcripts_dir) = source_layout(dir.path());
        let transcript = transcripts_dir.join("call.txt");
        fs::write(&transcript, "long enough transcript for the size gate").unwrap();

        let config = test_config(dir.path());
        let processed = Arc::new(ProcessedSet::load(&config.paths.state_dir));
        let analyzer = Arc::new(MockAnalyzer::new("m"));
        let handler =
            AnalysisHandler::new(analyzer.clone(), config, processed, "engine");

        assert!(matches!(
            handler.handle(&transcript).unwrap(),
            StageOutcome::Completed { .. }
        ));
        assert!(matches!(
            handler.handle(&transcript).unwrap(),
            StageOutcome::Skipped { .. }
        ));
        assert_eq!(analyzer.call_count(), 1);
    }

    #[test]
    fn test_analysis_handler_failure_releases_claim() {
        let dir = tempfile::tempdir().unwrap();
        let (_, transcripts_dir) = source_layout(dir.path());
        let transcript = transcripts_dir.join("call.txt");
        fs::write(&transcript, "long enough transcript for the size gate").unwrap();

        let config = test_config(dir.path());
        let processed = Arc::new(ProcessedSet::load(&config.paths.state_dir));
        let analyzer = Arc::new(MockAnalyzer::new("m").failing_times(1));
        let handler =
            AnalysisHandler::new(analyzer.clone(), config, processed.clone(), "engine");

        let failure = handler.handle(&transcript).unwrap_err();
        assert!(failure.retryable);
        assert!(!processed.contains(&transcript));

        // Retry succeeds.
        assert!(handler.handle(&transcript).is_ok());
        assert_eq!(analyzer.call_count(), 2);
    }

    #[test]
    fn test_analysis_handler_short_transcript_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (_, transcripts_dir) = source_layout(dir.path());
        let transcript = transcripts_dir.join("tiny.txt");
        fs::write(&transcript, "hi").unwrap();

        let config = test_config(dir.path());
        let processed = Arc::new(ProcessedSet::load(&config.paths.state_dir));
        let analyzer = Arc::new(MockAnalyzer::new("m"));
        let handler = AnalysisHandler::new(analyzer.clone(), config, processed, "engine");

        assert!(matches!(
            handler.handle(&transcript).unwrap(),
            StageOutcome::Skipped { .. }
        ));
        assert_eq!(analyzer.call_count(), 0);
    }
}
