//! External collaborator contracts for transcription and analysis.
//!
//! The pipeline only depends on the capability shapes here; which concrete
//! service fulfils them is a deployment concern. Vendor-specific response
//! mapping lives entirely inside the adapter implementing the trait.

pub mod command;

use crate::error::{CallscribeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// One word of engine output with timing and confidence, when the engine
/// provides them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub speaker: Option<String>,
}

impl WordTiming {
    pub fn new(word: &str) -> Self {
        Self {
            word: word.to_string(),
            start: None,
            end: None,
            confidence: None,
            speaker: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_times(mut self, start: f64, end: f64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }
}

/// Result of transcribing one audio file.
///
/// Word timings are optional: without them the review generator skips
/// alignment and confidence flags but still runs pattern flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TranscriptionResult {
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub words: Vec<WordTiming>,
}

/// Sentiment block of a call analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Sentiment {
    #[serde(default)]
    pub overall: String,
    #[serde(default)]
    pub drivers: Vec<String>,
}

/// Structured analysis of one transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CallAnalysis {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub entities: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub action_items: Vec<String>,
}

/// Trait for speech-to-text transcription of a recorded call.
///
/// This trait allows swapping implementations (external service vs mock).
pub trait TranscriptionEngine: Send + Sync {
    /// Transcribe the audio file at `path`.
    fn transcribe(&self, path: &Path) -> Result<TranscriptionResult>;

    /// Name of the engine for logs and record metadata.
    fn name(&self) -> &str;
}

/// Trait for structured analysis of a finished transcript.
pub trait CallAnalyzer: Send + Sync {
    /// Analyze the transcript text.
    fn analyze(&self, transcript: &str) -> Result<CallAnalysis>;

    /// Name of the model or service for record metadata.
    fn model_name(&self) -> &str;
}

/// Implement the traits for Arc<T> so engines can be shared across workers.
impl<T: TranscriptionEngine + ?Sized> TranscriptionEngine for Arc<T> {
    fn transcribe(&self, path: &Path) -> Result<TranscriptionResult> {
        (**self).transcribe(path)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: CallAnalyzer + ?Sized> CallAnalyzer for Arc<T> {
    fn analyze(&self, transcript: &str) -> Result<CallAnalysis> {
        (**self).analyze(transcript)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Mock transcription engine for testing.
#[derive(Debug)]
pub struct MockEngine {
    name: String,
    result: TranscriptionResult,
    fail_times: AtomicU32,
    calls: AtomicU32,
}

impl MockEngine {
    /// Create a new mock engine returning empty text.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            result: TranscriptionResult {
                text: "mock transcription".to_string(),
                confidence: None,
                words: Vec::new(),
            },
            fail_times: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Configure the mock to return specific text.
    pub fn with_text(mut self, text: &str) -> Self {
        self.result.text = text.to_string();
        self
    }

    /// Configure the mock to return word timings.
    pub fn with_words(mut self, words: Vec<WordTiming>) -> Self {
        self.result.words = words;
        self
    }

    /// Configure the mock to fail the first `n` calls.
    pub fn failing_times(self, n: u32) -> Self {
        self.fail_times.store(n, Ordering::SeqCst);
        self
    }

    /// Configure the mock to fail every call.
    pub fn always_failing(self) -> Self {
        self.failing_times(u32::MAX)
    }

    /// Number of transcribe calls made so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TranscriptionEngine for MockEngine {
    fn transcribe(&self, path: &Path) -> Result<TranscriptionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_times.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.fail_times.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(CallscribeError::Transcription {
                path: path.to_path_buf(),
                message: "mock transcription failure".to_string(),
            });
        }
        Ok(self.result.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Mock analyzer for testing.
#[derive(Debug)]
pub struct MockAnalyzer {
    model: String,
    analysis: CallAnalysis,
    fail_times: AtomicU32,
    calls: AtomicU32,
}

impl MockAnalyzer {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            analysis: CallAnalysis {
                summary: "mock summary".to_string(),
                ..CallAnalysis::default()
            },
            fail_times: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_analysis(mut self, analysis: CallAnalysis) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn failing_times(self, n: u32) -> Self {
        self.fail_times.store(n, Ordering::SeqCst);
        self
    }

    pub fn always_failing(self) -> Self {
        self.failing_times(u32::MAX)
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CallAnalyzer for MockAnalyzer {
    fn analyze(&self, _transcript: &str) -> Result<CallAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_times.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.fail_times.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(CallscribeError::Analysis {
                path: Path::new("").to_path_buf(),
                message: "mock analysis failure".to_string(),
            });
        }
        Ok(self.analysis.clone())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
