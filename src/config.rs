//! Pipeline configuration loaded from a TOML file.

use crate::defaults;
use crate::error::{CallscribeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub monitor: MonitorConfig,
    pub pipeline: PipelineConfig,
    pub analysis: AnalysisConfig,
    pub review: ReviewConfig,
    pub engines: EnginesConfig,
    pub logging: LoggingConfig,
}

/// Directory layout the pipeline reads from and writes to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Base directory holding one subdirectory per monitored source, each
    /// with `Audio/` and `Transcripts/` inside.
    pub base_dir: PathBuf,
    /// Central directory for structured call record JSON.
    pub json_output_dir: PathBuf,
    /// Directory for pipeline state (processed set, failed-item log).
    pub state_dir: PathBuf,
    /// Where review artifacts go; defaults to the transcript's directory.
    pub review_output_dir: Option<PathBuf>,
}

/// Completion-detector settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub completion_threshold_secs: u64,
    /// Lowercase extensions without the dot, e.g. `["wav"]`.
    pub allowed_extensions: Vec<String>,
    /// Queue audio files lacking a transcript when the pipeline starts.
    pub process_untranscribed_on_start: bool,
    /// Queue transcripts lacking a call record when the pipeline starts.
    pub process_existing_on_start: bool,
}

/// Queue, worker and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub transcription_queue_size: usize,
    pub analysis_queue_size: usize,
    pub dead_letter_queue_size: usize,
    pub transcription_workers: usize,
    pub analysis_workers: usize,
    pub max_retries: u32,
    pub backoff_base_secs: u64,
    pub worker_recv_timeout_ms: u64,
    pub metrics_report_interval_secs: u64,
    pub metrics_max_history: usize,
    pub shutdown_drain_timeout_secs: u64,
}

/// Analysis stage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Transcripts shorter than this (trimmed bytes) are skipped.
    pub min_transcript_size: usize,
    pub output_format: OutputFormat,
    /// Run the segment normalizer over parsed transcripts.
    pub enable_normalization: bool,
}

/// Call record output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Markdown,
    #[default]
    Both,
}

/// Review-generation thresholds and pattern switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReviewConfig {
    pub enabled: bool,
    pub low_confidence_threshold: f64,
    pub critical_confidence_threshold: f64,
    pub common_words_confidence_threshold: f64,
    pub alignment_match_threshold: f64,
    pub alignment_search_window: usize,
    pub close_match_threshold: f64,
    pub context_words: usize,
    pub flag_phone_numbers: bool,
    pub flag_case_numbers: bool,
    pub flag_money_amounts: bool,
    pub flag_dates: bool,
    pub flag_times: bool,
    pub flag_names: bool,
    pub flag_spelled_words: bool,
    pub flag_numbers: bool,
    /// Extra words for the common-word set beyond the built-in list.
    pub extra_common_words: Vec<String>,
    /// Terms expected in this domain; exempt from confidence and name flags.
    pub expected_terms: Vec<String>,
    /// Optional file of expected terms, one per line, `#` comments allowed.
    pub expected_terms_file: Option<PathBuf>,
}

/// External collaborator commands.
///
/// Each command is invoked with the input path (transcription) or fed the
/// transcript on stdin (analysis) and must print the result JSON on stdout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EnginesConfig {
    pub transcribe_command: Vec<String>,
    pub analyze_command: Vec<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub level: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::new(),
            json_output_dir: PathBuf::new(),
            state_dir: PathBuf::new(),
            review_output_dir: None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: defaults::POLL_INTERVAL_SECS,
            completion_threshold_secs: defaults::COMPLETION_THRESHOLD_SECS,
            allowed_extensions: defaults::ALLOWED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            process_untranscribed_on_start: false,
            process_existing_on_start: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transcription_queue_size: defaults::TRANSCRIPTION_QUEUE_SIZE,
            analysis_queue_size: defaults::ANALYSIS_QUEUE_SIZE,
            dead_letter_queue_size: defaults::DEAD_LETTER_QUEUE_SIZE,
            transcription_workers: defaults::WORKERS_PER_STAGE,
            analysis_workers: defaults::WORKERS_PER_STAGE,
            max_retries: defaults::MAX_RETRIES,
            backoff_base_secs: defaults::BACKOFF_BASE_SECS,
            worker_recv_timeout_ms: defaults::WORKER_RECV_TIMEOUT_MS,
            metrics_report_interval_secs: defaults::METRICS_REPORT_INTERVAL_SECS,
            metrics_max_history: defaults::METRICS_MAX_HISTORY,
            shutdown_drain_timeout_secs: defaults::SHUTDOWN_DRAIN_TIMEOUT_SECS,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_transcript_size: defaults::MIN_TRANSCRIPT_SIZE,
            output_format: OutputFormat::Both,
            enable_normalization: true,
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            low_confidence_threshold: defaults::LOW_CONFIDENCE_THRESHOLD,
            critical_confidence_threshold: defaults::CRITICAL_CONFIDENCE_THRESHOLD,
            common_words_confidence_threshold: defaults::COMMON_WORDS_CONFIDENCE_THRESHOLD,
            alignment_match_threshold: defaults::ALIGNMENT_MATCH_THRESHOLD,
            alignment_search_window: defaults::ALIGNMENT_SEARCH_WINDOW,
            close_match_threshold: defaults::CLOSE_MATCH_THRESHOLD,
            context_words: defaults::CONTEXT_WORDS,
            flag_phone_numbers: true,
            flag_case_numbers: true,
            flag_money_amounts: true,
            flag_dates: true,
            flag_times: true,
            flag_names: true,
            flag_spelled_words: true,
            flag_numbers: true,
            extra_common_words: Vec::new(),
            expected_terms: Vec::new(),
            expected_terms_file: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CallscribeError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                CallscribeError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't
    /// exist. Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(CallscribeError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables:
    /// - CALLSCRIBE_BASE_DIR → paths.base_dir
    /// - CALLSCRIBE_JSON_OUTPUT_DIR → paths.json_output_dir
    /// - CALLSCRIBE_LOG_LEVEL → logging.level
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("CALLSCRIBE_BASE_DIR")
            && !dir.is_empty()
        {
            self.paths.base_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("CALLSCRIBE_JSON_OUTPUT_DIR")
            && !dir.is_empty()
        {
            self.paths.json_output_dir = PathBuf::from(dir);
        }

        if let Ok(level) = std::env::var("CALLSCRIBE_LOG_LEVEL")
            && !level.is_empty()
        {
            self.logging.level = level;
        }

        self
    }

    /// Validate the configuration, collecting every problem found.
    ///
    /// A non-empty error list is fatal at startup: a pipeline running with a
    /// broken configuration silently loses work.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.paths.base_dir.as_os_str().is_empty() {
            errors.push("paths.base_dir is empty".to_string());
        }
        if self.paths.json_output_dir.as_os_str().is_empty() {
            errors.push("paths.json_output_dir is empty".to_string());
        }
        if self.paths.state_dir.as_os_str().is_empty() {
            errors.push("paths.state_dir is empty".to_string());
        }

        if self.monitor.allowed_extensions.is_empty() {
            errors.push("monitor.allowed_extensions is empty".to_string());
        }
        for ext in &self.monitor.allowed_extensions {
            if ext.starts_with('.') || ext.is_empty() {
                errors.push(format!(
                    "monitor.allowed_extensions entry '{ext}' must be a bare extension like \"wav\""
                ));
            }
        }
        if self.monitor.poll_interval_secs == 0 || self.monitor.poll_interval_secs > 60 {
            errors.push("monitor.poll_interval_secs must be between 1 and 60".to_string());
        }

        for (key, value) in [
            (
                "pipeline.transcription_workers",
                self.pipeline.transcription_workers,
            ),
            ("pipeline.analysis_workers", self.pipeline.analysis_workers),
        ] {
            if value == 0 || value > 10 {
                errors.push(format!("{key} must be between 1 and 10"));
            }
        }
        for (key, value) in [
            (
                "pipeline.transcription_queue_size",
                self.pipeline.transcription_queue_size,
            ),
            (
                "pipeline.analysis_queue_size",
                self.pipeline.analysis_queue_size,
            ),
            (
                "pipeline.dead_letter_queue_size",
                self.pipeline.dead_letter_queue_size,
            ),
        ] {
            if value == 0 {
                errors.push(format!("{key} must be at least 1"));
            }
        }
        if self.pipeline.worker_recv_timeout_ms == 0 {
            errors.push("pipeline.worker_recv_timeout_ms must be at least 1".to_string());
        }

        for (key, value) in [
            (
                "review.low_confidence_threshold",
                self.review.low_confidence_threshold,
            ),
            (
                "review.critical_confidence_threshold",
                self.review.critical_confidence_threshold,
            ),
            (
                "review.common_words_confidence_threshold",
                self.review.common_words_confidence_threshold,
            ),
            (
                "review.alignment_match_threshold",
                self.review.alignment_match_threshold,
            ),
            (
                "review.close_match_threshold",
                self.review.close_match_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("{key} must be between 0.0 and 1.0"));
            }
        }
        if self.review.alignment_search_window == 0 {
            errors.push("review.alignment_search_window must be at least 1".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/callscribe/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("callscribe")
            .join("config.toml")
    }
}

impl ReviewConfig {
    /// Expected terms from both the inline list and the optional file.
    pub fn load_expected_terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = self
            .expected_terms
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| t.trim().to_string())
            .collect();

        if let Some(path) = &self.expected_terms_file {
            match fs::read_to_string(path) {
                Ok(contents) => {
                    for line in contents.lines() {
                        let line = line.trim();
                        if !line.is_empty() && !line.starts_with('#') {
                            terms.push(line.to_string());
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to load expected terms file");
                }
            }
        }

        terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.paths.base_dir = PathBuf::from("/calls");
        config.paths.json_output_dir = PathBuf::from("/calls/_json");
        config.paths.state_dir = PathBuf::from("/calls/_state");
        config
    }

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.monitor.poll_interval_secs, 3);
        assert_eq!(config.monitor.completion_threshold_secs, 10);
        assert_eq!(config.pipeline.transcription_queue_size, 200);
        assert_eq!(config.pipeline.analysis_queue_size, 50);
        assert_eq!(config.pipeline.transcription_workers, 2);
        assert_eq!(config.pipeline.max_retries, 3);
        assert_eq!(config.review.low_confidence_threshold, 0.60);
        assert_eq!(config.review.critical_confidence_threshold, 0.50);
        assert_eq!(config.review.common_words_confidence_threshold, 0.25);
        assert_eq!(config.review.alignment_search_window, 8);
        assert_eq!(config.analysis.output_format, OutputFormat::Both);
    }

    #[test]
    fn test_load_partial_toml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[paths]
base_dir = "/recordings"

[pipeline]
analysis_workers = 4
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.paths.base_dir, PathBuf::from("/recordings"));
        assert_eq!(config.pipeline.analysis_workers, 4);
        // Untouched fields fall back to defaults
        assert_eq!(config.pipeline.transcription_workers, 2);
        assert!(config.review.enabled);
    }

    #[test]
    fn test_load_invalid_toml_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not [valid toml").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(CallscribeError::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(matches!(
            Config::load(Path::new("/nonexistent/callscribe.toml")),
            Err(CallscribeError::ConfigFileNotFound { .. })
        ));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/callscribe.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_paths() {
        let config = Config::default();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("paths.base_dir")));
        assert!(errors.iter().any(|e| e.contains("paths.json_output_dir")));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = valid_config();
        config.pipeline.transcription_workers = 0;
        let errors = config.validate().unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| e.contains("pipeline.transcription_workers"))
        );
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut config = valid_config();
        config.review.low_confidence_threshold = 1.5;
        let errors = config.validate().unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| e.contains("review.low_confidence_threshold"))
        );
    }

    #[test]
    fn test_validate_rejects_dotted_extension() {
        let mut config = valid_config();
        config.monitor.allowed_extensions = vec![".wav".to_string()];
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("allowed_extensions")));
    }

    #[test]
    fn test_expected_terms_from_file_and_inline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment line\nAcme Corporation\n\nDr. Alvarez").unwrap();

        let mut review = ReviewConfig::default();
        review.expected_terms = vec!["Greenfield Clinic".to_string()];
        review.expected_terms_file = Some(file.path().to_path_buf());

        let terms = review.load_expected_terms();
        assert_eq!(
            terms,
            vec!["Greenfield Clinic", "Acme Corporation", "Dr. Alvarez"]
        );
    }
}
