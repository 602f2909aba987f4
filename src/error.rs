//! Error types for callscribe.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallscribeError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Transcription errors
    #[error("Transcription failed for {path}: {message}")]
    Transcription { path: PathBuf, message: String },

    // Analysis errors
    #[error("Analysis failed for {path}: {message}")]
    Analysis { path: PathBuf, message: String },

    #[error("Analysis response was not valid JSON: {message}")]
    AnalysisResponse { message: String },

    // Engine adapter errors
    #[error("Engine command '{command}' failed: {message}")]
    EngineCommand { command: String, message: String },

    // Queue errors
    #[error("Queue '{queue}' is full")]
    QueueFull { queue: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, CallscribeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = CallscribeError::ConfigFileNotFound {
            path: "/etc/callscribe.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /etc/callscribe.toml"
        );
    }

    #[test]
    fn test_transcription_display() {
        let error = CallscribeError::Transcription {
            path: PathBuf::from("call.wav"),
            message: "engine timed out".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Transcription failed for call.wav: engine timed out"
        );
    }

    #[test]
    fn test_queue_full_display() {
        let error = CallscribeError::QueueFull {
            queue: "analysis".to_string(),
        };
        assert_eq!(error.to_string(), "Queue 'analysis' is full");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: CallscribeError = io_error.into();
        assert!(matches!(error, CallscribeError::Io(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: CallscribeError = json_error.into();
        assert!(matches!(error, CallscribeError::Json(_)));
    }
}
