//! Adapters that run a configured external program as the collaborator.
//!
//! Each adapter is the single place where an external service's output
//! schema is mapped onto the pipeline's contracts; nothing downstream sees
//! vendor shapes.

use crate::engine::{CallAnalysis, CallAnalyzer, TranscriptionEngine, TranscriptionResult};
use crate::error::{CallscribeError, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Transcription engine backed by an external command.
///
/// The command is invoked with the audio path appended as the final argument
/// and must print a `TranscriptionResult` JSON object on stdout:
/// `{"text": "...", "confidence": 0.9, "words": [{"word": "...", ...}]}`.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    /// Build from a command line split into program + arguments.
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().ok_or_else(|| {
            CallscribeError::ConfigInvalidValue {
                key: "engines.transcribe_command".to_string(),
                message: "command is empty".to_string(),
            }
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl TranscriptionEngine for CommandEngine {
    fn transcribe(&self, path: &Path) -> Result<TranscriptionResult> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CallscribeError::EngineCommand {
                command: self.program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CallscribeError::Transcription {
                path: path.to_path_buf(),
                message: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| CallscribeError::Transcription {
            path: path.to_path_buf(),
            message: format!("invalid engine output: {e}"),
        })
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Analyzer backed by an external command.
///
/// The transcript is written to the command's stdin; the command must print
/// a `CallAnalysis` JSON object on stdout. A leading/trailing markdown code
/// fence is tolerated, since generative models like to add one.
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
}

impl CommandAnalyzer {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().ok_or_else(|| {
            CallscribeError::ConfigInvalidValue {
                key: "engines.analyze_command".to_string(),
                message: "command is empty".to_string(),
            }
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

/// Strip a ```json ... ``` fence if the whole payload is wrapped in one.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

impl CallAnalyzer for CommandAnalyzer {
    fn analyze(&self, transcript: &str) -> Result<CallAnalysis> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CallscribeError::EngineCommand {
                command: self.program.clone(),
                message: e.to_string(),
            })?;

        if let Some(stdin) = child.stdin.take() {
            let mut stdin = stdin;
            stdin.write_all(transcript.as_bytes())?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| CallscribeError::EngineCommand {
                command: self.program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CallscribeError::EngineCommand {
                command: self.program.clone(),
                message: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(strip_code_fence(&stdout)).map_err(|e| {
            CallscribeError::AnalysisResponse {
                message: e.to_string(),
            }
        })
    }

    fn model_name(&self) -> &str {
        &self.program
    }
}
