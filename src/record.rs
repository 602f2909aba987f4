//! The structured call record written after analysis.

use crate::engine::CallAnalysis;
use crate::transcript::{NormalizationInfo, TranscriptSegment};
use crate::error::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Recorder filename convention: `x<ext>_<YYYY-MM-DD>.<HH>-<MM>.<seq>`.
static STEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^x(\d+)_(\d{4}-\d{2}-\d{2})\.(\d{2})-(\d{2})\.(\d+)$").expect("valid regex")
});

/// Call metadata recovered from the audio filename and WAV header.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct CallDetails {
    pub audio_file: String,
    /// Phone extension that recorded the call, from the filename.
    pub agent_extension: Option<String>,
    pub call_date: Option<String>,
    /// 12-hour clock, e.g. `2:30 PM`.
    pub call_time: Option<String>,
    /// Recording sequence number within the minute.
    pub sequence: Option<u32>,
    /// `mm:ss`, read from the WAV header.
    pub call_duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingDetails {
    pub transcript_file: String,
    pub analyzed_at: DateTime<Utc>,
    pub engine: String,
    pub model_used: String,
}

/// Everything known about one processed call, written as `<stem>.json`.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub call_details: CallDetails,
    pub analysis: CallAnalysis,
    pub processing_details: ProcessingDetails,
    pub transcript: Vec<TranscriptSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalization_info: Option<NormalizationInfo>,
}

fn format_call_time(hour: u32, minute: u32) -> String {
    let period = if hour < 12 { "AM" } else { "PM" };
    let hour_12 = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{hour_12}:{minute:02} {period}")
}

fn format_mm_ss(total_seconds: f64) -> String {
    let total = total_seconds.round() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Read the audio duration from the WAV header, `None` on any failure.
fn wav_duration_secs(path: &Path) -> Option<f64> {
    let reader = hound::WavReader::open(path).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(reader.duration() as f64 / spec.sample_rate as f64)
}

/// Derive call details from the audio path. Filenames outside the recorder
/// convention still get a record, just with the metadata fields empty.
pub fn call_details(audio_path: &Path) -> CallDetails {
    let stem = audio_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let mut details = CallDetails {
        audio_file: audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string(),
        ..CallDetails::default()
    };

    if let Some(caps) = STEM_RE.captures(stem) {
        details.agent_extension = caps.get(1).map(|m| format!("x{}", m.as_str()));
        details.call_date = caps.get(2).map(|m| m.as_str().to_string());
        let hour = caps.get(3).and_then(|m| m.as_str().parse::<u32>().ok());
        let minute = caps.get(4).and_then(|m| m.as_str().parse::<u32>().ok());
        if let (Some(hour), Some(minute)) = (hour, minute)
            && hour < 24
            && minute < 60
        {
            details.call_time = Some(format_call_time(hour, minute));
        }
        details.sequence = caps.get(5).and_then(|m| m.as_str().parse().ok());
    } else {
        tracing::debug!(stem, "filename outside recorder convention");
    }

    details.call_duration = wav_duration_secs(audio_path).map(format_mm_ss);
    details
}

/// Write the record as `<stem>.json` under `output_dir`.
pub fn write_json(record: &CallRecord, output_dir: &Path, stem: &str) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{stem}.json"));
    fs::write(&path, serde_json::to_string_pretty(record)?)?;
    tracing::info!(path = %path.display(), "call record written");
    Ok(path)
}

/// Render the human-readable summary of a record.
pub fn markdown_summary(record: &CallRecord, full_transcript: &str) -> String {
    let analysis = &record.analysis;
    let mut md = vec![
        format!(
            "---\nTranscript File: {}",
            record.processing_details.transcript_file
        ),
        format!(
            "Analysis Date: {}\n---",
            record
                .processing_details
                .analyzed_at
                .format("%Y-%m-%d %H:%M:%S")
        ),
        "\n**A. Overall Call Summary:**".to_string(),
        if analysis.summary.is_empty() {
            "No summary provided.".to_string()
        } else {
            analysis.summary.clone()
        },
        "\n**B. Sentiments:**".to_string(),
        format!(
            "1.  Overall Sentiment: **{}**",
            if analysis.sentiment.overall.is_empty() {
                "N/A"
            } else {
                &analysis.sentiment.overall
            }
        ),
        "2.  Key Sentiment Drivers:".to_string(),
    ];

    if analysis.sentiment.drivers.is_empty() {
        md.push("    *   N/A".to_string());
    }
    for driver in &analysis.sentiment.drivers {
        md.push(format!("    *   {driver}"));
    }

    md.push("\n**C. Main Topics/Themes:**".to_string());
    if analysis.topics.is_empty() {
        md.push("*   No topics identified.".to_string());
    }
    for (i, topic) in analysis.topics.iter().enumerate() {
        md.push(format!("*   Topic {}: {topic}", i + 1));
    }

    md.push("\n**D. Named Entity Detection:**".to_string());
    if analysis.entities.is_empty() {
        md.push("*   No entities identified.".to_string());
    }
    for (category, items) in &analysis.entities {
        for item in items {
            md.push(format!("*   {}: {item}", category.to_uppercase()));
        }
    }

    md.push("\n**E. Action Items (If Any):**".to_string());
    if analysis.action_items.is_empty() {
        md.push("*   No specific action items identified.".to_string());
    }
    for item in &analysis.action_items {
        md.push(format!("*   {item}"));
    }

    md.push("\n\n## Full Transcript\n".to_string());
    md.push(full_transcript.to_string());
    md.join("\n")
}

/// Write the markdown summary as `<stem>.md` under `output_dir`.
pub fn write_markdown(
    record: &CallRecord,
    full_transcript: &str,
    output_dir: &Path,
    stem: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{stem}.md"));
    fs::write(&path, markdown_summary(record, full_transcript))?;
    tracing::info!(path = %path.display(), "markdown summary written");
    Ok(path)
}
