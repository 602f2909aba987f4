//! Raw transcript parsing.
//!
//! Recordings come back from transcription in a handful of loosely related
//! layouts. Parsing runs an ordered list of strategies over the raw text and
//! takes the first one that yields any segments; the final strategy always
//! succeeds, so `parse` never returns an empty list for non-empty input.

use crate::transcript::segment::{
    NormalizationInfo, TranscriptSegment, normalize_speaker, speaker,
};
use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;

static TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d{2}:\d{2}:\d{2})\]").expect("valid regex"));

static BOLD_SPEAKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d{2}:\d{2}:\d{2})\] \*\*([^:*\n]+):\*\*").expect("valid regex")
});

static PLAIN_SPEAKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([^:\n]+):\s*").expect("valid regex"));

/// One layout the parser knows how to recognize.
trait ParseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Try to split `text` into segments. Empty result means the layout did
    /// not apply and the next strategy should run.
    fn attempt(&self, text: &str) -> Vec<TranscriptSegment>;
}

/// Byte span of each timestamp marker, with the captured `hh:mm:ss`.
fn timestamp_marks(text: &str) -> Vec<(usize, usize, String)> {
    TIMESTAMP_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let ts = caps.get(1)?;
            Some((whole.start(), whole.end(), ts.as_str().to_string()))
        })
        .collect()
}

/// `[hh:mm:ss] **Speaker:** text` chunks.
struct BoldSpeakerChunks;

impl ParseStrategy for BoldSpeakerChunks {
    fn name(&self) -> &'static str {
        "bold_speaker_chunks"
    }

    fn attempt(&self, text: &str) -> Vec<TranscriptSegment> {
        let marks: Vec<_> = BOLD_SPEAKER_RE
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((
                    whole.end(),
                    caps.get(1)?.as_str().to_string(),
                    caps.get(2)?.as_str().to_string(),
                ))
            })
            .collect();

        let ends: Vec<usize> = BOLD_SPEAKER_RE
            .find_iter(text)
            .skip(1)
            .map(|m| m.start())
            .chain(std::iter::once(text.len()))
            .collect();

        marks
            .into_iter()
            .zip(ends)
            .map(|((body_start, ts, raw_speaker), body_end)| {
                TranscriptSegment::new(
                    &ts,
                    &normalize_speaker(&raw_speaker),
                    text[body_start..body_end].trim(),
                )
            })
            .collect()
    }
}

/// `Speaker: [hh:mm:ss] text` chunks.
///
/// The speaker label for each chunk sits at the tail of the previous chunk's
/// text span, so every inter-timestamp span is split into trailing label and
/// remaining dialogue.
struct LeadingSpeakerChunks;

/// Abbreviations whose trailing period is not a sentence boundary.
const TITLE_ABBREVIATIONS: &[&str] = &["dr.", "mr.", "mrs.", "ms."];

/// Split a span like `" Hello. Caller"` into the dialogue tail (`"Hello."`)
/// and the speaker label (`"Caller"`). Without a sentence boundary the whole
/// span is the label.
fn split_trailing_speaker(span: &str) -> (&str, &str) {
    static BOUNDARY_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("valid regex"));

    let mut label_start = 0;
    for m in BOUNDARY_RE.find_iter(span) {
        let word = span[..m.start() + 1]
            .split_whitespace()
            .next_back()
            .unwrap_or("");
        if TITLE_ABBREVIATIONS.contains(&word.to_lowercase().as_str()) {
            continue;
        }
        label_start = m.end();
    }
    (&span[..label_start], &span[label_start..])
}

impl ParseStrategy for LeadingSpeakerChunks {
    fn name(&self) -> &'static str {
        "leading_speaker_chunks"
    }

    fn attempt(&self, text: &str) -> Vec<TranscriptSegment> {
        let marks = timestamp_marks(text);
        if marks.is_empty() {
            return Vec::new();
        }

        // The first timestamp must be preceded by a speaker label, otherwise
        // this is an embedded-speaker or bare-timestamp layout.
        let lead = text[..marks[0].0].trim_end();
        let Some(first_label) = lead.strip_suffix(':') else {
            return Vec::new();
        };
        let (_, first_speaker) = split_trailing_speaker(first_label);
        if first_speaker.trim().is_empty() {
            return Vec::new();
        }

        let mut segments = Vec::with_capacity(marks.len());
        let mut next_speaker = first_speaker.trim().to_string();

        for (i, (_, body_start, ts)) in marks.iter().enumerate() {
            let body_end = marks.get(i + 1).map_or(text.len(), |m| m.0);
            let span = &text[*body_start..body_end];

            let (body, following) = match span.trim_end().strip_suffix(':') {
                Some(stripped) if i + 1 < marks.len() => {
                    let (body, label) = split_trailing_speaker(stripped);
                    (body, Some(label.trim().to_string()))
                }
                _ => (span, None),
            };

            segments.push(TranscriptSegment::new(
                ts,
                &normalize_speaker(&next_speaker),
                body.trim(),
            ));
            next_speaker = following.unwrap_or_else(|| speaker::UNKNOWN.to_string());
        }
        segments
    }
}

/// `[hh:mm:ss] Speaker: text` chunks. Applies only when every chunk carries
/// a speaker label; otherwise the inference strategy handles the text.
struct EmbeddedSpeakerChunks;

impl ParseStrategy for EmbeddedSpeakerChunks {
    fn name(&self) -> &'static str {
        "embedded_speaker_chunks"
    }

    fn attempt(&self, text: &str) -> Vec<TranscriptSegment> {
        let marks = timestamp_marks(text);
        if marks.is_empty() || !text[..marks[0].0].trim().is_empty() {
            return Vec::new();
        }

        let mut segments = Vec::with_capacity(marks.len());
        for (i, (_, body_start, ts)) in marks.iter().enumerate() {
            let body_end = marks.get(i + 1).map_or(text.len(), |m| m.0);
            let span = &text[*body_start..body_end];

            let Some(caps) = PLAIN_SPEAKER_RE.captures(span) else {
                return Vec::new();
            };
            let Some((label, whole)) = caps.get(1).zip(caps.get(0)) else {
                return Vec::new();
            };
            segments.push(TranscriptSegment::new(
                ts,
                &normalize_speaker(label.as_str()),
                span[whole.end()..].trim(),
            ));
        }
        segments
    }
}

/// `[hh:mm:ss] text` chunks with no speaker labels; the speaker is inferred
/// from lexical cues in each chunk.
struct InferredSpeakerChunks;

impl ParseStrategy for InferredSpeakerChunks {
    fn name(&self) -> &'static str {
        "inferred_speaker_chunks"
    }

    fn attempt(&self, text: &str) -> Vec<TranscriptSegment> {
        let marks = timestamp_marks(text);
        if marks.is_empty() {
            return Vec::new();
        }

        marks
            .iter()
            .enumerate()
            .map(|(i, (_, body_start, ts))| {
                let body_end = marks.get(i + 1).map_or(text.len(), |m| m.0);
                let body = text[*body_start..body_end].trim();
                TranscriptSegment::new(ts, infer_speaker(body), body)
            })
            .collect()
    }
}

const SYSTEM_CUES: &[&str] = &[
    "voicemail",
    "forwarded",
    "unavailable",
    "tone",
    "hang up",
    "thank you for calling",
    "office hours",
    "fax number",
];

const AGENT_CUES: &[&str] = &["this is", "how can i help", "how may i help", "agent"];

const CALLER_CUES: &[&str] = &["yes ma'am", "yes sir", "i was", "i had", "i need"];

/// Guess the speaker of an unlabeled chunk from lexical cues.
fn infer_speaker(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    if SYSTEM_CUES.iter().any(|cue| lower.contains(cue)) {
        speaker::SYSTEM
    } else if AGENT_CUES.iter().any(|cue| lower.contains(cue)) {
        speaker::AGENT
    } else if CALLER_CUES.iter().any(|cue| lower.contains(cue)) {
        speaker::CALLER
    } else {
        speaker::UNKNOWN
    }
}

/// Last resort: the whole text as one untimestamped segment.
struct WholeTextFallback;

impl ParseStrategy for WholeTextFallback {
    fn name(&self) -> &'static str {
        "whole_text_fallback"
    }

    fn attempt(&self, text: &str) -> Vec<TranscriptSegment> {
        vec![TranscriptSegment::new("", speaker::UNKNOWN, text.trim())]
    }
}

/// Ordered strategy chain over raw transcript text.
pub struct TranscriptParser {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl Default for TranscriptParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptParser {
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(BoldSpeakerChunks),
                Box::new(LeadingSpeakerChunks),
                Box::new(EmbeddedSpeakerChunks),
                Box::new(InferredSpeakerChunks),
                Box::new(WholeTextFallback),
            ],
        }
    }

    /// Parse raw transcript text into chronological segments.
    pub fn parse(&self, text: &str) -> Vec<TranscriptSegment> {
        for strategy in &self.strategies {
            let segments = strategy.attempt(text);
            if !segments.is_empty() {
                tracing::debug!(
                    strategy = strategy.name(),
                    segments = segments.len(),
                    "parsed transcript"
                );
                return segments;
            }
        }
        // The fallback strategy always yields one segment.
        Vec::new()
    }

    /// Normalize a segment list that may mix structured and unstructured
    /// entries. Structured segments are kept with their speaker re-mapped;
    /// anything else is re-parsed from its text. Running this over its own
    /// output changes nothing.
    pub fn normalize_segments(&self, segments: &[TranscriptSegment]) -> Vec<TranscriptSegment> {
        let mut out = Vec::with_capacity(segments.len());
        for segment in segments {
            let structured = !segment.timestamp.is_empty()
                && !segment.timestamp.starts_with('[')
                && !segment.speaker.is_empty()
                && !segment.text.is_empty();
            if structured {
                out.push(TranscriptSegment::new(
                    &segment.timestamp,
                    &normalize_speaker(&segment.speaker),
                    segment.text.trim(),
                ));
            } else {
                out.extend(self.parse(&segment.text));
            }
        }
        out
    }
}

/// Parse raw transcript text with the default strategy chain.
pub fn parse(text: &str) -> Vec<TranscriptSegment> {
    TranscriptParser::new().parse(text)
}

/// Parse raw text and attach audit metadata about the run.
pub fn normalize_raw(text: &str) -> (Vec<TranscriptSegment>, NormalizationInfo) {
    let segments = parse(text);
    let info = NormalizationInfo {
        normalized_at: Utc::now(),
        original_segments: 1,
        normalized_segments: segments.len(),
        method: "raw_text_parsing".to_string(),
    };
    (segments, info)
}
