//! Assembly and persistence of the `.review.json` artifact.

use crate::config::ReviewConfig;
use crate::error::Result;
use crate::review::align::{align, tokenize};
use crate::review::flags::{Flagger, WordFlag};
use crate::engine::WordTiming;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One reviewed word in transcript order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewWord {
    pub word: String,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub confidence: Option<f64>,
    pub speaker: Option<String>,
    pub index: usize,
    pub flags: Vec<WordFlag>,
    pub context_before: String,
    pub context_after: String,
    /// The engine's version of the word when it differs from the transcript.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_alternative: Option<String>,
    pub alignment_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewStatistics {
    pub total_words: usize,
    pub flagged_words: usize,
    /// Share of flagged words, one decimal place.
    pub flag_percentage: f64,
    pub priority_counts: BTreeMap<String, usize>,
}

/// Full review payload written as `<stem>.review.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewArtifact {
    pub generated_at: DateTime<Utc>,
    pub audio_file: String,
    pub transcript_file: String,
    pub config: ReviewConfig,
    pub statistics: ReviewStatistics,
    pub flags_summary: BTreeMap<String, usize>,
    pub words: Vec<ReviewWord>,
    /// Filled in later by the manual review tooling.
    pub corrections: Vec<Value>,
    pub audit: Vec<Value>,
}

/// Build the review payload for one transcript.
///
/// Returns `None` when review is disabled or the transcript has no tokens.
/// Without external word timings the words still get pattern flags, just no
/// confidence or mismatch flags.
pub fn build_review(
    audio_file: &str,
    transcript_file: &str,
    transcript_text: &str,
    external: &[WordTiming],
    config: &ReviewConfig,
    expected_terms: Vec<String>,
) -> Option<ReviewArtifact> {
    if !config.enabled {
        tracing::debug!("review generation disabled");
        return None;
    }

    let tokens = tokenize(transcript_text);
    if tokens.is_empty() {
        tracing::info!(transcript_file, "review skipped, no tokens parsed");
        return None;
    }

    let flagger = Flagger::new(config, expected_terms);
    let aligned = align(
        &tokens,
        external,
        config.alignment_match_threshold,
        config.alignment_search_window,
    );

    let mut words = Vec::with_capacity(aligned.len());
    let mut flags_summary: BTreeMap<String, usize> = BTreeMap::new();
    let mut priority_counts: BTreeMap<String, usize> = BTreeMap::new();
    for priority in ["high", "medium", "low"] {
        priority_counts.insert(priority.to_string(), 0);
    }

    for (index, item) in aligned.iter().enumerate() {
        let flags = flagger.flag_word(
            &item.token,
            index,
            &tokens,
            item.matched.as_ref(),
            item.score,
        );
        for flag in &flags {
            *flags_summary.entry(flag.kind.clone()).or_insert(0) += 1;
            *priority_counts
                .entry(flag.priority.as_str().to_string())
                .or_insert(0) += 1;
        }

        let context_before =
            tokens[index.saturating_sub(config.context_words)..index].join(" ");
        let context_after =
            tokens[index + 1..(index + 1 + config.context_words).min(tokens.len())].join(" ");

        let engine_alternative = item
            .matched
            .as_ref()
            .map(|w| w.word.trim().to_string())
            .filter(|w| *w != item.token);

        words.push(ReviewWord {
            word: item.token.clone(),
            start: item.matched.as_ref().and_then(|w| w.start),
            end: item.matched.as_ref().and_then(|w| w.end),
            confidence: item.matched.as_ref().and_then(|w| w.confidence),
            speaker: item.matched.as_ref().and_then(|w| w.speaker.clone()),
            index,
            flags,
            context_before,
            context_after,
            engine_alternative,
            alignment_score: item.score,
        });
    }

    let total_words = words.len();
    let flagged_words = words.iter().filter(|w| !w.flags.is_empty()).count();
    let flag_percentage = if total_words > 0 {
        (flagged_words as f64 / total_words as f64 * 1000.0).round() / 10.0
    } else {
        0.0
    };

    Some(ReviewArtifact {
        generated_at: Utc::now(),
        audio_file: audio_file.to_string(),
        transcript_file: transcript_file.to_string(),
        config: config.clone(),
        statistics: ReviewStatistics {
            total_words,
            flagged_words,
            flag_percentage,
            priority_counts,
        },
        flags_summary,
        words,
        corrections: Vec::new(),
        audit: Vec::new(),
    })
}

/// Write the artifact as `<stem>.review.json` under `output_dir`.
pub fn write_review(artifact: &ReviewArtifact, output_dir: &Path, stem: &str) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{stem}.review.json"));
    fs::write(&path, serde_json::to_string_pretty(artifact)?)?;
    tracing::info!(
        path = %path.display(),
        words = artifact.statistics.total_words,
        flagged = artifact.statistics.flagged_words,
        "review artifact written"
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReviewConfig {
        ReviewConfig::default()
    }

    #[test]
    fn test_build_review_disabled_returns_none() {
        let mut cfg = config();
        cfg.enabled = false;
        assert!(build_review("a.wav", "a.txt", "hello", &[], &cfg, Vec::new()).is_none());
    }

    #[test]
    fn test_build_review_empty_transcript_returns_none() {
        assert!(build_review("a.wav", "a.txt", "   ", &[], &config(), Vec::new()).is_none());
    }

    #[test]
    fn test_statistics_are_consistent() {
        let text = "[00:00:01] **Agent:** My case number is 1234567 thanks";
        let artifact =
            build_review("a.wav", "a.txt", text, &[], &config(), Vec::new()).unwrap();

        let stats = &artifact.statistics;
        assert!(stats.flagged_words <= stats.total_words);
        assert_eq!(stats.total_words, artifact.words.len());

        let histogram_total: usize = artifact.flags_summary.values().sum();
        let flag_total: usize = artifact.words.iter().map(|w| w.flags.len()).sum();
        assert_eq!(histogram_total, flag_total);

        let priority_total: usize = stats.priority_counts.values().sum();
        assert_eq!(priority_total, flag_total);
    }

    #[test]
    fn test_pattern_flags_apply_without_word_timings() {
        let text = "the case number is 1234567";
        let artifact =
            build_review("a.wav", "a.txt", text, &[], &config(), Vec::new()).unwrap();
        let case_word = artifact.words.iter().find(|w| w.word == "1234567").unwrap();
        assert!(case_word.flags.iter().any(|f| f.kind == "case_number"));
        // No timings means no confidence flags anywhere.
        assert!(
            artifact
                .words
                .iter()
                .all(|w| w.flags.iter().all(|f| !f.kind.ends_with("confidence")))
        );
    }

    #[test]
    fn test_confidence_flags_with_word_timings() {
        let text = "hello subrogation";
        let external = vec![
            WordTiming::new("hello").with_confidence(0.95),
            WordTiming::new("subrogation").with_confidence(0.30),
        ];
        let artifact =
            build_review("a.wav", "a.txt", text, &external, &config(), Vec::new()).unwrap();
        assert_eq!(artifact.words.len(), 2);
        assert!(artifact.words[0].flags.is_empty());
        assert!(
            artifact.words[1]
                .flags
                .iter()
                .any(|f| f.kind == "critical_confidence")
        );
        assert_eq!(artifact.words[1].confidence, Some(0.30));
    }

    #[test]
    fn test_context_windows() {
        let text = "one two three four five six seven";
        let artifact =
            build_review("a.wav", "a.txt", text, &[], &config(), Vec::new()).unwrap();
        let fourth = &artifact.words[3];
        assert_eq!(fourth.context_before, "one two three");
        assert_eq!(fourth.context_after, "five six seven");
    }

    #[test]
    fn test_write_review_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let artifact =
            build_review("a.wav", "a.txt", "hello there", &[], &config(), Vec::new()).unwrap();
        let path = write_review(&artifact, dir.path(), "a").unwrap();
        assert_eq!(path.file_name().unwrap(), "a.review.json");

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["statistics"]["total_words"], 2);
        assert!(written["corrections"].as_array().unwrap().is_empty());
    }
}
