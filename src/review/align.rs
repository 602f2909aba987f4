//! Token alignment between transcript text and engine word timings.
//!
//! The transcript is authored text; the word timings come from a separately
//! produced word stream over the same audio. Alignment pairs them up greedily
//! and monotonically: once an external word is consumed, the search never
//! moves backwards.

use crate::engine::WordTiming;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d{2}:\d{2}(?::\d{2})?\]").expect("valid regex"));

static SPEAKER_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*[^:*\n]+:\*\*").expect("valid regex"));

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\w']+").expect("valid regex"));

static NON_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9']").expect("valid regex"));

/// One transcript token with its matched external word, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignedToken {
    pub token: String,
    pub matched: Option<WordTiming>,
    pub score: f64,
}

/// Remove bracketed timestamps and bolded speaker labels so only spoken
/// words remain.
pub fn strip_metadata(text: &str) -> String {
    let text = TIMESTAMP_RE.replace_all(text, "");
    SPEAKER_LABEL_RE.replace_all(&text, "").into_owned()
}

/// Split transcript text into word tokens, metadata removed.
pub fn tokenize(text: &str) -> Vec<String> {
    let clean = strip_metadata(text);
    WORD_RE
        .find_iter(&clean)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Lowercase and drop everything outside `[a-z0-9']`.
pub fn normalize_token(token: &str) -> String {
    NON_TOKEN_RE.replace_all(&token.to_lowercase(), "").into_owned()
}

fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    strsim::normalized_levenshtein(a, b)
}

/// Align transcript tokens against an external word stream.
///
/// For each token the next `search_window` unconsumed external words are
/// scored; the best score at or above `match_threshold` is accepted and the
/// cursor advances past it. A token with no acceptable match gets score 0.0
/// and the cursor stays put, so accepted external indices are strictly
/// increasing.
pub fn align(
    tokens: &[String],
    external: &[WordTiming],
    match_threshold: f64,
    search_window: usize,
) -> Vec<AlignedToken> {
    let window = search_window.max(1);
    let mut aligned = Vec::with_capacity(tokens.len());
    let mut cursor = 0usize;

    for token in tokens {
        let normalized = normalize_token(token);
        let mut best_idx = None;
        let mut best_score = 0.0_f64;

        for idx in cursor..external.len().min(cursor + window) {
            let candidate = normalize_token(&external[idx].word);
            if candidate.is_empty() && !normalized.is_empty() {
                continue;
            }
            let score = if normalized.is_empty() && candidate.is_empty() {
                1.0
            } else {
                similarity(&normalized, &candidate)
            };
            if score > best_score {
                best_score = score;
                best_idx = Some(idx);
                if score >= 1.0 {
                    break;
                }
            }
        }

        match best_idx {
            Some(idx) if best_score >= match_threshold => {
                aligned.push(AlignedToken {
                    token: token.clone(),
                    matched: Some(external[idx].clone()),
                    score: best_score,
                });
                cursor = idx + 1;
            }
            _ => aligned.push(AlignedToken {
                token: token.clone(),
                matched: None,
                score: 0.0,
            }),
        }
    }
    aligned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults;

    fn words(items: &[&str]) -> Vec<WordTiming> {
        items.iter().map(|w| WordTiming::new(w)).collect()
    }

    fn tokens(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_strip_metadata_removes_timestamps_and_labels() {
        let text = "[00:00:01] **Agent:** Hello there. [00:03] **Caller:** Hi.";
        // The timestamp and label are removed but their surrounding spaces
        // stay; tokenization does not care about the runs.
        assert_eq!(strip_metadata(text).trim(), "Hello there.   Hi.");
    }

    #[test]
    fn test_tokenize_keeps_contractions() {
        let toks = tokenize("[00:00:01] **Agent:** I'm calling about case 227.");
        assert_eq!(toks, tokens(&["I'm", "calling", "about", "case", "227"]));
    }

    #[test]
    fn test_normalize_token() {
        assert_eq!(normalize_token("Hello,"), "hello");
        assert_eq!(normalize_token("DON'T"), "don't");
        assert_eq!(normalize_token("555-1234"), "5551234");
    }

    #[test]
    fn test_align_exact_sequence() {
        let toks = tokens(&["hello", "there", "friend"]);
        let ext = words(&["hello", "there", "friend"]);
        let aligned = align(
            &toks,
            &ext,
            defaults::ALIGNMENT_MATCH_THRESHOLD,
            defaults::ALIGNMENT_SEARCH_WINDOW,
        );
        assert_eq!(aligned.len(), 3);
        for a in &aligned {
            assert!(a.matched.is_some());
            assert!((a.score - 1.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_align_skips_extra_external_words() {
        let toks = tokens(&["hello", "friend"]);
        let ext = words(&["hello", "uh", "friend"]);
        let aligned = align(&toks, &ext, 0.6, 8);
        assert_eq!(aligned[0].matched.as_ref().map(|w| w.word.as_str()), Some("hello"));
        assert_eq!(aligned[1].matched.as_ref().map(|w| w.word.as_str()), Some("friend"));
    }

    #[test]
    fn test_align_unmatched_token_does_not_advance_cursor() {
        let toks = tokens(&["xylophone", "hello"]);
        let ext = words(&["hello"]);
        let aligned = align(&toks, &ext, 0.6, 8);
        assert!(aligned[0].matched.is_none());
        assert_eq!(aligned[0].score, 0.0);
        // "hello" must still be available for the next token.
        assert!(aligned[1].matched.is_some());
    }

    #[test]
    fn test_align_matched_indices_strictly_increase() {
        // External words are unique, so matched positions are recoverable.
        let toks = tokens(&["alpha", "alpha", "gamma", "delta"]);
        let ext = words(&["alpha", "beta", "gamma", "delta"]);
        let aligned = align(&toks, &ext, 0.6, 8);

        let mut last: Option<usize> = None;
        for a in &aligned {
            let Some(matched) = &a.matched else { continue };
            let idx = ext
                .iter()
                .position(|w| w.word == matched.word)
                .unwrap();
            if let Some(prev) = last {
                assert!(idx > prev, "matched index went backwards");
            }
            last = Some(idx);
        }
        // The duplicated "alpha" cannot re-consume index 0.
        assert!(aligned[1].matched.is_none() || aligned[1].matched.as_ref().unwrap().word != "alpha");
    }

    #[test]
    fn test_align_fuzzy_match_within_threshold() {
        let toks = tokens(&["Houais"]);
        let ext = words(&["houais"]);
        let aligned = align(&toks, &ext, 0.6, 8);
        assert!(aligned[0].matched.is_some());
    }

    #[test]
    fn test_align_respects_search_window() {
        let toks = tokens(&["target"]);
        let mut ext = words(&["a", "b", "c", "d"]);
        ext.push(WordTiming::new("target"));
        // Window of 3 never reaches index 4.
        let aligned = align(&toks, &ext, 0.6, 3);
        assert!(aligned[0].matched.is_none());
    }
}
