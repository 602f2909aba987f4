//! Flagging rules for reviewed words.
//!
//! Two independent flag families: confidence flags driven by the engine's
//! per-word confidence, and pattern flags driven by the token text (phone
//! numbers, case numbers, money, dates, spelled-out sequences). A third rule
//! flags tokens whose aligned engine word disagrees with the transcript.

use crate::config::ReviewConfig;
use crate::defaults;
use crate::engine::WordTiming;
use crate::review::align::normalize_token;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b").expect("valid regex"));

static SPELLED_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9-]+$").expect("valid regex"));

static CASE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{6,}\b").expect("valid regex"));

static MONEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$[\d,]+(?:\.\d{2})?|\b\d+\s*(?:dollars?|cents?)\b").expect("valid regex")
});

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:\d{1,2}[/-]\d{1,2}[/-]\d{2,4}|(?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|Jun(?:e)?|Jul(?:y)?|Aug(?:ust)?|Sep(?:tember)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)\s+\d{1,2}(?:st|nd|rd|th)?(?:,?\s+\d{4})?)\b",
    )
    .expect("valid regex")
});

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\d{1,2}:\d{2}\s*(?:AM|PM)?\b").expect("valid regex"));

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+\b").expect("valid regex"));

static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\d+(?:st|nd|rd|th)$").expect("valid regex"));

/// Runs of single capital letters, e.g. a caller spelling out "H O U A I S".
static SPELLING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z](?:\s+[A-Z]){2,}\b").expect("valid regex"));

const MONTHS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep",
    "sept", "oct", "nov", "dec",
];

const DAYS: &[&str] = &[
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "mon", "tue",
    "tues", "wed", "thu", "thur", "thurs", "fri", "sat", "sun",
];

/// Words that are frequently capitalized at sentence starts but are never
/// names, and whose confidence runs naturally low in conversational speech.
const COMMON_WORDS: &[&str] = &[
    "i", "a", "an", "the", "hello", "hi", "yes", "no", "okay", "ok", "thank", "thanks", "please",
    "sorry", "and", "but", "or", "this", "that", "these", "those", "what", "when", "where", "why",
    "how", "who", "which", "of", "so", "to", "from", "for", "with", "can", "will", "was", "were",
    "are", "is", "be", "been", "have", "has", "do", "does", "did", "would", "could", "should",
    "my", "your", "their", "our", "his", "her", "its", "on", "in", "it", "at", "by", "up", "out",
    "off", "about", "as", "yeah", "yep", "nope", "let", "correct", "right", "wrong", "maybe",
    "exactly", "actually", "well", "sure", "fine", "get", "got", "give", "go", "going", "come",
    "want", "need", "see", "saw", "make", "made", "take", "took", "know", "think", "say", "said",
    "tell", "ask", "asked", "call", "called", "try", "trying", "press", "if", "then", "just",
    "now", "here", "there", "through", "request", "medical", "department", "release",
    "information", "number", "office", "record", "records", "patient", "i'm", "i've", "i'll",
    "i'd", "you're", "you've", "you'll", "you'd", "he's", "she's", "it's", "we're", "we've",
    "we'll", "we'd", "they're", "they've", "they'll", "they'd", "don't", "doesn't", "didn't",
    "won't", "wouldn't", "can't", "couldn't", "shouldn't", "haven't", "hasn't", "hadn't",
    "isn't", "aren't", "wasn't", "weren't", "am", "pm", "north", "south", "east", "west",
];

/// How urgently a flagged word needs human eyes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagPriority {
    High,
    Medium,
    Low,
}

impl FlagPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagPriority::High => "high",
            FlagPriority::Medium => "medium",
            FlagPriority::Low => "low",
        }
    }
}

/// One reason a word was flagged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordFlag {
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: String,
    pub priority: FlagPriority,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

impl WordFlag {
    fn new(kind: &str, reason: &str, priority: FlagPriority) -> Self {
        Self {
            kind: kind.to_string(),
            reason: reason.to_string(),
            priority,
            metadata: BTreeMap::new(),
        }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Strip surrounding punctuation before pattern checks.
fn clean(word: &str) -> &str {
    word.trim_matches(|c: char| ".,!?;:'\"".contains(c))
}

fn is_digit_like(word: &str) -> bool {
    let w = clean(word);
    !w.is_empty() && SPELLED_NUMBER_RE.is_match(w) && w.chars().any(|c| c.is_ascii_digit())
}

/// Stateless word flagger configured from the review section.
pub struct Flagger {
    config: ReviewConfig,
    common_words: HashSet<String>,
    expected_terms: Vec<String>,
}

impl Flagger {
    /// `expected_terms` come pre-merged from the inline config list and the
    /// optional terms file; they are matched case-insensitively.
    pub fn new(config: &ReviewConfig, expected_terms: Vec<String>) -> Self {
        let mut common_words: HashSet<String> =
            COMMON_WORDS.iter().map(|w| w.to_string()).collect();
        common_words.extend(config.extra_common_words.iter().map(|w| w.to_lowercase()));

        Self {
            config: config.clone(),
            common_words,
            expected_terms: expected_terms
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
        }
    }

    fn is_expected(&self, word: &str) -> bool {
        let lower = clean(word).to_lowercase();
        if lower.is_empty() {
            return false;
        }
        self.expected_terms.iter().any(|term| {
            *term == lower || term.split_whitespace().any(|part| part == lower)
        })
    }

    fn is_common_word(&self, word: &str) -> bool {
        self.common_words.contains(&clean(word).to_lowercase())
    }

    fn is_likely_name(&self, word: &str) -> bool {
        let w = clean(word);
        if w.chars().count() < 2 || !w.chars().next().is_some_and(|c| c.is_uppercase()) {
            return false;
        }
        if w.chars().all(|c| c.is_ascii_digit()) || SPELLED_NUMBER_RE.is_match(w) {
            return false;
        }
        if ORDINAL_RE.is_match(w) {
            return false;
        }
        let lower = w.to_lowercase();
        if MONTHS.contains(&lower.as_str()) || DAYS.contains(&lower.as_str()) {
            return false;
        }
        !self.common_words.contains(&lower)
    }

    /// Look ahead for a run of at least three digit-like tokens, the shape a
    /// spelled-out phone number takes ("2 1 0", "8-8-2-2").
    fn phone_sequence(&self, tokens: &[String], start: usize) -> Option<(usize, usize)> {
        let end = (start + defaults::PHONE_SEQUENCE_WINDOW).min(tokens.len());
        let mut parts = 0usize;
        let mut last = start;

        for (i, token) in tokens[start..end].iter().enumerate() {
            if !is_digit_like(token) {
                break;
            }
            parts += 1;
            last = start + i;
            if parts >= 3 {
                return Some((start, last + 1));
            }
        }
        None
    }

    fn is_spelled_out(&self, tokens: &[String], index: usize) -> bool {
        let start = index.saturating_sub(3);
        let end = (index + 4).min(tokens.len());
        let context = tokens[start..end].join(" ");
        SPELLING_RE.is_match(&context)
    }

    /// Flag one aligned token. `matched` and `score` come from the aligner;
    /// `matched = None` means the token had no acceptable external word, so
    /// confidence and mismatch rules do not apply.
    pub fn flag_word(
        &self,
        token: &str,
        index: usize,
        all_tokens: &[String],
        matched: Option<&WordTiming>,
        score: f64,
    ) -> Vec<WordFlag> {
        let mut flags = Vec::new();
        let token = token.trim();
        if token.is_empty() {
            return flags;
        }

        let cleaned = clean(token);
        let expected = self.is_expected(token);
        let matched_word = matched.map(|w| w.word.trim());
        let confidence = matched.and_then(|w| w.confidence);

        if let Some(confidence) = confidence
            && !expected
        {
            let common = self.is_common_word(token);
            let critical = if common {
                self.config.common_words_confidence_threshold
            } else {
                self.config.critical_confidence_threshold
            };
            if confidence < critical {
                flags.push(
                    WordFlag::new(
                        "critical_confidence",
                        &format!("Critical: very low confidence ({:.0}%)", confidence * 100.0),
                        FlagPriority::High,
                    )
                    .with("confidence", json!(confidence)),
                );
            } else if !common && confidence < self.config.low_confidence_threshold {
                flags.push(
                    WordFlag::new(
                        "low_confidence",
                        &format!("Low confidence ({:.0}%)", confidence * 100.0),
                        FlagPriority::Medium,
                    )
                    .with("confidence", json!(confidence)),
                );
            }
        }

        let hits = |re: &Regex| {
            re.is_match(token) || matched_word.is_some_and(|w| re.is_match(w))
        };

        if self.config.flag_phone_numbers {
            if hits(&PHONE_RE) {
                flags.push(WordFlag::new(
                    "phone_number",
                    "Phone number detected - verify accuracy",
                    FlagPriority::High,
                ));
            } else if is_digit_like(cleaned)
                && let Some((seq_start, seq_end)) = self.phone_sequence(all_tokens, index)
            {
                flags.push(
                    WordFlag::new(
                        "phone_number_segment",
                        "Part of spelled-out phone number - verify sequence",
                        FlagPriority::High,
                    )
                    .with("sequence_range", json!([seq_start, seq_end])),
                );
            }
        }

        if self.config.flag_case_numbers && hits(&CASE_NUMBER_RE) {
            flags.push(WordFlag::new(
                "case_number",
                "Possible case number - verify accuracy",
                FlagPriority::High,
            ));
        }

        if self.config.flag_money_amounts && hits(&MONEY_RE) {
            flags.push(WordFlag::new(
                "money_amount",
                "Dollar amount detected - verify accuracy",
                FlagPriority::High,
            ));
        }

        if self.config.flag_dates && hits(&DATE_RE) {
            flags.push(WordFlag::new(
                "date",
                "Date detected - verify accuracy",
                FlagPriority::Medium,
            ));
        }

        if self.config.flag_times && hits(&TIME_RE) {
            flags.push(WordFlag::new(
                "time",
                "Time detected - verify accuracy",
                FlagPriority::Medium,
            ));
        }

        if self.config.flag_spelled_words && self.is_spelled_out(all_tokens, index) {
            flags.push(WordFlag::new(
                "spelling",
                "Spelled-out word detected - verify spelling",
                FlagPriority::High,
            ));
        }

        if self.config.flag_numbers && NUMBER_RE.is_match(cleaned) {
            let already_numeric = flags.iter().any(|f| {
                matches!(
                    f.kind.as_str(),
                    "phone_number" | "phone_number_segment" | "case_number"
                )
            });
            if !already_numeric {
                flags.push(WordFlag::new(
                    "number",
                    "Number detected - verify accuracy",
                    FlagPriority::Low,
                ));
            }
        }

        if self.config.flag_names && !expected && self.is_likely_name(cleaned) {
            flags.push(WordFlag::new(
                "name",
                "Possible name/proper noun - verify spelling",
                FlagPriority::Medium,
            ));
        }

        if let Some(word) = matched_word
            && normalize_token(token) != normalize_token(word)
            && score < self.config.close_match_threshold
        {
            flags.push(
                WordFlag::new(
                    "transcription_mismatch",
                    "Transcript and engine transcribed differently",
                    FlagPriority::High,
                )
                .with("transcript_version", json!(token))
                .with("engine_version", json!(word))
                .with("similarity_score", json!(score)),
            );
        }

        flags
    }
}
