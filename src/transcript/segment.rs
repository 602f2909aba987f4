//! Canonical transcript segments and speaker normalization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical speaker names produced by [`normalize_speaker`].
pub mod speaker {
    pub const AGENT: &str = "Agent";
    pub const CALLER: &str = "Caller";
    pub const SYSTEM: &str = "System";
    pub const MEDICAL_STAFF: &str = "Medical Staff";
    pub const UNKNOWN: &str = "Unknown";
}

/// One chronological dialogue segment.
///
/// Ordering in the containing list is significant; segments are never merged
/// after creation except during parsing itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// `hh:mm` or `hh:mm:ss` offset into the call, empty when unknown.
    pub timestamp: String,
    /// A canonical speaker name or the trimmed original label.
    pub speaker: String,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(timestamp: &str, speaker: &str, text: &str) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            speaker: speaker.to_string(),
            text: text.to_string(),
        }
    }
}

/// Audit metadata attached to one normalization run. Descriptive only;
/// nothing downstream consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationInfo {
    pub normalized_at: DateTime<Utc>,
    pub original_segments: usize,
    pub normalized_segments: usize,
    pub method: String,
}

/// Substring mapping table for speaker labels. Checked case-insensitively,
/// first hit wins.
const SPEAKER_MAPPINGS: &[(&str, &str)] = &[
    ("agent", speaker::AGENT),
    ("caller", speaker::CALLER),
    ("audio", speaker::SYSTEM),
    ("system", speaker::SYSTEM),
    ("voicemail", speaker::SYSTEM),
    ("operator", speaker::SYSTEM),
    ("receptionist", speaker::SYSTEM),
    ("nurse", speaker::MEDICAL_STAFF),
    ("doctor", speaker::MEDICAL_STAFF),
    ("dr.", speaker::MEDICAL_STAFF),
    ("dr ", speaker::MEDICAL_STAFF),
];

/// Normalize a raw speaker label to a canonical name.
///
/// Unmapped labels pass through trimmed, so unusual but valid labels are
/// never silently discarded.
pub fn normalize_speaker(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let lower = lower.trim();

    for (needle, canonical) in SPEAKER_MAPPINGS {
        if lower.contains(needle) {
            return canonical.to_string();
        }
    }

    raw.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_speaker_canonical_names() {
        assert_eq!(normalize_speaker("Agent"), "Agent");
        assert_eq!(normalize_speaker("CALLER"), "Caller");
        assert_eq!(normalize_speaker("Audio"), "System");
        assert_eq!(normalize_speaker("Voicemail System"), "System");
        assert_eq!(normalize_speaker("Nurse Kelly"), "Medical Staff");
        assert_eq!(normalize_speaker("Dr. Park"), "Medical Staff");
    }

    #[test]
    fn test_normalize_speaker_substring_match() {
        assert_eq!(normalize_speaker("Agent 2"), "Agent");
        assert_eq!(normalize_speaker("second caller"), "Caller");
        assert_eq!(normalize_speaker("automated operator"), "System");
    }

    #[test]
    fn test_normalize_speaker_unmapped_passes_through_trimmed() {
        assert_eq!(normalize_speaker("  Translator  "), "Translator");
        assert_eq!(normalize_speaker("Speaker 1"), "Speaker 1");
    }

    #[test]
    fn test_normalize_speaker_is_idempotent_on_canonical_names() {
        for name in [
            speaker::AGENT,
            speaker::CALLER,
            speaker::SYSTEM,
            speaker::MEDICAL_STAFF,
        ] {
            assert_eq!(normalize_speaker(name), name);
        }
        // "Unknown" has no mapping entry and must survive untouched.
        assert_eq!(normalize_speaker(speaker::UNKNOWN), speaker::UNKNOWN);
    }

    #[test]
    fn test_segment_serde_shape() {
        let segment = TranscriptSegment::new("00:00:01", "Agent", "Hello.");
        let json = serde_json::to_value(&segment).unwrap();
        assert_eq!(json["timestamp"], "00:00:01");
        assert_eq!(json["speaker"], "Agent");
        assert_eq!(json["text"], "Hello.");
    }
}
