//! Word-level review generation.
//!
//! After transcription, every spoken word is cross-checked against the
//! engine's word timings and scanned for high-value patterns (phone numbers,
//! case numbers, money, dates). The result is a `.review.json` artifact a
//! human can work through instead of re-listening to the whole call.

pub mod align;
pub mod artifact;
pub mod flags;

pub use align::{AlignedToken, align, normalize_token, strip_metadata, tokenize};
pub use artifact::{ReviewArtifact, ReviewStatistics, ReviewWord, build_review, write_review};
pub use flags::{FlagPriority, Flagger, WordFlag};
