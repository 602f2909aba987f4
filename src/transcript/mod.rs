//! Transcript normalization: canonical segments and the raw-text parser.

pub mod parser;
pub mod segment;

pub use parser::{TranscriptParser, normalize_raw, parse};
pub use segment::{NormalizationInfo, TranscriptSegment, normalize_speaker, speaker};
