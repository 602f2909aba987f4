//! Detection of finished recordings in the watched audio directories.

pub mod detector;

pub use detector::{
    Clock, CompletionDetector, ProbeOutcome, RenameProbe, StabilityProbe, SystemClock,
};
