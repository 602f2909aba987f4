//! Completion detection for call recordings.
//!
//! A recorder writes audio files incrementally, so a file that merely exists
//! is not necessarily finished. A candidate is promoted only once it has been
//! tracked for a minimum age AND a stability probe (a no-op rename of the
//! path onto itself) confirms no writer still holds it open.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Result of one stability probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// No writer holds the file; safe to hand off.
    Stable,
    /// A writer still has the file open; keep waiting.
    Locked,
    /// The probe itself failed (file vanished, I/O error).
    Failed(String),
}

/// Trait for checking whether a file is still being written.
pub trait StabilityProbe: Send + Sync {
    fn probe(&self, path: &Path) -> ProbeOutcome;
}

/// Probe via renaming the path onto itself. On platforms where an open
/// writer holds an exclusive lock this fails with a permission error without
/// touching the file contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameProbe;

impl StabilityProbe for RenameProbe {
    fn probe(&self, path: &Path) -> ProbeOutcome {
        match fs::rename(path, path) {
            Ok(()) => ProbeOutcome::Stable,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => ProbeOutcome::Locked,
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    last_size: u64,
    first_seen: Instant,
}

/// Tracks candidate files until they are old enough and provably unlocked.
pub struct CompletionDetector<C: Clock = SystemClock, P: StabilityProbe = RenameProbe> {
    tracked: HashMap<PathBuf, Candidate>,
    /// Every path ever tracked, so a promoted file is not re-tracked by the
    /// next directory scan.
    seen: HashSet<PathBuf>,
    watch_dirs: Vec<PathBuf>,
    allowed_extensions: Vec<String>,
    completion_threshold: Duration,
    clock: C,
    probe: P,
}

impl CompletionDetector<SystemClock, RenameProbe> {
    pub fn new(
        watch_dirs: Vec<PathBuf>,
        allowed_extensions: Vec<String>,
        completion_threshold: Duration,
    ) -> Self {
        Self::with_clock_and_probe(
            watch_dirs,
            allowed_extensions,
            completion_threshold,
            SystemClock,
            RenameProbe,
        )
    }
}

impl<C: Clock, P: StabilityProbe> CompletionDetector<C, P> {
    pub fn with_clock_and_probe(
        watch_dirs: Vec<PathBuf>,
        allowed_extensions: Vec<String>,
        completion_threshold: Duration,
        clock: C,
        probe: P,
    ) -> Self {
        Self {
            tracked: HashMap::new(),
            seen: HashSet::new(),
            watch_dirs,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.to_lowercase())
                .collect(),
            completion_threshold,
            clock,
            probe,
        }
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.allowed_extensions.iter().any(|a| a == &e.to_lowercase()))
    }

    /// Start tracking a newly appeared file. Already-seen paths are ignored.
    pub fn on_file_appeared(&mut self, path: &Path) {
        if !self.extension_allowed(path) || self.seen.contains(path) {
            return;
        }
        let last_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        tracing::debug!(path = %path.display(), size = last_size, "tracking new file");
        self.seen.insert(path.to_path_buf());
        self.tracked.insert(
            path.to_path_buf(),
            Candidate {
                last_size,
                first_seen: self.clock.now(),
            },
        );
    }

    /// Forget a file that was deleted before completing.
    pub fn on_file_removed(&mut self, path: &Path) {
        if self.tracked.remove(path).is_some() {
            tracing::debug!(path = %path.display(), "dropped removed file");
        }
        self.seen.remove(path);
    }

    /// Number of files currently awaiting promotion.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// One poll cycle: scan the watched directories for new files, refresh
    /// tracked candidates, and return the paths promoted as complete.
    pub fn poll_once(&mut self) -> Vec<PathBuf> {
        for dir in self.watch_dirs.clone() {
            self.scan_dir(&dir);
        }

        let now = self.clock.now();
        let mut promoted = Vec::new();
        let mut dropped = Vec::new();

        for (path, candidate) in &mut self.tracked {
            let size = match fs::metadata(path) {
                Ok(meta) => meta.len(),
                Err(_) => {
                    tracing::debug!(path = %path.display(), "tracked file vanished");
                    dropped.push(path.clone());
                    continue;
                }
            };
            candidate.last_size = size;

            if now.duration_since(candidate.first_seen) < self.completion_threshold {
                continue;
            }

            match self.probe.probe(path) {
                ProbeOutcome::Stable => {
                    tracing::info!(path = %path.display(), size, "file complete");
                    promoted.push(path.clone());
                }
                ProbeOutcome::Locked => {
                    tracing::debug!(path = %path.display(), "file still locked");
                }
                ProbeOutcome::Failed(reason) => {
                    tracing::warn!(path = %path.display(), reason, "stability probe failed");
                    dropped.push(path.clone());
                }
            }
        }

        for path in promoted.iter().chain(dropped.iter()) {
            self.tracked.remove(path);
        }
        promoted
    }

    fn scan_dir(&mut self, dir: &Path) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot scan directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                self.on_file_appeared(&path);
            }
        }
    }
}
