use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cleanup::{CleanupHandle, CleanupScope};
use crate::error::{EngineError, Result};
use crate::media::VideoMetadata;

/// Frame index used for the single-frame strategy, converted to seconds via fps.
pub const SINGLE_FRAME_OFFSET: f64 = 30.0;
/// Fraction of the duration trimmed from each end for the multiple strategy.
pub const MULTIPLE_MARGIN: f64 = 0.1;

/// Probing and still extraction for video files.
pub trait FrameExtractor: Send + Sync {
    /// Read duration, size and frame rate. Fails if there is no video stream.
    fn probe(&self, video: &Path) -> Result<VideoMetadata>;

    /// Write one still taken at `time` seconds to `output`.
    fn extract_frame_at(&self, video: &Path, time: f64, output: &Path) -> Result<()>;

    /// Write up to `max_frames` I-frames into `output_dir`.
    fn extract_keyframes(&self, video: &Path, output_dir: &Path, max_frames: usize) -> Result<()>;
}

/// Detects whether the external tooling is installed.
pub trait DependencyChecker: Send + Sync {
    /// Returns the tool version on success.
    fn check_available(&self) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStrategy {
    Single,
    #[default]
    Multiple,
    Keyframes,
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Single => "single",
            Self::Multiple => "multiple",
            Self::Keyframes => "keyframes",
        };
        f.write_str(s)
    }
}

impl FromStr for ExtractionStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "multiple" => Ok(Self::Multiple),
            "keyframes" => Ok(Self::Keyframes),
            other => Err(format!("unknown extraction strategy: {}", other)),
        }
    }
}

/// Seconds at which the single-frame strategy grabs its still.
pub fn single_timepoint(meta: &VideoMetadata) -> f64 {
    let offset = if meta.fps > 0.0 {
        SINGLE_FRAME_OFFSET / meta.fps
    } else {
        1.0
    };
    offset.min(meta.duration - 1.0).max(0.0)
}

/// `count` evenly spaced timepoints with a margin trimmed from both ends.
pub fn multiple_timepoints(duration: f64, count: usize) -> Vec<f64> {
    let duration = duration.max(0.0);
    match count {
        0 => Vec::new(),
        1 => vec![duration / 2.0],
        n => {
            let margin = duration * MULTIPLE_MARGIN;
            let step = (duration - 2.0 * margin) / (n - 1) as f64;
            (0..n).map(|i| margin + i as f64 * step).collect()
        }
    }
}

/// Frames pulled from one video.
#[derive(Debug, Clone)]
pub struct ExtractedFrames {
    pub frames: Vec<PathBuf>,
    pub metadata: VideoMetadata,
}

/// Every temp path the provider has created and not yet removed.
#[derive(Debug, Default)]
struct TempTracker {
    files: BTreeSet<PathBuf>,
    dirs: BTreeSet<PathBuf>,
}

impl TempTracker {
    fn remove_files(&mut self, paths: &[PathBuf]) {
        let mut parents = BTreeSet::new();
        for path in paths {
            if self.files.remove(path) {
                if let Err(e) = fs::remove_file(path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "failed to remove temp frame");
                    }
                }
            }
            if let Some(parent) = path.parent() {
                parents.insert(parent.to_path_buf());
            }
        }
        for dir in parents {
            self.remove_dir_if_drained(&dir);
        }
    }

    fn remove_dir_if_drained(&mut self, dir: &Path) {
        if !self.dirs.contains(dir) || self.files.iter().any(|f| f.starts_with(dir)) {
            return;
        }
        self.dirs.remove(dir);
        if let Err(e) = fs::remove_dir_all(dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %dir.display(), error = %e, "failed to remove temp directory");
            }
        }
    }

    fn remove_all(&mut self) {
        let files: Vec<PathBuf> = self.files.iter().cloned().collect();
        self.remove_files(&files);
        let dirs: Vec<PathBuf> = self.dirs.iter().cloned().collect();
        for dir in dirs {
            self.remove_dir_if_drained(&dir);
        }
    }
}

/// Turns videos into ordered lists of temporary frame images.
///
/// Every file and directory created is tracked, so [`FrameProvider::cleanup`]
/// removes exactly those even after a partial failure. The tracker is also
/// registered with the run's [`CleanupScope`] for interrupt handling.
pub struct FrameProvider<'a> {
    extractor: &'a dyn FrameExtractor,
    root: PathBuf,
    tracker: Arc<Mutex<TempTracker>>,
    pool: rayon::ThreadPool,
    seq: AtomicU64,
    scope: CleanupScope,
    handle: CleanupHandle,
}

impl<'a> FrameProvider<'a> {
    pub fn new(
        extractor: &'a dyn FrameExtractor,
        temp_root: PathBuf,
        concurrency: usize,
        scope: &CleanupScope,
    ) -> anyhow::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .thread_name(|i| format!("namesake-extract-{}", i))
            .build()?;
        let tracker = Arc::new(Mutex::new(TempTracker::default()));
        let hook = tracker.clone();
        let handle = scope.register("temp frames", move || {
            hook.lock().unwrap_or_else(|e| e.into_inner()).remove_all();
        });
        Ok(Self {
            extractor,
            root: temp_root,
            tracker,
            pool,
            seq: AtomicU64::new(0),
            scope: scope.clone(),
            handle,
        })
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, TempTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Distinct directory per extraction call.
    fn make_frame_dir(&self, video: &Path) -> Result<PathBuf> {
        let stem = video
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| crate::naming::sanitize_stem(s, 32))
            .unwrap_or_else(|| "video".to_string());
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let dir = self
            .root
            .join(format!("{}-{}-{}-{}", stem, std::process::id(), nanos, seq));
        fs::create_dir_all(&dir).map_err(|e| EngineError::extraction(video, e))?;
        self.tracker().dirs.insert(dir.clone());
        Ok(dir)
    }

    pub fn extract(
        &self,
        video: &Path,
        strategy: ExtractionStrategy,
        frame_count: usize,
        max_keyframes: usize,
    ) -> Result<ExtractedFrames> {
        let metadata = self.extractor.probe(video)?;
        let dir = self.make_frame_dir(video)?;

        let result = match strategy {
            ExtractionStrategy::Single => self.extract_at(video, &dir, &[single_timepoint(&metadata)]),
            ExtractionStrategy::Multiple => {
                self.extract_at(video, &dir, &multiple_timepoints(metadata.duration, frame_count))
            }
            ExtractionStrategy::Keyframes => self.extract_keyframes(video, &dir, max_keyframes),
        };

        match result {
            Ok(frames) => {
                debug!(video = %video.display(), frames = frames.len(), %strategy, "extracted frames");
                Ok(ExtractedFrames { frames, metadata })
            }
            Err(e) => {
                self.discard_dir(&dir);
                Err(e)
            }
        }
    }

    fn extract_at(&self, video: &Path, dir: &Path, timepoints: &[f64]) -> Result<Vec<PathBuf>> {
        let targets: Vec<(f64, PathBuf)> = timepoints
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, dir.join(format!("frame-{:03}.jpg", i))))
            .collect();
        {
            let mut tracker = self.tracker();
            for (_, path) in &targets {
                tracker.files.insert(path.clone());
            }
        }

        // Collecting into Result keeps timepoint order.
        self.pool.install(|| {
            targets
                .par_iter()
                .map(|(t, path)| {
                    self.extractor.extract_frame_at(video, *t, path)?;
                    Ok(path.clone())
                })
                .collect::<Result<Vec<PathBuf>>>()
        })
    }

    fn extract_keyframes(&self, video: &Path, dir: &Path, max_frames: usize) -> Result<Vec<PathBuf>> {
        let outcome = self.extractor.extract_keyframes(video, dir, max_frames);

        // Track whatever landed on disk before looking at the outcome.
        let mut frames: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| EngineError::extraction(video, e))?
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.is_file())
            .collect();
        frames.sort();
        {
            let mut tracker = self.tracker();
            for path in &frames {
                tracker.files.insert(path.clone());
            }
        }

        outcome?;
        Ok(frames)
    }

    fn discard_dir(&self, dir: &Path) {
        let mut tracker = self.tracker();
        let files: Vec<PathBuf> = tracker
            .files
            .iter()
            .filter(|f| f.starts_with(dir))
            .cloned()
            .collect();
        tracker.remove_files(&files);
        tracker.remove_dir_if_drained(dir);
    }

    /// Remove the given tracked frames. Untracked paths (original images) are left alone.
    pub fn release(&self, frames: &[PathBuf]) {
        self.tracker().remove_files(frames);
    }

    /// Remove every file and directory still tracked.
    pub fn cleanup(&self) {
        self.tracker().remove_all();
        let _ = fs::remove_dir(&self.root);
    }

    pub fn tracked_files(&self) -> usize {
        self.tracker().files.len()
    }
}

impl Drop for FrameProvider<'_> {
    fn drop(&mut self) {
        self.cleanup();
        self.scope.deregister(self.handle);
    }
}
