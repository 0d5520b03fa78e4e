pub mod cleanup;
pub mod dispatch;
pub mod error;
pub mod ffmpeg;
pub mod frames;
pub mod mapper;
pub mod media;
pub mod naming;
pub mod openai;
pub mod planner;
pub mod reconcile;
pub mod rename;
pub mod scan;
pub mod stats;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::frames::FrameProvider;
use crate::mapper::ResultMapper;
use crate::media::{MediaItem, MediaType};
use crate::planner::BatchLimits;
use crate::rename::RenameExecutor;
use crate::stats::StatsAggregator;

pub use cleanup::{CancellationToken, CleanupHandle, CleanupScope};
pub use dispatch::{AnalysisClient, Dispatcher, RetryPolicy};
pub use error::EngineError;
pub use ffmpeg::FfmpegTool;
pub use frames::{DependencyChecker, ExtractionStrategy, FrameExtractor};
pub use media::{AnalysisResult, RenameOutcome, VideoMetadata};
pub use openai::{AiConfig, OpenAiClient};
pub use reconcile::Reconciliation;
pub use stats::BatchStats;

/// Default instruction sent with every batch. The `ITEM<n>:` line format is
/// what the reconciler looks for first.
pub const DEFAULT_PROMPT: &str = "You will receive several images in order. For each image, write one \
short, specific description (at most 8 words) suitable as a file name, naming the main subject and \
setting. Answer with exactly one line per image, in the same order, formatted as `ITEM<n>: <description>` \
starting at ITEM1. Do not add any other text.";

fn default_frame_count() -> usize {
    5
}

fn default_max_keyframes() -> usize {
    10
}

fn default_max_batch_size() -> usize {
    10
}

fn default_max_token_budget() -> usize {
    16_000
}

fn default_avg_tokens_per_frame() -> usize {
    765
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_extract_concurrency() -> usize {
    4
}

fn default_max_name_length() -> usize {
    80
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Files and directories to rename
    pub inputs: Vec<PathBuf>,
    #[serde(default)]
    pub recursive: bool,
    /// Copy renamed files here instead of renaming in place
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Compute target names without touching the filesystem
    #[serde(default)]
    pub preview: bool,
    #[serde(default)]
    pub strategy: ExtractionStrategy,
    /// Frames per video for the `multiple` strategy
    #[serde(default = "default_frame_count")]
    pub frame_count: usize,
    #[serde(default = "default_max_keyframes")]
    pub max_keyframes: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_token_budget")]
    pub max_token_budget: usize,
    #[serde(default = "default_avg_tokens_per_frame")]
    pub avg_tokens_per_frame: usize,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_extract_concurrency")]
    pub extract_concurrency: usize,
    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,
}

impl ProcessOptions {
    pub fn new(inputs: Vec<PathBuf>) -> Self {
        Self {
            inputs,
            recursive: false,
            output_dir: None,
            preview: false,
            strategy: ExtractionStrategy::default(),
            frame_count: default_frame_count(),
            max_keyframes: default_max_keyframes(),
            max_batch_size: default_max_batch_size(),
            max_token_budget: default_max_token_budget(),
            avg_tokens_per_frame: default_avg_tokens_per_frame(),
            prompt: default_prompt(),
            retry: RetryPolicy::default(),
            extract_concurrency: default_extract_concurrency(),
            max_name_length: default_max_name_length(),
        }
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_batch_size: self.max_batch_size,
            max_token_budget: self.max_token_budget,
            avg_tokens_per_frame: self.avg_tokens_per_frame,
        }
    }
}

/// External capabilities the engine drives.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub extractor: &'a dyn FrameExtractor,
    pub dependencies: &'a dyn DependencyChecker,
    pub analyzer: &'a dyn AnalysisClient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResult {
    /// One outcome per input file, ordered by original path
    pub outcomes: Vec<RenameOutcome>,
    pub stats: BatchStats,
}

/// Control options for process execution (cancellation, cleanup, temp location).
#[derive(Clone, Default)]
pub struct ProcessControl {
    pub cancel_token: Option<CancellationToken>,
    /// Scope that temp-file cleanup is registered with. Share it with an
    /// interrupt handler to clean up on Ctrl-C.
    pub cleanup: Option<CleanupScope>,
    /// Parent directory for extracted frames. Defaults to the system temp dir.
    pub temp_root: Option<PathBuf>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn with_cleanup(mut self, scope: CleanupScope) -> Self {
        self.cleanup = Some(scope);
        self
    }

    pub fn with_temp_root(mut self, root: PathBuf) -> Self {
        self.temp_root = Some(root);
        self
    }
}

/// Type alias for progress callback
pub type ProgressCallback<'a> = dyn Fn(&str, u64, u64, &str) + Send + Sync + 'a;

/// Throttled progress reporter: emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    last_emit: std::sync::Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        let start = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .unwrap_or_else(Instant::now);
        Self {
            inner,
            last_emit: std::sync::Mutex::new(start),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Outcomes and stats kept in step.
struct Ledger<'s> {
    outcomes: Vec<RenameOutcome>,
    stats: &'s StatsAggregator,
}

impl Ledger<'_> {
    fn record(&mut self, outcome: RenameOutcome) {
        self.stats.record_outcome(&outcome);
        self.outcomes.push(outcome);
    }
}

/// Run the full pipeline with progress reporting.
pub fn process(
    options: &ProcessOptions,
    services: Services<'_>,
    progress_callback: &ProgressCallback<'_>,
) -> anyhow::Result<ProcessResult> {
    process_with_control(options, services, &ProcessControl::default(), progress_callback)
}

/// Run the full pipeline with progress reporting and control options.
///
/// Each batch is analysed, reconciled and renamed before the next is sent,
/// so a late failure never undoes earlier renames. Only a missing frame
/// extraction dependency or cancellation makes this return an error; every
/// other failure becomes a failed outcome for the affected files.
pub fn process_with_control(
    options: &ProcessOptions,
    services: Services<'_>,
    control: &ProcessControl,
    progress_callback: &ProgressCallback<'_>,
) -> anyhow::Result<ProcessResult> {
    let started = Instant::now();
    let tp = ThrottledProgress::new(progress_callback);
    let cancel = control.cancel_token.clone().unwrap_or_default();
    let scope = control.cleanup.clone().unwrap_or_default();
    let stats = StatsAggregator::new();
    let mut ledger = Ledger { outcomes: Vec::new(), stats: &stats };

    cancel.check()?;

    // Stage 1: Discover inputs
    let scanned = scan::collect_media(&options.inputs, options.recursive);
    for (path, reason) in scanned.unreadable {
        warn!(path = %path.display(), %reason, "skipping unreadable input");
        ledger.record(RenameOutcome::failed(path, reason));
    }
    let files = scanned.media;
    if files.iter().any(|f| f.media_type == MediaType::Video) {
        let version = services.dependencies.check_available()?;
        info!(%version, "frame extraction tools available");
    }

    let temp_root = control
        .temp_root
        .clone()
        .unwrap_or_else(std::env::temp_dir)
        .join(format!("namesake-{}", std::process::id()));
    let provider = FrameProvider::new(
        services.extractor,
        temp_root,
        options.extract_concurrency,
        &scope,
    )?;

    let abort = |err: EngineError| -> anyhow::Error {
        scope.run_all();
        err.into()
    };

    // Stage 2: Frames
    let t = Instant::now();
    let total = files.len() as u64;
    let mut items: Vec<MediaItem> = Vec::with_capacity(files.len());
    for (i, file) in files.into_iter().enumerate() {
        if let Err(e) = cancel.check() {
            return Err(abort(e));
        }
        tp.report("extract", i as u64, total, &format!("Preparing {}", file.path.display()));
        match file.media_type {
            MediaType::Image => items.push(MediaItem::image(file.path)),
            MediaType::Video => {
                match provider.extract(&file.path, options.strategy, options.frame_count, options.max_keyframes) {
                    Ok(extracted) if extracted.frames.is_empty() => {
                        warn!(video = %file.path.display(), "no frames extracted");
                        ledger.record(RenameOutcome::failed(file.path, "no frames could be extracted"));
                    }
                    Ok(extracted) => {
                        items.push(MediaItem::video(file.path, extracted.frames, extracted.metadata))
                    }
                    Err(e) if e.is_fatal() => return Err(abort(e)),
                    Err(e) => {
                        warn!(error = %e, "skipping video");
                        ledger.record(RenameOutcome::failed(file.path, e));
                    }
                }
            }
        }
    }
    stats.record_extraction(t.elapsed());

    // Stage 3: Plan
    let batches = planner::plan(&items, options.batch_limits());
    info!(items = items.len(), batches = batches.len(), "planned analysis batches");

    // Stage 4: Analyse, reconcile and rename, one batch at a time
    let dispatcher = Dispatcher::new(services.analyzer, &options.prompt, options.retry);
    let executor = RenameExecutor::new(options.output_dir.clone(), options.preview, options.max_name_length);
    let mut mapper = ResultMapper::new(&items);
    let batch_total = batches.len() as u64;

    for (bi, batch) in batches.iter().enumerate() {
        if let Err(e) = cancel.check() {
            return Err(abort(e));
        }
        tp.report(
            "analyze",
            bi as u64,
            batch_total,
            &format!("Batch {}/{} ({} frames)", bi + 1, batch_total, batch.len()),
        );

        let t = Instant::now();
        let failure = match dispatcher.dispatch(batch) {
            Ok(raw) => {
                let reconciled = reconcile::reconcile(&raw, batch.len());
                let degraded = reconciled.method.is_degraded();
                if degraded {
                    warn!(batch = bi + 1, method = ?reconciled.method, "response did not match frame count");
                }
                stats.record_batch(true, degraded, t.elapsed());

                for resolved in mapper.map(&items, batch, &reconciled.descriptions, degraded) {
                    let item = &items[resolved.item];
                    debug!(
                        file = %item.original_path.display(),
                        frames_in_batch = resolved.frame_descriptions.len(),
                        "resolved from first frame"
                    );
                    let outcome = executor.rename(item, resolved.result).with_degraded(resolved.degraded);
                    mapper.mark_completed(&item.original_path);
                    ledger.record(outcome);
                }
                None
            }
            Err(e) => {
                warn!(batch = bi + 1, error = %e, "batch failed");
                stats.record_batch(false, false, t.elapsed());
                Some(e.to_string())
            }
        };

        // Items whose last frame was in this batch are finished either way.
        for idx in mapper.consume(batch) {
            let item = &items[idx];
            if !mapper.is_completed(&item.original_path) {
                let reason = failure.clone().unwrap_or_else(|| "no description produced".to_string());
                ledger.record(RenameOutcome::failed(item.original_path.clone(), reason));
                mapper.mark_completed(&item.original_path);
            }
            provider.release(&item.frames);
        }
    }

    for idx in mapper.unresolved(&items) {
        ledger.record(RenameOutcome::failed(
            items[idx].original_path.clone(),
            "not analysed",
        ));
    }

    debug!(leftover = provider.tracked_files(), "removing remaining temp frames");
    provider.cleanup();
    scope.run_all();

    stats.finish(started.elapsed());
    let mut outcomes = ledger.outcomes;
    outcomes.sort_by(|a, b| a.original_path.cmp(&b.original_path));
    Ok(ProcessResult {
        outcomes,
        stats: stats.snapshot(),
    })
}
