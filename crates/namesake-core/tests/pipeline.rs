use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use namesake_core::error::Result;
use namesake_core::{
    process, process_with_control, AnalysisClient, CancellationToken, DependencyChecker,
    EngineError, ExtractionStrategy, FrameExtractor, ProcessControl, ProcessOptions,
    ProcessResult, RetryPolicy, Services, VideoMetadata,
};
use tempfile::{tempdir, TempDir};

struct FakeTools {
    available: bool,
}

impl DependencyChecker for FakeTools {
    fn check_available(&self) -> Result<String> {
        if self.available {
            Ok("6.1".to_string())
        } else {
            Err(EngineError::DependencyUnavailable {
                tool: "ffmpeg".to_string(),
                reason: "not found".to_string(),
            })
        }
    }
}

impl FrameExtractor for FakeTools {
    fn probe(&self, video: &Path) -> Result<VideoMetadata> {
        if video.to_string_lossy().contains("broken") {
            return Err(EngineError::probe(video, "no video stream"));
        }
        Ok(VideoMetadata { duration: 50.0, width: 1280, height: 720, fps: 25.0 })
    }

    fn extract_frame_at(&self, video: &Path, _time: f64, output: &Path) -> Result<()> {
        fs::write(output, b"frame").map_err(|e| EngineError::extraction(video, e))
    }

    fn extract_keyframes(&self, _video: &Path, _dir: &Path, _max: usize) -> Result<()> {
        Ok(())
    }
}

/// Answers `ITEM<n>: shot <file stem>` per image, failing any batch that
/// contains an image whose name includes `fail_on`.
struct FakeAnalyzer {
    fail_on: Option<&'static str>,
    reply_limit: Option<usize>,
    calls: Mutex<Vec<Vec<PathBuf>>>,
}

impl FakeAnalyzer {
    fn new() -> Self {
        Self { fail_on: None, reply_limit: None, calls: Mutex::new(Vec::new()) }
    }

    fn calls(&self) -> Vec<Vec<PathBuf>> {
        self.calls.lock().unwrap().clone()
    }
}

impl AnalysisClient for FakeAnalyzer {
    fn analyze(&self, images: &[PathBuf], _prompt: &str) -> Result<String> {
        self.calls.lock().unwrap().push(images.to_vec());
        if let Some(marker) = self.fail_on {
            if images.iter().any(|p| p.to_string_lossy().contains(marker)) {
                return Err(EngineError::Analysis("HTTP 429 quota exceeded".to_string()));
            }
        }
        let limit = self.reply_limit.unwrap_or(images.len());
        Ok(images
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, p)| format!("ITEM{}: shot {}", i + 1, p.file_stem().unwrap().to_string_lossy()))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

fn fast_options(inputs: Vec<PathBuf>) -> ProcessOptions {
    let mut options = ProcessOptions::new(inputs);
    options.retry = RetryPolicy { max_attempts: 3, base_delay_ms: 0 };
    options
}

fn run(options: &ProcessOptions, analyzer: &FakeAnalyzer, temp: &TempDir) -> anyhow::Result<ProcessResult> {
    let tools = FakeTools { available: true };
    let services = Services { extractor: &tools, dependencies: &tools, analyzer };
    let control = ProcessControl::new().with_temp_root(temp.path().to_path_buf());
    process_with_control(options, services, &control, &|_, _, _, _| {})
}

fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, name.as_bytes()).unwrap();
    path
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn image_and_video_split_across_two_batches() {
    let media = tempdir().unwrap();
    let temp = tempdir().unwrap();
    touch(media.path(), "a.jpg");
    touch(media.path(), "b.mp4");

    let mut options = fast_options(vec![media.path().to_path_buf()]);
    options.max_batch_size = 4;
    options.strategy = ExtractionStrategy::Multiple;
    let analyzer = FakeAnalyzer::new();
    let result = run(&options, &analyzer, &temp).unwrap();

    let sizes: Vec<usize> = analyzer.calls().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![4, 2]);

    assert_eq!(result.outcomes.len(), 2);
    assert!(result.outcomes.iter().all(|o| o.success));
    let video = &result.outcomes[1];
    assert_eq!(video.original_path, media.path().join("b.mp4"));
    assert_eq!(video.analysis_result.as_ref().unwrap().description, "shot frame-000");
    assert_eq!(listing(media.path()), vec!["shot-a.jpg", "shot-frame-000.mp4"]);

    assert_eq!(result.stats.total_batches, 2);
    assert_eq!(result.stats.successful_files, 2);

    // Extracted frames are gone once their video is resolved.
    let leftovers: Vec<_> = walk(temp.path());
    assert!(leftovers.is_empty(), "left behind: {:?}", leftovers);
}

#[test]
fn failed_batch_isolated_and_run_continues() {
    let media = tempdir().unwrap();
    let temp = tempdir().unwrap();
    for name in ["a1.jpg", "a2.jpg", "b-bad.jpg", "c1.jpg", "c2.jpg"] {
        touch(media.path(), name);
    }

    let mut options = fast_options(vec![media.path().to_path_buf()]);
    options.max_batch_size = 2;
    let analyzer = FakeAnalyzer { fail_on: Some("bad"), ..FakeAnalyzer::new() };
    let result = run(&options, &analyzer, &temp).unwrap();

    // Batch 2 is tried three times, then batch 3 still runs.
    assert_eq!(analyzer.calls().len(), 1 + 3 + 1);
    assert_eq!(result.outcomes.len(), 5);

    let failed: Vec<PathBuf> = result
        .outcomes
        .iter()
        .filter(|o| !o.success)
        .map(|o| o.original_path.clone())
        .collect();
    assert_eq!(failed, vec![media.path().join("b-bad.jpg"), media.path().join("c1.jpg")]);
    for o in result.outcomes.iter().filter(|o| !o.success) {
        assert!(o.error.as_deref().unwrap().contains("429"));
    }
    assert!(media.path().join("shot-c2.jpg").exists());
    assert_eq!(result.stats.failed_batches, 1);
    assert_eq!(result.stats.failed_files, 2);
}

#[test]
fn video_spanning_a_failed_batch_resolves_from_later_frames() {
    let media = tempdir().unwrap();
    let temp = tempdir().unwrap();
    touch(media.path(), "bad.jpg");
    touch(media.path(), "clip.mp4");

    let mut options = fast_options(vec![media.path().to_path_buf()]);
    options.max_batch_size = 3;
    options.frame_count = 4;
    let analyzer = FakeAnalyzer { fail_on: Some("bad"), ..FakeAnalyzer::new() };
    let result = run(&options, &analyzer, &temp).unwrap();

    assert_eq!(result.outcomes.len(), 2);
    let clip = result
        .outcomes
        .iter()
        .find(|o| o.original_path.ends_with("clip.mp4"))
        .unwrap();
    assert!(clip.success);
    assert_eq!(clip.analysis_result.as_ref().unwrap().description, "shot frame-002");
    assert!(walk(temp.path()).is_empty());
}

#[test]
fn preview_leaves_directory_untouched() {
    let media = tempdir().unwrap();
    let temp = tempdir().unwrap();
    touch(media.path(), "one.jpg");
    touch(media.path(), "two.png");
    touch(media.path(), "three.mp4");
    let before = listing(media.path());

    let mut options = fast_options(vec![media.path().to_path_buf()]);
    options.preview = true;
    let analyzer = FakeAnalyzer::new();
    let result = run(&options, &analyzer, &temp).unwrap();

    assert_eq!(listing(media.path()), before);
    assert_eq!(result.outcomes.len(), 3);
    for o in &result.outcomes {
        assert!(o.success);
        let target = o.new_path.as_ref().unwrap();
        assert_eq!(target.parent(), Some(media.path()));
        assert!(!target.exists());
    }
}

#[test]
fn extraction_failure_only_fails_that_video() {
    let media = tempdir().unwrap();
    let temp = tempdir().unwrap();
    touch(media.path(), "broken.mp4");
    touch(media.path(), "fine.jpg");

    let options = fast_options(vec![media.path().to_path_buf()]);
    let analyzer = FakeAnalyzer::new();
    let result = run(&options, &analyzer, &temp).unwrap();

    assert_eq!(result.outcomes.len(), 2);
    let broken = &result.outcomes[0];
    assert!(!broken.success);
    assert!(broken.error.as_deref().unwrap().contains("no video stream"));
    assert!(result.outcomes[1].success);
    assert!(media.path().join("broken.mp4").exists());
}

#[test]
fn short_response_is_padded_and_flagged() {
    let media = tempdir().unwrap();
    let temp = tempdir().unwrap();
    for name in ["p1.jpg", "p2.jpg", "p3.jpg"] {
        touch(media.path(), name);
    }

    let options = fast_options(vec![media.path().to_path_buf()]);
    let analyzer = FakeAnalyzer { reply_limit: Some(2), ..FakeAnalyzer::new() };
    let result = run(&options, &analyzer, &temp).unwrap();

    assert_eq!(result.outcomes.len(), 3);
    assert!(result.outcomes.iter().all(|o| o.success && o.degraded));
    assert_eq!(result.stats.degraded_batches, 1);
    // The third file reuses the second description and gets a suffix.
    assert_eq!(listing(media.path()), vec!["shot-p1.jpg", "shot-p2-1.jpg", "shot-p2.jpg"]);
}

#[test]
fn missing_dependency_aborts_before_touching_files() {
    let media = tempdir().unwrap();
    touch(media.path(), "a.jpg");
    touch(media.path(), "b.mp4");
    let before = listing(media.path());

    let tools = FakeTools { available: false };
    let analyzer = FakeAnalyzer::new();
    let services = Services { extractor: &tools, dependencies: &tools, analyzer: &analyzer };
    let options = fast_options(vec![media.path().to_path_buf()]);
    let err = process(&options, services, &|_, _, _, _| {}).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::DependencyUnavailable { .. })
    ));
    assert!(analyzer.calls().is_empty());
    assert_eq!(listing(media.path()), before);
}

#[test]
fn images_only_run_skips_dependency_check() {
    let media = tempdir().unwrap();
    touch(media.path(), "only.jpg");

    let tools = FakeTools { available: false };
    let analyzer = FakeAnalyzer::new();
    let services = Services { extractor: &tools, dependencies: &tools, analyzer: &analyzer };
    let options = fast_options(vec![media.path().to_path_buf()]);
    let result = process(&options, services, &|_, _, _, _| {}).unwrap();
    assert_eq!(result.outcomes.len(), 1);
    assert!(result.outcomes[0].success);
}

#[test]
fn cancelled_run_returns_error() {
    let media = tempdir().unwrap();
    let temp = tempdir().unwrap();
    touch(media.path(), "a.jpg");

    let token = CancellationToken::new();
    token.cancel();
    let tools = FakeTools { available: true };
    let analyzer = FakeAnalyzer::new();
    let services = Services { extractor: &tools, dependencies: &tools, analyzer: &analyzer };
    let control = ProcessControl::new()
        .with_cancel_token(token)
        .with_temp_root(temp.path().to_path_buf());
    let options = fast_options(vec![media.path().to_path_buf()]);

    let err = process_with_control(&options, services, &control, &|_, _, _, _| {}).unwrap_err();
    assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::Cancelled)));
    assert!(media.path().join("a.jpg").exists());
}

#[test]
fn every_item_gets_exactly_one_outcome() {
    let media = tempdir().unwrap();
    let temp = tempdir().unwrap();
    let names = ["v1.mp4", "i1.jpg", "v2.mov", "i2.png", "v3.mp4"];
    for name in names {
        touch(media.path(), name);
    }

    for batch_size in 1..=7 {
        let out = tempdir().unwrap();
        let mut options = fast_options(vec![media.path().to_path_buf()]);
        options.max_batch_size = batch_size;
        options.output_dir = Some(out.path().to_path_buf());
        let analyzer = FakeAnalyzer::new();
        let result = run(&options, &analyzer, &temp).unwrap();

        let mut originals: Vec<PathBuf> = result.outcomes.iter().map(|o| o.original_path.clone()).collect();
        originals.dedup();
        assert_eq!(originals.len(), names.len(), "batch size {}", batch_size);
        assert_eq!(listing(out.path()).len(), names.len());
        // Copy mode keeps the originals.
        assert_eq!(listing(media.path()).len(), names.len());
    }
}

#[test]
fn missing_input_gets_failed_outcome_and_run_continues() {
    let media = tempdir().unwrap();
    let temp = tempdir().unwrap();
    let present = touch(media.path(), "a.jpg");
    let missing = media.path().join("missing.jpg");

    let options = fast_options(vec![present.clone(), missing.clone()]);
    let analyzer = FakeAnalyzer::new();
    let result = run(&options, &analyzer, &temp).unwrap();

    assert_eq!(result.outcomes.len(), 2);
    assert_eq!(result.outcomes[0].original_path, present);
    assert!(result.outcomes[0].success);
    assert_eq!(result.outcomes[1].original_path, missing);
    assert!(!result.outcomes[1].success);
    assert!(result.outcomes[1].error.as_deref().unwrap().contains("cannot read"));
    assert!(media.path().join("shot-a.jpg").exists());
    assert_eq!(result.stats.failed_files, 1);
}

/// Tools that pass the version check but vanish before probing.
struct VanishingTools;

impl DependencyChecker for VanishingTools {
    fn check_available(&self) -> Result<String> {
        Ok("6.1".to_string())
    }
}

impl FrameExtractor for VanishingTools {
    fn probe(&self, _video: &Path) -> Result<VideoMetadata> {
        Err(EngineError::DependencyUnavailable {
            tool: "ffprobe".to_string(),
            reason: "No such file or directory".to_string(),
        })
    }

    fn extract_frame_at(&self, _video: &Path, _time: f64, _output: &Path) -> Result<()> {
        Ok(())
    }

    fn extract_keyframes(&self, _video: &Path, _dir: &Path, _max: usize) -> Result<()> {
        Ok(())
    }
}

#[test]
fn tool_lost_during_extraction_aborts_run() {
    let media = tempdir().unwrap();
    touch(media.path(), "a.jpg");
    touch(media.path(), "b.mp4");

    let analyzer = FakeAnalyzer::new();
    let services = Services { extractor: &VanishingTools, dependencies: &VanishingTools, analyzer: &analyzer };
    let options = fast_options(vec![media.path().to_path_buf()]);
    let err = process(&options, services, &|_, _, _, _| {}).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::DependencyUnavailable { .. })
    ));
    assert!(analyzer.calls().is_empty());
    assert!(media.path().join("a.jpg").exists());
}

#[test]
fn progress_callback_may_borrow_local_state() {
    let media = tempdir().unwrap();
    let temp = tempdir().unwrap();
    touch(media.path(), "a.jpg");
    touch(media.path(), "b.jpg");

    let stages = Mutex::new(Vec::new());
    let tools = FakeTools { available: true };
    let analyzer = FakeAnalyzer::new();
    let services = Services { extractor: &tools, dependencies: &tools, analyzer: &analyzer };
    let control = ProcessControl::new().with_temp_root(temp.path().to_path_buf());
    let options = fast_options(vec![media.path().to_path_buf()]);
    process_with_control(&options, services, &control, &|stage, current, total, _| {
        stages.lock().unwrap().push((stage.to_string(), current, total));
    })
    .unwrap();

    let stages = stages.into_inner().unwrap();
    assert!(stages.contains(&("extract".to_string(), 1, 2)));
    assert!(stages.contains(&("analyze".to_string(), 0, 1)));
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk(&path));
        } else {
            files.push(path);
        }
    }
    files
}
