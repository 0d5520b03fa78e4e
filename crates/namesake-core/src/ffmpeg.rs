use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{LazyLock, OnceLock};

use regex::Regex;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::frames::{DependencyChecker, FrameExtractor};
use crate::media::VideoMetadata;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"version\s+n?([0-9][\w.\-+~]*)").unwrap());

/// `ffmpeg`/`ffprobe` subprocess backend.
pub struct FfmpegTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    available: OnceLock<std::result::Result<String, (String, String)>>,
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegTool {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            available: OnceLock::new(),
        }
    }

    fn tool_version(program: &Path) -> std::result::Result<String, String> {
        let output = Command::new(program)
            .arg("-version")
            .output()
            .map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(format!("exited with {}", output.status));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        parse_version(&text).ok_or_else(|| "unrecognised version output".to_string())
    }
}

/// Pull the version token from `-version` output.
pub fn parse_version(text: &str) -> Option<String> {
    let first = text.lines().next()?;
    VERSION_RE.captures(first).map(|c| c[1].to_string())
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    format!("{} ({})", output.status, last.trim())
}

/// Parse `r_frame_rate` style values such as `30000/1001`.
fn parse_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => rate.parse().ok(),
    }
}

/// Read video metadata out of `ffprobe -print_format json` output.
pub fn parse_probe_json(json: &serde_json::Value) -> Option<VideoMetadata> {
    let streams = json.get("streams")?.as_array()?;
    let video = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some("video"))?;

    let duration = json
        .get("format")
        .and_then(|f| f.get("duration"))
        .or_else(|| video.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    let fps = ["avg_frame_rate", "r_frame_rate"]
        .iter()
        .filter_map(|key| video.get(*key).and_then(|v| v.as_str()).and_then(parse_rate))
        .find(|f| *f > 0.0)
        .unwrap_or(0.0);

    Some(VideoMetadata {
        duration,
        width: video.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32,
        height: video.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32,
        fps,
    })
}

impl DependencyChecker for FfmpegTool {
    fn check_available(&self) -> Result<String> {
        let cached = self.available.get_or_init(|| {
            let version = Self::tool_version(&self.ffmpeg)
                .map_err(|e| (self.ffmpeg.display().to_string(), e))?;
            Self::tool_version(&self.ffprobe).map_err(|e| (self.ffprobe.display().to_string(), e))?;
            info!(%version, "found ffmpeg");
            Ok(version)
        });
        cached.clone().map_err(|(tool, reason)| EngineError::DependencyUnavailable { tool, reason })
    }
}

/// A binary that cannot be spawned at all is a dependency failure, not a
/// per-video one.
fn spawn_error(tool: &Path, err: io::Error, per_video: impl FnOnce(io::Error) -> EngineError) -> EngineError {
    if err.kind() == io::ErrorKind::NotFound {
        EngineError::DependencyUnavailable {
            tool: tool.display().to_string(),
            reason: err.to_string(),
        }
    } else {
        per_video(err)
    }
}

impl FrameExtractor for FfmpegTool {
    fn probe(&self, video: &Path) -> Result<VideoMetadata> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(video)
            .output()
            .map_err(|e| spawn_error(&self.ffprobe, e, |e| EngineError::probe(video, e)))?;
        if !output.status.success() {
            return Err(EngineError::probe(video, stderr_tail(&output)));
        }
        let json: serde_json::Value =
            serde_json::from_slice(&output.stdout).map_err(|e| EngineError::probe(video, e))?;
        parse_probe_json(&json).ok_or_else(|| EngineError::probe(video, "no video stream"))
    }

    fn extract_frame_at(&self, video: &Path, time: f64, output: &Path) -> Result<()> {
        debug!(video = %video.display(), time, "extracting frame");
        let result = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-ss"])
            .arg(format!("{:.3}", time))
            .arg("-i")
            .arg(video)
            .args(["-frames:v", "1", "-q:v", "2"])
            .arg(output)
            .output()
            .map_err(|e| spawn_error(&self.ffmpeg, e, |e| EngineError::extraction(video, e)))?;
        if !result.status.success() {
            return Err(EngineError::extraction(video, stderr_tail(&result)));
        }
        if !output.exists() {
            return Err(EngineError::extraction(video, "ffmpeg produced no frame"));
        }
        Ok(())
    }

    fn extract_keyframes(&self, video: &Path, output_dir: &Path, max_frames: usize) -> Result<()> {
        let result = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-skip_frame", "nokey", "-i"])
            .arg(video)
            .args(["-vf", "select='eq(pict_type,I)'", "-vsync", "vfr", "-q:v", "2"])
            .arg("-frames:v")
            .arg(max_frames.max(1).to_string())
            .arg(output_dir.join("key-%04d.jpg"))
            .output()
            .map_err(|e| spawn_error(&self.ffmpeg, e, |e| EngineError::extraction(video, e)))?;
        if !result.status.success() {
            return Err(EngineError::extraction(video, stderr_tail(&result)));
        }
        Ok(())
    }
}
