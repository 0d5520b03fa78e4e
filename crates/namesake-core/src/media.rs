use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    /// Classify a path by its guessed MIME type. Returns None for non-media.
    pub fn from_path(path: &Path) -> Option<Self> {
        let mime = mime_guess::from_path(path).first()?;
        if mime.type_() == mime_guess::mime::IMAGE {
            Some(Self::Image)
        } else if mime.type_() == mime_guess::mime::VIDEO {
            Some(Self::Video)
        } else {
            None
        }
    }
}

/// Probed properties of a video stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Duration in seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// One input file together with the frames that represent it.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub original_path: PathBuf,
    /// Ordered frame images. `[original_path]` for images, extracted
    /// temporaries for videos.
    pub frames: Vec<PathBuf>,
    pub media_type: MediaType,
    /// Present for videos once probed
    pub metadata: Option<VideoMetadata>,
}

impl MediaItem {
    /// An image is its own single frame.
    pub fn image(path: PathBuf) -> Self {
        Self {
            frames: vec![path.clone()],
            original_path: path,
            media_type: MediaType::Image,
            metadata: None,
        }
    }

    pub fn video(path: PathBuf, frames: Vec<PathBuf>, metadata: VideoMetadata) -> Self {
        Self {
            original_path: path,
            frames,
            media_type: MediaType::Video,
            metadata: Some(metadata),
        }
    }

    /// Lowercased extension of the original file, if any.
    pub fn extension(&self) -> Option<String> {
        self.original_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }
}

/// The resolved analysis for one media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub original_path: PathBuf,
    pub suggested_name: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Suggested file name including extension, before uniqueness probing
    pub filename: String,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisResult {
    /// Build a result from a single frame description.
    pub fn from_description(item: &MediaItem, description: &str) -> Self {
        let suggested_name = crate::naming::suggest_name(description);
        let filename = match item.extension() {
            Some(ext) => format!("{}.{}", suggested_name, ext),
            None => suggested_name.clone(),
        };
        Self {
            original_path: item.original_path.clone(),
            tags: crate::naming::extract_tags(description),
            description: description.to_string(),
            suggested_name,
            filename,
            timestamp: Utc::now(),
        }
    }
}

/// Final record for one input file. Exactly one per item per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameOutcome {
    pub original_path: PathBuf,
    pub new_path: Option<PathBuf>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<AnalysisResult>,
    /// Set when the description came from a padded, truncated or
    /// placeholder reconciliation.
    #[serde(default)]
    pub degraded: bool,
}

impl RenameOutcome {
    pub fn succeeded(result: AnalysisResult, new_path: PathBuf) -> Self {
        Self {
            original_path: result.original_path.clone(),
            new_path: Some(new_path),
            success: true,
            error: None,
            analysis_result: Some(result),
            degraded: false,
        }
    }

    pub fn failed(original_path: PathBuf, error: impl ToString) -> Self {
        Self {
            original_path,
            new_path: None,
            success: false,
            error: Some(error.to_string()),
            analysis_result: None,
            degraded: false,
        }
    }

    pub fn with_analysis(mut self, result: AnalysisResult) -> Self {
        self.analysis_result = Some(result);
        self
    }

    pub fn with_degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }
}
