use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::media::MediaType;

/// A media file found on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MediaFile {
    pub path: PathBuf,
    pub media_type: MediaType,
}

/// Result of expanding the run's inputs.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Media to process, sorted and de-duplicated
    pub media: Vec<MediaFile>,
    /// Explicit inputs that could not be read, with the reason
    pub unreadable: Vec<(PathBuf, String)>,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|n| n.starts_with('.'))
}

fn scan_dir(dir: &Path, recursive: bool, found: &mut BTreeSet<PathBuf>) {
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 });
    for entry in walker.into_iter().filter_entry(|e| e.depth() == 0 || !is_hidden(e)) {
        match entry {
            // Symlinks are not followed, so a link back up the tree cannot
            // yield the same file twice.
            Ok(entry) if entry.file_type().is_file() => {
                found.insert(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "skipping unreadable entry"),
        }
    }
}

/// Expand files and directories into a sorted, de-duplicated list of media.
///
/// Non-media files are skipped, as are hidden entries and symlinks found
/// while walking a directory. An explicit input that cannot be read does not
/// stop the scan; it is reported in [`ScanReport::unreadable`].
pub fn collect_media(inputs: &[PathBuf], recursive: bool) -> ScanReport {
    let mut candidates = BTreeSet::new();
    let mut unreadable = BTreeMap::new();
    for input in inputs {
        match fs::metadata(input) {
            Ok(meta) if meta.is_dir() => scan_dir(input, recursive, &mut candidates),
            Ok(_) => {
                candidates.insert(input.clone());
            }
            Err(e) => {
                unreadable.insert(input.clone(), format!("cannot read {}: {}", input.display(), e));
            }
        }
    }

    let media: Vec<MediaFile> = candidates
        .into_iter()
        .filter_map(|path| {
            let media_type = MediaType::from_path(&path)?;
            Some(MediaFile { path, media_type })
        })
        .collect();
    debug!(count = media.len(), unreadable = unreadable.len(), "collected media files");
    ScanReport {
        media,
        unreadable: unreadable.into_iter().collect(),
    }
}
