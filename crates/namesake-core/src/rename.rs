use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::EngineError;
use crate::media::{AnalysisResult, MediaItem, RenameOutcome};
use crate::naming::sanitize_stem;

/// Moves (or copies) analysed files to unique, descriptive names.
///
/// Probing and the filesystem operation happen under one lock, so two renames
/// in the same run never pick the same suffix. Paths handed out in this run
/// are remembered, which keeps preview mode collision-free as well.
pub struct RenameExecutor {
    output_dir: Option<PathBuf>,
    preview: bool,
    max_name_len: usize,
    reserved: Mutex<HashSet<PathBuf>>,
}

impl RenameExecutor {
    pub fn new(output_dir: Option<PathBuf>, preview: bool, max_name_len: usize) -> Self {
        Self {
            output_dir,
            preview,
            max_name_len,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    fn source_dir(path: &Path) -> PathBuf {
        path.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    /// Destination directory and whether the file is copied there.
    fn destination(&self, original: &Path) -> (PathBuf, bool) {
        let source_dir = Self::source_dir(original);
        match &self.output_dir {
            Some(out) if !same_dir(out, &source_dir) => (out.clone(), true),
            _ => (source_dir, false),
        }
    }

    pub fn rename(&self, item: &MediaItem, result: AnalysisResult) -> RenameOutcome {
        let original = item.original_path.clone();
        let (dir, copy) = self.destination(&original);
        let stem = sanitize_stem(&result.suggested_name, self.max_name_len);
        let ext = item.extension();

        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        let self_path = (!copy).then_some(original.as_path());
        let target = unique_path(&dir, &stem, ext.as_deref(), self_path, &reserved);

        if self.preview {
            reserved.insert(target.clone());
            debug!(from = %original.display(), to = %target.display(), "preview rename");
            return RenameOutcome::succeeded(result, target);
        }

        let op = if target == original {
            Ok(())
        } else if copy {
            fs::create_dir_all(&dir).and_then(|_| copy_no_clobber(&original, &target))
        } else {
            move_no_clobber(&original, &target)
        };

        match op {
            Ok(()) => {
                reserved.insert(target.clone());
                debug!(from = %original.display(), to = %target.display(), copy, "renamed");
                RenameOutcome::succeeded(result, target)
            }
            Err(e) => {
                let err = EngineError::rename(&original, e);
                warn!(error = %err, "rename failed");
                RenameOutcome::failed(original, err).with_analysis(result)
            }
        }
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    let canon = |p: &Path| {
        let p = if p.as_os_str().is_empty() { Path::new(".") } else { p };
        fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
    };
    canon(a) == canon(b)
}

fn file_name(stem: &str, ext: Option<&str>) -> String {
    match ext {
        Some(ext) if !ext.is_empty() => format!("{}.{}", stem, ext),
        _ => stem.to_string(),
    }
}

/// First free path among `stem.ext`, `stem-1.ext`, `stem-2.ext`, ...
///
/// A path is free when it is neither reserved nor on disk. `self_path` is the
/// file being renamed; landing on it again counts as free.
pub fn unique_path(
    dir: &Path,
    stem: &str,
    ext: Option<&str>,
    self_path: Option<&Path>,
    reserved: &HashSet<PathBuf>,
) -> PathBuf {
    let is_free = |candidate: &Path| {
        if self_path == Some(candidate) {
            return true;
        }
        !reserved.contains(candidate) && fs::symlink_metadata(candidate).is_err()
    };

    let base = dir.join(file_name(stem, ext));
    if is_free(&base) {
        return base;
    }
    let mut counter = 1u32;
    loop {
        let candidate = dir.join(file_name(&format!("{}-{}", stem, counter), ext));
        if is_free(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Move without overwriting: hard link then unlink, or a checked rename when
/// the filesystem has no hard links.
fn move_no_clobber(src: &Path, dest: &Path) -> io::Result<()> {
    match fs::hard_link(src, dest) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(src) {
                let _ = fs::remove_file(dest);
                return Err(e);
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(_) => {
            if fs::symlink_metadata(dest).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} already exists", dest.display()),
                ));
            }
            fs::rename(src, dest)
        }
    }
}

/// Copy into a file that must not exist yet, keeping the source mtime.
fn copy_no_clobber(src: &Path, dest: &Path) -> io::Result<()> {
    let mut input = File::open(src)?;
    let meta = input.metadata()?;
    let mut output = File::options().write(true).create_new(true).open(dest)?;
    if let Err(e) = io::copy(&mut input, &mut output) {
        drop(output);
        let _ = fs::remove_file(dest);
        return Err(e);
    }
    drop(output);
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(dest, mtime).ok();
    Ok(())
}
