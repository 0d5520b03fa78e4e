use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::media::{AnalysisResult, MediaItem};
use crate::planner::Batch;

/// An item that received its description in the current batch.
#[derive(Debug, Clone)]
pub struct ResolvedItem {
    pub item: usize,
    pub result: AnalysisResult,
    /// Every description this batch produced for the item, in frame order
    pub frame_descriptions: Vec<String>,
    pub degraded: bool,
}

/// Folds per-frame descriptions back onto their owning items.
///
/// Tracks which files already have an outcome so an item whose frames
/// straddle several batches is resolved once, from the first description
/// seen. Completion is only recorded through [`ResultMapper::mark_completed`],
/// after the rename attempt for the item has finished.
#[derive(Debug)]
pub struct ResultMapper {
    completed: HashSet<PathBuf>,
    /// Frames per item not yet covered by a processed batch
    remaining: Vec<usize>,
}

impl ResultMapper {
    pub fn new(items: &[MediaItem]) -> Self {
        Self {
            completed: HashSet::new(),
            remaining: items.iter().map(|i| i.frames.len()).collect(),
        }
    }

    pub fn is_completed(&self, path: &Path) -> bool {
        self.completed.contains(path)
    }

    pub fn mark_completed(&mut self, path: &Path) {
        self.completed.insert(path.to_path_buf());
    }

    /// First-frame-wins results for the not yet completed items in `batch`.
    pub fn map(
        &self,
        items: &[MediaItem],
        batch: &Batch,
        descriptions: &[String],
        degraded: bool,
    ) -> Vec<ResolvedItem> {
        debug_assert_eq!(batch.len(), descriptions.len());
        let mut resolved: Vec<ResolvedItem> = Vec::new();

        for (mapping, description) in batch.mappings().iter().zip(descriptions) {
            let item = &items[mapping.item];
            if self.is_completed(&item.original_path) {
                continue;
            }
            match resolved.iter_mut().find(|r| r.item == mapping.item) {
                Some(existing) => existing.frame_descriptions.push(description.clone()),
                None => resolved.push(ResolvedItem {
                    item: mapping.item,
                    result: AnalysisResult::from_description(item, description),
                    frame_descriptions: vec![description.clone()],
                    degraded,
                }),
            }
        }
        resolved
    }

    /// Count the batch's frames as consumed. Returns the items whose last
    /// frame was in this batch, in first-appearance order.
    pub fn consume(&mut self, batch: &Batch) -> Vec<usize> {
        let mut exhausted = Vec::new();
        for m in batch.mappings() {
            let left = &mut self.remaining[m.item];
            *left = left.saturating_sub(1);
            if *left == 0 && !exhausted.contains(&m.item) {
                exhausted.push(m.item);
            }
        }
        exhausted
    }

    /// Items that have no outcome yet.
    pub fn unresolved(&self, items: &[MediaItem]) -> Vec<usize> {
        items
            .iter()
            .enumerate()
            .filter(|(_, item)| !self.is_completed(&item.original_path))
            .map(|(i, _)| i)
            .collect()
    }
}
