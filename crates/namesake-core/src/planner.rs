use std::path::PathBuf;

use crate::media::MediaItem;

/// Where a batch frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMapping {
    /// Position of the frame within the batch
    pub frame_index: usize,
    /// Index of the owning item in the planned item list
    pub item: usize,
    /// Position of the frame within its item
    pub index_within_item: usize,
}

/// Frames sent together in one analysis call.
///
/// `frames` and `mappings` always have the same length and are index-aligned.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    frames: Vec<PathBuf>,
    mappings: Vec<FrameMapping>,
    estimated_tokens: usize,
}

impl Batch {
    fn push(&mut self, frame: PathBuf, item: usize, index_within_item: usize, tokens: usize) {
        self.mappings.push(FrameMapping {
            frame_index: self.frames.len(),
            item,
            index_within_item,
        });
        self.frames.push(frame);
        self.estimated_tokens = self.estimated_tokens.saturating_add(tokens);
    }

    pub fn frames(&self) -> &[PathBuf] {
        &self.frames
    }

    pub fn mappings(&self) -> &[FrameMapping] {
        &self.mappings
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.estimated_tokens
    }

}

/// Limits applied while packing frames into batches.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    pub max_batch_size: usize,
    pub max_token_budget: usize,
    pub avg_tokens_per_frame: usize,
}

/// Greedily pack every item's frames, in order, into bounded batches.
///
/// A batch closes when it holds `max_batch_size` frames or when one more frame
/// would push the token estimate past `max_token_budget`. A frame is never
/// split and a batch is never empty, so an oversized single frame still gets a
/// batch of its own. An item's frames may straddle several batches.
pub fn plan(items: &[MediaItem], limits: BatchLimits) -> Vec<Batch> {
    let max_size = limits.max_batch_size.max(1);
    let per_frame = limits.avg_tokens_per_frame;

    let mut batches = Vec::new();
    let mut current = Batch::default();

    let stream = items.iter().enumerate().flat_map(|(item_idx, item)| {
        item.frames
            .iter()
            .enumerate()
            .map(move |(within, frame)| (frame, item_idx, within))
    });

    for (frame, item_idx, within) in stream {
        let full = current.len() >= max_size
            || current.estimated_tokens.saturating_add(per_frame) > limits.max_token_budget;
        if full && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
        }
        current.push(frame.clone(), item_idx, within, per_frame);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
