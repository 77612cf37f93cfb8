//! Pretrigger buffer: bounded history of frames received while not saving.
//!
//! When a save session starts, the buffered bundles are replayed oldest-first
//! through the normal admission path, so a session can retroactively capture the
//! frames that led up to the trigger.
//!
//! # Eviction
//!
//! Eviction is bundle-granular: after appending, the oldest bundles are dropped
//! while the buffer would still hold at least `capacity` frames without them.
//! In loose mode the buffer may therefore exceed `capacity` by less than one
//! bundle. In strict mode the oldest remaining bundle is then trimmed at frame
//! granularity so the buffer holds at most `capacity` frames.

use daq_core::{AppResult, DaqError, FrameBundle, RESET_INDEX};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Snapshot of the pretrigger buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PretriggerStatus {
    /// Frames currently held
    pub frames: u64,
    /// Frames lost between the held bundles
    pub missed: u64,
    /// Pixel payload held, in bytes
    pub bytes: u64,
    /// Configured capacity in frames
    pub capacity: u64,
}

/// FIFO of bundles bounded by a frame count.
#[derive(Debug, Clone)]
pub struct PretriggerBuffer {
    capacity: usize,
    contents: VecDeque<FrameBundle>,
    current_size: usize,
    strict_size: bool,
    clear_on_reset: bool,
}

impl PretriggerBuffer {
    /// # Errors
    ///
    /// [`DaqError::InvalidCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize, strict_size: bool, clear_on_reset: bool) -> AppResult<Self> {
        if capacity == 0 {
            return Err(DaqError::InvalidCapacity(0));
        }
        Ok(Self {
            capacity,
            contents: VecDeque::new(),
            current_size: 0,
            strict_size,
            clear_on_reset,
        })
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently held.
    pub fn len(&self) -> usize {
        self.current_size
    }

    /// `true` when no frames are held.
    pub fn is_empty(&self) -> bool {
        self.current_size == 0
    }

    /// Change the capacity, evicting immediately if the buffer is now too large.
    pub fn set_capacity(&mut self, capacity: usize) -> AppResult<()> {
        if capacity == 0 {
            return Err(DaqError::InvalidCapacity(0));
        }
        self.capacity = capacity;
        self.evict();
        Ok(())
    }

    /// Append a bundle, evicting the oldest frames beyond capacity.
    ///
    /// A bundle starting at [`RESET_INDEX`] clears the buffer first when
    /// `clear_on_reset` is set.
    pub fn add_frame_bundle(&mut self, bundle: FrameBundle) {
        if bundle.is_empty() {
            return;
        }
        if self.clear_on_reset && bundle.first_index() == Some(RESET_INDEX) {
            self.clear();
        }
        self.current_size += bundle.frame_count();
        self.contents.push_back(bundle);
        self.evict();
    }

    fn evict(&mut self) {
        while let Some(oldest) = self.contents.front() {
            let oldest_frames = oldest.frame_count();
            if self.current_size - oldest_frames < self.capacity {
                break;
            }
            self.current_size -= oldest_frames;
            self.contents.pop_front();
        }

        if self.strict_size && self.current_size > self.capacity {
            if let Some(oldest) = self.contents.front_mut() {
                let excess = self.current_size - self.capacity;
                let keep = oldest.frame_count() - excess;
                oldest.cut_to_size(keep, true);
                self.current_size -= excess;
            }
        }
    }

    /// Remove the oldest bundle.
    pub fn pop_oldest(&mut self) -> Option<FrameBundle> {
        let bundle = self.contents.pop_front()?;
        self.current_size -= bundle.frame_count();
        Some(bundle)
    }

    /// Drop all held bundles.
    pub fn clear(&mut self) {
        self.contents.clear();
        self.current_size = 0;
    }

    /// Cheap copy of the held bundles (pixel data is shared).
    pub fn snapshot(&self) -> Vec<FrameBundle> {
        self.contents.iter().cloned().collect()
    }

    /// Replace the contents with a previous [`snapshot`](Self::snapshot).
    pub fn restore(&mut self, bundles: Vec<FrameBundle>) {
        self.clear();
        for bundle in bundles {
            self.current_size += bundle.frame_count();
            self.contents.push_back(bundle);
        }
        self.evict();
    }

    /// Summary of the held frames.
    pub fn status(&self) -> PretriggerStatus {
        let mut missed = 0;
        let mut last_seen = None;
        for bundle in &self.contents {
            missed += bundle.missing_frames(last_seen);
            last_seen = bundle.last_index().or(last_seen);
        }
        PretriggerStatus {
            frames: self.current_size as u64,
            missed,
            bytes: self.contents.iter().map(|b| b.byte_size() as u64).sum(),
            capacity: self.capacity as u64,
        }
    }
}
