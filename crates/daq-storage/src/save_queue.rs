//! Time-windowed save queue.
//!
//! Admitted bundles are grouped into chunks: a chunk collects every bundle that
//! arrives within `chunk_period` of the chunk's first arrival. The periodic dump
//! job pops whole chunks, oldest first, so disk writes happen in batches.
//!
//! The queue keeps its own byte and frame accounting; both always equal the
//! literal sums over the queued bundles.

use daq_core::FrameBundle;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bundles that arrived within one chunk window.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Arrival time of the first bundle
    pub started: Instant,
    /// Bundles in arrival order
    pub bundles: Vec<FrameBundle>,
    /// Pixel bytes
    pub bytes: usize,
    /// Frame count
    pub frames: usize,
}

impl Chunk {
    fn new(started: Instant) -> Self {
        Self {
            started,
            bundles: Vec::new(),
            bytes: 0,
            frames: 0,
        }
    }

    fn push(&mut self, bundle: FrameBundle) {
        self.bytes += bundle.byte_size();
        self.frames += bundle.frame_count();
        self.bundles.push(bundle);
    }

    /// `true` when the chunk holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }
}

/// Chunks awaiting the writer, oldest first.
#[derive(Debug)]
pub struct SaveQueue {
    chunks: VecDeque<Chunk>,
    chunk_period: Duration,
    queue_ram: usize,
    frames: usize,
}

impl SaveQueue {
    /// Empty queue opening a new chunk every `chunk_period`.
    pub fn new(chunk_period: Duration) -> Self {
        Self {
            chunks: VecDeque::new(),
            chunk_period,
            queue_ram: 0,
            frames: 0,
        }
    }

    /// Append a bundle that arrived at `now`, opening a new chunk when the
    /// current one started more than `chunk_period` ago.
    pub fn push(&mut self, bundle: FrameBundle, now: Instant) {
        let needs_new_chunk = match self.chunks.back() {
            Some(chunk) => now.saturating_duration_since(chunk.started) > self.chunk_period,
            None => true,
        };
        if needs_new_chunk {
            self.chunks.push_back(Chunk::new(now));
        }
        self.queue_ram += bundle.byte_size();
        self.frames += bundle.frame_count();
        if let Some(chunk) = self.chunks.back_mut() {
            chunk.push(bundle);
        }
    }

    /// Remove the oldest chunk.
    pub fn pop_chunk(&mut self) -> Option<Chunk> {
        let chunk = self.chunks.pop_front()?;
        self.queue_ram -= chunk.bytes;
        self.frames -= chunk.frames;
        Some(chunk)
    }

    /// Drop everything queued.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.queue_ram = 0;
        self.frames = 0;
    }

    /// Bytes of pixel data currently queued.
    pub fn queue_ram(&self) -> usize {
        self.queue_ram
    }

    /// Frames currently queued.
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Chunks currently queued.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// `true` when no chunk is queued.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
