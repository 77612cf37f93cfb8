//! Mock frame source for demos and tests.
//!
//! Produces [`FrameBundle`]s of synthetic `u16` frames at a configurable rate.
//! Every frame carries a 32-bit hardware-style counter in the first two pixels
//! of its last row, described by a [`StatusLine`] on the bundle. Frames can be
//! dropped at random; a dropped frame skips both its index and its counter, the
//! way a real camera losing frames would.
//!
//! # Example
//!
//! ```no_run
//! use daq_saver::mock_source::MockFrameSource;
//! use tokio::sync::broadcast;
//!
//! # async fn example() {
//! let (tx, _rx) = broadcast::channel(64);
//! let source = MockFrameSource::builder()
//!     .frame_size(64, 48)
//!     .frames_per_bundle(4)
//!     .rate_hz(200.0)
//!     .total_frames(1000)
//!     .build();
//! let emitted = source.run(tx).await;
//! # }
//! ```

use daq_core::{BundleMeta, FrameBundle, StatusLine, StatusLineKind, StatusRect};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Builder for [`MockFrameSource`]
#[derive(Debug, Clone)]
pub struct MockFrameSourceBuilder {
    width: usize,
    height: usize,
    frames_per_bundle: usize,
    rate_hz: f64,
    drop_probability: f64,
    total_frames: Option<u64>,
    seed: Option<u64>,
}

impl Default for MockFrameSourceBuilder {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            frames_per_bundle: 4,
            rate_hz: 100.0,
            drop_probability: 0.0,
            total_frames: None,
            seed: None,
        }
    }
}

impl MockFrameSourceBuilder {
    /// Frame width and height in pixels (height includes the status row)
    pub fn frame_size(mut self, width: usize, height: usize) -> Self {
        self.width = width.max(2);
        self.height = height.max(2);
        self
    }

    /// Frames delivered per bundle (at least one)
    pub fn frames_per_bundle(mut self, frames: usize) -> Self {
        self.frames_per_bundle = frames.max(1);
        self
    }

    /// Frame rate in frames per second
    pub fn rate_hz(mut self, rate: f64) -> Self {
        self.rate_hz = rate;
        self
    }

    /// Probability in `[0, 1]` that a frame is lost before delivery
    pub fn drop_probability(mut self, probability: f64) -> Self {
        self.drop_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Stop after this many frame indices have been generated
    pub fn total_frames(mut self, frames: u64) -> Self {
        self.total_frames = Some(frames);
        self
    }

    /// Seed for reproducible drops and noise
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Seeds the RNG; numbering starts at frame 1.
    pub fn build(self) -> MockFrameSource {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        MockFrameSource {
            config: self,
            rng,
            next_index: 1,
        }
    }
}

/// Synthetic camera producing frame bundles.
pub struct MockFrameSource {
    config: MockFrameSourceBuilder,
    rng: StdRng,
    next_index: u64,
}

impl MockFrameSource {
    /// Builder with defaults: 64x48 frames, 4 per bundle, 100 Hz.
    pub fn builder() -> MockFrameSourceBuilder {
        MockFrameSourceBuilder::default()
    }

    /// Descriptor of the embedded counter.
    pub fn status_line() -> StatusLine {
        StatusLine::new(StatusLineKind::Word32, StatusRect::last_row())
    }

    fn exhausted(&self) -> bool {
        self.config
            .total_frames
            .is_some_and(|total| self.next_index > total)
    }

    /// Generate the next bundle. `None` once `total_frames` indices were used.
    ///
    /// A bundle whose frames were all dropped is skipped, so the returned
    /// bundle is never empty.
    pub fn next_bundle(&mut self) -> Option<FrameBundle> {
        loop {
            if self.exhausted() {
                return None;
            }
            let mut indices = Vec::with_capacity(self.config.frames_per_bundle);
            while indices.len() < self.config.frames_per_bundle && !self.exhausted() {
                let index = self.next_index;
                self.next_index += 1;
                if !self.rng.gen_bool(self.config.drop_probability) {
                    indices.push(index);
                }
            }
            if indices.is_empty() {
                continue;
            }
            return self.render(indices);
        }
    }

    fn render(&mut self, indices: Vec<u64>) -> Option<FrameBundle> {
        let (rows, cols) = (self.config.height, self.config.width);
        let mut stack = Array3::<u16>::zeros((indices.len(), rows, cols));
        for (f, &index) in indices.iter().enumerate() {
            for r in 0..rows - 1 {
                for c in 0..cols {
                    let base = ((r + c) as u64 + index) as u16;
                    stack[[f, r, c]] = base.wrapping_add(self.rng.gen_range(0..64));
                }
            }
            let counter = index as u32;
            stack[[f, rows - 1, 0]] = (counter & 0xFFFF) as u16;
            stack[[f, rows - 1, 1]] = (counter >> 16) as u16;
        }

        let meta = BundleMeta {
            rate_hint: Some(self.config.rate_hz),
            ..BundleMeta::from_source("mock")
        };
        // Dropped frames split the bundle into contiguous index runs, one slab each
        let mut slabs = Vec::new();
        let mut runs: Vec<Vec<u64>> = Vec::new();
        let mut start = 0;
        for end in 1..=indices.len() {
            if end == indices.len() || indices[end] != indices[end - 1] + 1 {
                slabs.push(
                    stack
                        .slice(ndarray::s![start..end, .., ..])
                        .to_owned()
                        .into_shared(),
                );
                runs.push(indices[start..end].to_vec());
                start = end;
            }
        }
        FrameBundle::new(slabs, runs, 1)
            .ok()
            .map(|bundle| bundle.with_meta(meta).with_status_line(Self::status_line()))
    }

    /// Publish bundles at the configured rate until exhausted or every
    /// subscriber is gone. Returns the number of frames sent.
    pub async fn run(mut self, tx: broadcast::Sender<FrameBundle>) -> u64 {
        let bundle_period = if self.config.rate_hz > 0.0 {
            Duration::from_secs_f64(self.config.frames_per_bundle as f64 / self.config.rate_hz)
        } else {
            Duration::from_millis(10)
        };
        let mut ticker = tokio::time::interval(bundle_period);
        let mut sent = 0u64;

        info!(
            rate_hz = self.config.rate_hz,
            frames_per_bundle = self.config.frames_per_bundle,
            "Mock frame source started"
        );
        while let Some(bundle) = self.next_bundle() {
            ticker.tick().await;
            let frames = bundle.frame_count() as u64;
            if tx.send(bundle).is_err() {
                debug!("No frame subscribers left");
                break;
            }
            sent += frames;
        }
        info!(frames = sent, "Mock frame source finished");
        sent
    }
}
