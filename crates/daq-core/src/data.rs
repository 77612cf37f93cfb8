//! Frame bundles: the unit of ingestion for the saving pipeline.
//!
//! A [`FrameBundle`] is produced once per producer callback. It holds one or more
//! frame slabs (each a `(frames, rows, cols)` stack of `u16` pixels), the global
//! frame index of every row of every slab, and a small metadata record.
//!
//! # Storage
//!
//! Slabs are stored as [`FrameStack`] (`ArcArray<u16, Ix3>`). Cloning a bundle is
//! cheap because pixel data is shared; truncation ([`FrameBundle::cut_to_size`])
//! narrows the view without copying. This lets the pretrigger buffer snapshot its
//! contents and the host fan bundles out to several subscribers.
//!
//! # Example
//!
//! ```rust
//! use daq_core::{FrameBundle, FrameStack};
//! use ndarray::Array3;
//!
//! let stack: FrameStack = Array3::<u16>::zeros((4, 8, 8)).into_shared();
//! let mut bundle = FrameBundle::from_stack(stack, 10, 1).unwrap();
//! assert_eq!(bundle.frame_count(), 4);
//! assert_eq!(bundle.missing_frames(Some(7)), 2);
//!
//! assert!(bundle.cut_to_size(3, true));
//! assert_eq!(bundle.first_index(), Some(11));
//! ```

use crate::error::{AppResult, DaqError};
use crate::status_line::StatusLine;
use chrono::{DateTime, Utc};
use ndarray::{s, Array3, ArcArray, ArrayView2, Axis, Ix3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A leading-axis stack of same-shaped 2D frames.
pub type FrameStack = ArcArray<u16, Ix3>;

/// Frame index a producer reports after an acquisition restart.
pub const RESET_INDEX: u64 = 0;

/// Metadata attached to a bundle by its producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMeta {
    /// When the producer created the bundle
    pub created: DateTime<Utc>,
    /// Producer tag (e.g. camera name)
    pub source: Option<String>,
    /// Nominal frame rate in Hz, if the producer knows it
    pub rate_hint: Option<f64>,
    /// Free-form producer fields
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Default for BundleMeta {
    fn default() -> Self {
        Self {
            created: Utc::now(),
            source: None,
            rate_hint: None,
            extra: BTreeMap::new(),
        }
    }
}

impl BundleMeta {
    /// Metadata tagged with a source name.
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Default::default()
        }
    }
}

/// A single frame borrowed out of a bundle, paired with its global index.
#[derive(Debug, Clone)]
pub struct FrameView<'a> {
    /// Global frame index
    pub index: u64,
    /// Pixel data
    pub frame: ArrayView2<'a, u16>,
}

/// One ingestion event: frame slabs, their indices and metadata.
#[derive(Debug, Clone)]
pub struct FrameBundle {
    slabs: Vec<FrameStack>,
    indices: Vec<Vec<u64>>,
    meta: BundleMeta,
    step: u64,
    status_line: Option<StatusLine>,
}

impl FrameBundle {
    /// Build a bundle from slabs and their per-row indices.
    ///
    /// # Errors
    ///
    /// Returns [`DaqError::InvalidBundle`] if the number of slabs and index
    /// sequences differ, if any slab's row count differs from its index count,
    /// or if `step` is zero.
    pub fn new(slabs: Vec<FrameStack>, indices: Vec<Vec<u64>>, step: u64) -> AppResult<Self> {
        if slabs.len() != indices.len() {
            return Err(DaqError::InvalidBundle(format!(
                "{} frame slabs but {} index sequences",
                slabs.len(),
                indices.len()
            )));
        }
        for (i, (slab, idx)) in slabs.iter().zip(&indices).enumerate() {
            let rows = slab.len_of(Axis(0));
            if rows != idx.len() {
                return Err(DaqError::InvalidBundle(format!(
                    "slab {} holds {} frames but has {} indices",
                    i,
                    rows,
                    idx.len()
                )));
            }
        }
        if step == 0 {
            return Err(DaqError::InvalidBundle("index step must be positive".into()));
        }

        Ok(Self {
            slabs,
            indices,
            meta: BundleMeta::default(),
            step,
            status_line: None,
        })
    }

    /// Build a single-slab bundle whose indices start at `first_index` and advance by `step`.
    pub fn from_stack(stack: FrameStack, first_index: u64, step: u64) -> AppResult<Self> {
        let n = stack.len_of(Axis(0)) as u64;
        let indices = (0..n).map(|i| first_index + i * step).collect();
        Self::new(vec![stack], vec![indices], step)
    }

    /// Attach producer metadata.
    pub fn with_meta(mut self, meta: BundleMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Attach a status-line descriptor.
    pub fn with_status_line(mut self, status_line: StatusLine) -> Self {
        self.status_line = Some(status_line);
        self
    }

    /// Frame slabs in acquisition order.
    pub fn slabs(&self) -> &[FrameStack] {
        &self.slabs
    }

    /// Global frame indices, one vector per slab.
    pub fn indices(&self) -> &[Vec<u64>] {
        &self.indices
    }

    /// Bundle metadata.
    pub fn meta(&self) -> &BundleMeta {
        &self.meta
    }

    /// Expected increment between consecutive frame indices.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Status-line descriptor, if the camera embeds one.
    pub fn status_line(&self) -> Option<&StatusLine> {
        self.status_line.as_ref()
    }

    /// Total number of frames across all slabs.
    pub fn frame_count(&self) -> usize {
        self.indices.iter().map(Vec::len).sum()
    }

    /// `true` when no slab holds a frame.
    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Total pixel payload in bytes.
    pub fn byte_size(&self) -> usize {
        self.slabs
            .iter()
            .map(|slab| slab.len() * std::mem::size_of::<u16>())
            .sum()
    }

    /// `(rows, cols)` of the frames in the first non-empty slab.
    pub fn frame_shape(&self) -> Option<(usize, usize)> {
        self.slabs
            .iter()
            .find(|slab| slab.len_of(Axis(0)) > 0)
            .map(|slab| {
                let (_, rows, cols) = slab.dim();
                (rows, cols)
            })
    }

    /// Index of the first frame in the bundle.
    pub fn first_index(&self) -> Option<u64> {
        self.indices.iter().find_map(|idx| idx.first().copied())
    }

    /// Index of the last frame in the bundle.
    pub fn last_index(&self) -> Option<u64> {
        self.indices.iter().rev().find_map(|idx| idx.last().copied())
    }

    /// Number of frames lost before and between the slabs of this bundle.
    ///
    /// For each index run, `first - last_seen - step` (clamped at zero) is added,
    /// where `last_seen` starts at the argument and then follows each slab's last
    /// index. A bundle starting at [`RESET_INDEX`] is a restart, so the supplied
    /// `last_seen` is ignored for its first comparison.
    pub fn missing_frames(&self, last_seen: Option<u64>) -> u64 {
        let mut last = if self.first_index() == Some(RESET_INDEX) {
            None
        } else {
            last_seen
        };
        let mut missing = 0;
        for idx in &self.indices {
            let (Some(&first), Some(&tail)) = (idx.first(), idx.last()) else {
                continue;
            };
            if let Some(prev) = last {
                missing += first.saturating_sub(prev.saturating_add(self.step));
            }
            last = Some(tail);
        }
        missing
    }

    /// Trim the bundle to at most `n` frames, keeping the first `n` or, with
    /// `from_end`, the last `n`.
    ///
    /// Returns whether the bundle now holds exactly `n` frames.
    pub fn cut_to_size(&mut self, n: usize, from_end: bool) -> bool {
        if self.frame_count() > n {
            if from_end {
                self.keep_back(n);
            } else {
                self.keep_front(n);
            }
        }
        self.frame_count() == n
    }

    fn keep_front(&mut self, n: usize) {
        let mut remaining = n;
        for (slab, idx) in self.slabs.iter_mut().zip(self.indices.iter_mut()) {
            let rows = idx.len();
            if rows > remaining {
                slab.slice_collapse(s![..remaining, .., ..]);
                idx.truncate(remaining);
            }
            remaining -= idx.len();
        }
        self.drop_empty_slabs();
    }

    fn keep_back(&mut self, n: usize) {
        let mut remaining = n;
        for (slab, idx) in self.slabs.iter_mut().zip(self.indices.iter_mut()).rev() {
            let rows = idx.len();
            if rows > remaining {
                let skip = rows - remaining;
                slab.slice_collapse(s![skip.., .., ..]);
                idx.drain(..skip);
            }
            remaining -= idx.len();
        }
        self.drop_empty_slabs();
    }

    fn drop_empty_slabs(&mut self) {
        let mut kept_slabs = Vec::with_capacity(self.slabs.len());
        let mut kept_indices = Vec::with_capacity(self.indices.len());
        for (slab, idx) in self.slabs.drain(..).zip(self.indices.drain(..)) {
            if !idx.is_empty() {
                kept_slabs.push(slab);
                kept_indices.push(idx);
            }
        }
        self.slabs = kept_slabs;
        self.indices = kept_indices;
    }

    /// Borrow up to `n` frames from the front (or the back) with their indices.
    ///
    /// Frames are returned in index order either way. The views borrow the
    /// bundle, so it cannot be truncated while they are alive.
    pub fn extract_frames(&self, n: usize, from_end: bool) -> Vec<FrameView<'_>> {
        let all = self
            .slabs
            .iter()
            .zip(&self.indices)
            .flat_map(|(slab, idx)| {
                slab.axis_iter(Axis(0))
                    .zip(idx.iter())
                    .map(|(frame, &index)| FrameView { index, frame })
            });
        if from_end {
            let total = self.frame_count();
            all.skip(total.saturating_sub(n)).collect()
        } else {
            all.take(n).collect()
        }
    }

    /// Copy up to `n` frames into a fresh stack, returning their indices alongside.
    ///
    /// Returns `None` when the bundle is empty or its slabs have differing frame shapes.
    pub fn extract_frames_owned(&self, n: usize, from_end: bool) -> Option<(Vec<u64>, Array3<u16>)> {
        let views = self.extract_frames(n, from_end);
        let (rows, cols) = views.first().map(|v| v.frame.dim())?;
        if views.iter().any(|v| v.frame.dim() != (rows, cols)) {
            return None;
        }
        let mut out = Array3::<u16>::zeros((views.len(), rows, cols));
        for (mut dst, view) in out.axis_iter_mut(Axis(0)).zip(&views) {
            dst.assign(&view.frame);
        }
        Some((views.iter().map(|v| v.index).collect(), out))
    }
}
