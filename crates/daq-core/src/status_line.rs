//! Status-line codec.
//!
//! Some cameras embed a per-frame hardware counter into a fixed rectangle of every
//! frame (usually the last row). The functions here locate that rectangle, read
//! the counter, and remove or re-insert the region. All operations are pure: they
//! take a frame stack view and return new data.
//!
//! Rectangles are given as inclusive `(row_start, row_end, col_start, col_end)`;
//! negative values count from the far edge, so the last row is `(-1, -1, 0, -1)`.
//! A single 2D frame can be treated as a one-frame stack with
//! `frame.insert_axis(Axis(0))`.

use crate::error::{AppResult, DaqError};
use ndarray::{s, Array3, ArrayView3, ArrayViewMut3, Axis};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// How the counter is encoded in the region's pixels (read in row-major order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLineKind {
    /// 16-bit counter in the first pixel
    Word16,
    /// 32-bit counter in the first two pixels, low word first
    Word32,
    /// 32-bit counter in the low bytes of the first four pixels, little endian
    Bytes32,
}

impl StatusLineKind {
    /// Counter width in bits. Differences are taken modulo this width.
    pub fn counter_bits(&self) -> u32 {
        match self {
            StatusLineKind::Word16 => 16,
            StatusLineKind::Word32 | StatusLineKind::Bytes32 => 32,
        }
    }

    fn pixels_needed(&self) -> usize {
        match self {
            StatusLineKind::Word16 => 1,
            StatusLineKind::Word32 => 2,
            StatusLineKind::Bytes32 => 4,
        }
    }

    /// Decode the counter from the region's leading pixels.
    pub fn decode(&self, pixels: &[u16]) -> Option<u64> {
        if pixels.len() < self.pixels_needed() {
            return None;
        }
        let value = match self {
            StatusLineKind::Word16 => u64::from(pixels[0]),
            StatusLineKind::Word32 => u64::from(pixels[0]) | (u64::from(pixels[1]) << 16),
            StatusLineKind::Bytes32 => pixels[..4]
                .iter()
                .enumerate()
                .fold(0u64, |acc, (i, &p)| acc | (u64::from(p & 0xFF) << (8 * i))),
        };
        Some(value)
    }
}

/// Inclusive rectangle with edge-relative negative coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRect {
    /// First row; negative counts from the bottom edge
    pub row_start: i64,
    /// Last row, inclusive
    pub row_end: i64,
    /// First column; negative counts from the right edge
    pub col_start: i64,
    /// Last column, inclusive
    pub col_end: i64,
}

/// A rectangle resolved against a concrete frame shape (half-open ranges).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Row range
    pub rows: Range<usize>,
    /// Column range
    pub cols: Range<usize>,
}

impl StatusRect {
    /// Rectangle from inclusive, possibly negative, bounds.
    pub fn new(row_start: i64, row_end: i64, col_start: i64, col_end: i64) -> Self {
        Self {
            row_start,
            row_end,
            col_start,
            col_end,
        }
    }

    /// The full last row of the frame.
    pub fn last_row() -> Self {
        Self::new(-1, -1, 0, -1)
    }

    /// Resolve against a `(rows, cols)` frame. `None` if the rectangle is empty
    /// or falls outside the frame.
    pub fn resolve(&self, rows: usize, cols: usize) -> Option<Region> {
        let rows_range = resolve_span(self.row_start, self.row_end, rows)?;
        let cols_range = resolve_span(self.col_start, self.col_end, cols)?;
        Some(Region {
            rows: rows_range,
            cols: cols_range,
        })
    }
}

fn resolve_span(start: i64, end: i64, len: usize) -> Option<Range<usize>> {
    let len_i = i64::try_from(len).ok()?;
    let norm = |v: i64| if v < 0 { v + len_i } else { v };
    let (start, end) = (norm(start), norm(end));
    if start < 0 || end < start || end >= len_i {
        return None;
    }
    Some(start as usize..(end as usize + 1))
}

/// Replacement policy for [`StatusLine::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovePolicy {
    /// Copy the adjacent row (or column) over the region
    Duplicate,
    /// Fill with a constant
    Value(u16),
    /// Fill with the median of the rest of the frame
    Median,
    /// Physically drop the rows (or columns) if the region touches a frame edge
    Cut,
}

/// Descriptor naming an embedded hardware counter region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
    /// Counter encoding
    pub kind: StatusLineKind,
    /// Where the counter sits in each frame
    pub rect: StatusRect,
}

impl StatusLine {
    /// Descriptor for a counter of `kind` inside `rect`.
    pub fn new(kind: StatusLineKind, rect: StatusRect) -> Self {
        Self { kind, rect }
    }

    /// Resolve the rectangle against the frame shape of `stack`.
    pub fn locate(&self, stack: &ArrayView3<'_, u16>) -> Option<Region> {
        let (_, rows, cols) = stack.dim();
        self.rect.resolve(rows, cols)
    }

    /// View of the region in every frame, `(frames, region_rows, region_cols)`.
    pub fn extract<'a>(&self, stack: &ArrayView3<'a, u16>) -> Option<ArrayView3<'a, u16>> {
        let region = self.locate(stack)?;
        Some(
            stack
                .clone()
                .slice_move(s![.., region.rows, region.cols]),
        )
    }

    /// Decoded counter value of every frame in the stack.
    ///
    /// `None` if the region does not fit the frame or holds too few pixels for
    /// the counter encoding.
    pub fn counters(&self, stack: &ArrayView3<'_, u16>) -> Option<Vec<u64>> {
        let region = self.extract(stack)?;
        region
            .axis_iter(Axis(0))
            .map(|frame| {
                let pixels: Vec<u16> = frame.iter().take(4).copied().collect();
                self.kind.decode(&pixels)
            })
            .collect()
    }

    /// Copy of the stack with the region replaced according to `policy`.
    ///
    /// If the rectangle does not fit the frame, or `Cut` is requested for a region
    /// that touches no frame edge, the stack is returned unchanged.
    pub fn remove(&self, stack: &ArrayView3<'_, u16>, policy: RemovePolicy) -> Array3<u16> {
        let Some(region) = self.locate(stack) else {
            return stack.to_owned();
        };
        let (_, rows, cols) = stack.dim();
        match policy {
            RemovePolicy::Cut => cut_region(stack, &region, rows, cols),
            RemovePolicy::Value(value) => {
                let mut out = stack.to_owned();
                out.slice_mut(s![.., region.rows.clone(), region.cols.clone()])
                    .fill(value);
                out
            }
            RemovePolicy::Duplicate => {
                let mut out = stack.to_owned();
                duplicate_adjacent(&mut out.view_mut(), &region, rows, cols);
                out
            }
            RemovePolicy::Median => {
                let mut out = stack.to_owned();
                for mut frame in out.axis_iter_mut(Axis(0)) {
                    let outside: Vec<u16> = frame
                        .indexed_iter()
                        .filter(|((r, c), _)| !(region.rows.contains(r) && region.cols.contains(c)))
                        .map(|(_, &v)| v)
                        .collect();
                    if let Some(median) = median(outside) {
                        frame
                            .slice_mut(s![region.rows.clone(), region.cols.clone()])
                            .fill(median);
                    }
                }
                out
            }
        }
    }

    /// Copy of the stack with `value` written into the region.
    ///
    /// `value` is broadcast to `(frames, region_rows, region_cols)`, so a single
    /// `(1, region_rows, region_cols)` block fills every frame.
    ///
    /// # Errors
    ///
    /// [`DaqError::Configuration`] if the rectangle does not fit the frame or the
    /// value block cannot be broadcast onto the region.
    pub fn insert(
        &self,
        stack: &ArrayView3<'_, u16>,
        value: &ArrayView3<'_, u16>,
    ) -> AppResult<Array3<u16>> {
        let mut out = stack.to_owned();
        self.insert_into(&mut out.view_mut(), value)?;
        Ok(out)
    }

    /// In-place variant of [`insert`](Self::insert).
    pub fn insert_into(
        &self,
        stack: &mut ArrayViewMut3<'_, u16>,
        value: &ArrayView3<'_, u16>,
    ) -> AppResult<()> {
        let (_, rows, cols) = stack.dim();
        let region = self.rect.resolve(rows, cols).ok_or_else(|| {
            DaqError::Configuration(format!(
                "status line {:?} does not fit a {}x{} frame",
                self.rect, rows, cols
            ))
        })?;
        let mut target = stack.slice_mut(s![.., region.rows, region.cols]);
        let source = value.broadcast(target.dim()).ok_or_else(|| {
            DaqError::Configuration(format!(
                "cannot broadcast value block {:?} onto region {:?}",
                value.dim(),
                target.dim()
            ))
        })?;
        target.assign(&source);
        Ok(())
    }
}

fn median(mut values: Vec<u16>) -> Option<u16> {
    if values.is_empty() {
        return None;
    }
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable(mid);
    Some(*m)
}

fn duplicate_adjacent(out: &mut ArrayViewMut3<'_, u16>, region: &Region, rows: usize, cols: usize) {
    let (rs, re) = (region.rows.start, region.rows.end);
    let (cs, ce) = (region.cols.start, region.cols.end);

    // A region is row-like or column-like by the frame edges it spans or touches
    let full_width = cs == 0 && ce == cols;
    let full_height = rs == 0 && re == rows;
    let touches_row_edge = rs == 0 || re == rows;
    let touches_col_edge = cs == 0 || ce == cols;
    let column_first = if full_width != full_height {
        full_height
    } else if touches_row_edge != touches_col_edge {
        touches_col_edge
    } else {
        ce - cs < re - rs
    };

    let source_row = if rs > 0 {
        Some(rs - 1)
    } else if re < rows {
        Some(re)
    } else {
        None
    };
    let source_col = if cs > 0 {
        Some(cs - 1)
    } else if ce < cols {
        Some(ce)
    } else {
        None
    };

    match (column_first, source_row, source_col) {
        (true, _, Some(src)) | (false, None, Some(src)) => {
            let line = out.slice(s![.., rs..re, src..src + 1]).to_owned();
            out.slice_mut(s![.., rs..re, cs..ce]).assign(&line);
        }
        (false, Some(src), _) | (true, Some(src), None) => {
            let line = out.slice(s![.., src..src + 1, cs..ce]).to_owned();
            out.slice_mut(s![.., rs..re, cs..ce]).assign(&line);
        }
        (_, None, None) => {}
    }
}

fn cut_region(stack: &ArrayView3<'_, u16>, region: &Region, rows: usize, cols: usize) -> Array3<u16> {
    let touches_row_edge = region.rows.start == 0 || region.rows.end == rows;
    let all_rows = region.rows.start == 0 && region.rows.end == rows;
    if touches_row_edge && !all_rows {
        let keep: Vec<usize> = (0..rows).filter(|r| !region.rows.contains(r)).collect();
        return stack.select(Axis(1), &keep);
    }
    let touches_col_edge = region.cols.start == 0 || region.cols.end == cols;
    let all_cols = region.cols.start == 0 && region.cols.end == cols;
    if touches_col_edge && !all_cols {
        let keep: Vec<usize> = (0..cols).filter(|c| !region.cols.contains(c)).collect();
        return stack.select(Axis(2), &keep);
    }
    stack.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp(frames: usize, rows: usize, cols: usize) -> Array3<u16> {
        Array3::from_shape_fn((frames, rows, cols), |(f, r, c)| (f * 100 + r * 10 + c) as u16)
    }

    #[test]
    fn test_resolve_negative_coordinates() {
        let rect = StatusRect::last_row();
        let region = rect.resolve(4, 5).unwrap();
        assert_eq!(region.rows, 3..4);
        assert_eq!(region.cols, 0..5);

        assert!(StatusRect::new(0, 10, 0, 0).resolve(4, 5).is_none());
        assert!(StatusRect::new(2, 1, 0, 0).resolve(4, 5).is_none());
    }

    #[test]
    fn test_extract_view() {
        let stack = ramp(2, 4, 5);
        let sl = StatusLine::new(StatusLineKind::Word16, StatusRect::new(-1, -1, 1, 2));
        let region = sl.extract(&stack.view()).unwrap();
        assert_eq!(region.dim(), (2, 1, 2));
        assert_eq!(region[[1, 0, 0]], 131);
    }

    #[test]
    fn test_counter_decoding() {
        assert_eq!(StatusLineKind::Word16.decode(&[7]), Some(7));
        assert_eq!(StatusLineKind::Word32.decode(&[0x0001, 0x0002]), Some(0x0002_0001));
        assert_eq!(
            StatusLineKind::Bytes32.decode(&[0xFF01, 0x0002, 0x0000, 0x0001]),
            Some(0x0100_0201)
        );
        assert_eq!(StatusLineKind::Bytes32.decode(&[1, 2]), None);
    }

    #[test]
    fn test_counters_per_frame() {
        let mut stack = Array3::<u16>::zeros((3, 4, 4));
        for f in 0..3 {
            stack[[f, 3, 0]] = 40 + f as u16;
        }
        let sl = StatusLine::new(StatusLineKind::Word16, StatusRect::last_row());
        assert_eq!(sl.counters(&stack.view()), Some(vec![40, 41, 42]));
    }

    #[test]
    fn test_extract_insert_round_trip() {
        let original = ramp(3, 4, 5);
        let sl = StatusLine::new(StatusLineKind::Word32, StatusRect::last_row());
        let extracted = sl.extract(&original.view()).unwrap().to_owned();

        let blanked = sl.remove(&original.view(), RemovePolicy::Value(0));
        assert_ne!(blanked, original);

        let restored = sl.insert(&blanked.view(), &extracted.view()).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_insert_broadcasts_single_block() {
        let stack = Array3::<u16>::zeros((3, 4, 4));
        let sl = StatusLine::new(StatusLineKind::Word16, StatusRect::new(0, 0, 0, 1));
        let block = Array3::from_elem((1, 1, 2), 9u16);
        let out = sl.insert(&stack.view(), &block.view()).unwrap();
        assert!(out.slice(s![.., 0, 0..2]).iter().all(|&v| v == 9));
        assert_eq!(out.iter().filter(|&&v| v == 9).count(), 6);

        let bad = Array3::from_elem((1, 2, 3), 9u16);
        assert!(sl.insert(&stack.view(), &bad.view()).is_err());
    }

    #[test]
    fn test_remove_duplicate_bottom_row() {
        let stack = ramp(1, 4, 3);
        let sl = StatusLine::new(StatusLineKind::Word16, StatusRect::last_row());
        let out = sl.remove(&stack.view(), RemovePolicy::Duplicate);
        assert_eq!(out.slice(s![0, 3, ..]), stack.slice(s![0, 2, ..]));
        assert_eq!(out.slice(s![0, ..3, ..]), stack.slice(s![0, ..3, ..]));
    }

    #[test]
    fn test_remove_duplicate_full_height_column() {
        let stack = ramp(1, 3, 4);
        let sl = StatusLine::new(StatusLineKind::Word16, StatusRect::new(0, -1, -1, -1));
        let out = sl.remove(&stack.view(), RemovePolicy::Duplicate);
        assert_eq!(out.slice(s![0, .., 3]), stack.slice(s![0, .., 2]));
    }

    #[test]
    fn test_remove_duplicate_partial_edge_column() {
        // Rows 1..=2 of the last column: copy the column to the left, not a row
        let stack = ramp(2, 4, 5);
        let sl = StatusLine::new(StatusLineKind::Word16, StatusRect::new(1, 2, -1, -1));
        let out = sl.remove(&stack.view(), RemovePolicy::Duplicate);
        assert_eq!(out.slice(s![.., 1..3, 4]), stack.slice(s![.., 1..3, 3]));
        assert_eq!(out[[0, 1, 4]], 13);
        assert_eq!(out[[1, 2, 4]], 123);
        assert_eq!(out[[0, 0, 4]], stack[[0, 0, 4]]);
        assert_eq!(out[[0, 3, 4]], stack[[0, 3, 4]]);
    }

    #[test]
    fn test_remove_median() {
        let mut stack = Array3::<u16>::from_elem((1, 3, 3), 5);
        stack[[0, 2, 0]] = 1000;
        stack[[0, 2, 1]] = 1000;
        stack[[0, 2, 2]] = 1000;
        let sl = StatusLine::new(StatusLineKind::Word16, StatusRect::last_row());
        let out = sl.remove(&stack.view(), RemovePolicy::Median);
        assert!(out.iter().all(|&v| v == 5));
    }

    #[test]
    fn test_remove_cut_edge_row() {
        let stack = ramp(2, 4, 3);
        let sl = StatusLine::new(StatusLineKind::Word16, StatusRect::last_row());
        let out = sl.remove(&stack.view(), RemovePolicy::Cut);
        assert_eq!(out.dim(), (2, 3, 3));
        assert_eq!(out, stack.slice(s![.., ..3, ..]).to_owned());
    }

    #[test]
    fn test_remove_cut_interior_is_noop() {
        let stack = ramp(1, 5, 5);
        let sl = StatusLine::new(StatusLineKind::Word16, StatusRect::new(2, 2, 2, 2));
        let out = sl.remove(&stack.view(), RemovePolicy::Cut);
        assert_eq!(out, stack);
    }

    #[test]
    fn test_remove_outside_frame_is_noop() {
        let stack = ramp(1, 2, 2);
        let sl = StatusLine::new(StatusLineKind::Word16, StatusRect::new(5, 5, 0, 0));
        assert_eq!(sl.remove(&stack.view(), RemovePolicy::Value(0)), stack);
    }
}
