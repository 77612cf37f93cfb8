//! "cam" container writer.
//!
//! Each frame is stored as an 8-byte header (`cols`, `rows`, both little-endian
//! `u32`) followed by its pixels as little-endian `u16`. Frames can therefore be
//! read back one by one without any external shape information.
//!
//! The writer does not hold the file open. Every [`CamWriter::add`] reopens it,
//! appending when frames were already written to it (or the session asked to
//! append) and starting a fresh file otherwise.

use anyhow::{Context, Result};
use ndarray::{ArrayView3, Axis};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Container writer that reopens its file per batch.
pub struct CamWriter {
    path: PathBuf,
    append: bool,
    frames_written: u64,
}

impl CamWriter {
    /// Prepare to write `path`. No I/O happens until the first [`add`](Self::add).
    pub fn open(path: &Path, append: bool) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            append,
            frames_written: 0,
        })
    }

    /// Write each frame of `slab` with its header.
    pub fn add(&mut self, slab: &ArrayView3<'_, u16>) -> Result<()> {
        let append = self.append || self.frames_written > 0;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&self.path)
            .with_context(|| format!("Failed to open cam file {:?}", self.path))?;
        let mut out = BufWriter::new(file);

        let (_, rows, cols) = slab.dim();
        let header = frame_header(rows, cols)?;
        for frame in slab.axis_iter(Axis(0)) {
            out.write_all(&header)?;
            let bytes: Vec<u8> = frame.iter().flat_map(|v| v.to_le_bytes()).collect();
            out.write_all(&bytes)?;
        }
        out.flush()
            .with_context(|| format!("Failed to write frames to {:?}", self.path))?;

        self.frames_written += slab.len_of(Axis(0)) as u64;
        Ok(())
    }

    /// Finish the file. Every frame is already flushed by `add`.
    pub fn close(self) -> Result<()> {
        tracing::debug!(path = ?self.path, frames = self.frames_written, "Closed cam file");
        Ok(())
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn frame_header(rows: usize, cols: usize) -> Result<[u8; 8]> {
    let cols = u32::try_from(cols).context("Frame width exceeds cam header limits")?;
    let rows = u32::try_from(rows).context("Frame height exceeds cam header limits")?;
    let mut header = [0u8; 8];
    header[..4].copy_from_slice(&cols.to_le_bytes());
    header[4..].copy_from_slice(&rows.to_le_bytes());
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::TempDir;

    #[test]
    fn test_frame_layout() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("frames.cam");

        let slab = Array3::from_shape_vec((1, 1, 2), vec![7u16, 8]).unwrap();
        let mut writer = CamWriter::open(&path, false).unwrap();
        writer.add(&slab.view()).unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, vec![2, 0, 0, 0, 1, 0, 0, 0, 7, 0, 8, 0]);
    }

    #[test]
    fn test_first_add_truncates_then_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("frames.cam");
        std::fs::write(&path, b"stale data from an older session").unwrap();

        let slab = Array3::<u16>::zeros((2, 2, 2));
        let mut writer = CamWriter::open(&path, false).unwrap();
        writer.add(&slab.view()).unwrap();
        writer.add(&slab.view()).unwrap();
        writer.close().unwrap();

        let frame_bytes = 8 + 2 * 2 * 2;
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4 * frame_bytes);
    }

    #[test]
    fn test_session_append_keeps_existing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("frames.cam");
        std::fs::write(&path, [0u8; 12]).unwrap();

        let slab = Array3::<u16>::zeros((1, 1, 2));
        let mut writer = CamWriter::open(&path, true).unwrap();
        writer.add(&slab.view()).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 24);
    }
}
