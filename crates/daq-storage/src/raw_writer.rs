//! Raw binary frame writer.
//!
//! Frames are written as a flat concatenation of little-endian `u16` pixels in
//! row-major order, with no header. Shape and dtype are recorded in the settings
//! sidecar, not in the data file.

use anyhow::{Context, Result};
use ndarray::ArrayView3;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Buffered writer holding the file open for the whole session.
pub struct RawWriter {
    path: PathBuf,
    file: BufWriter<File>,
    frames_written: u64,
}

impl RawWriter {
    /// Open `path`, appending to existing content or truncating it.
    pub fn open(path: &Path, append: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .with_context(|| format!("Failed to open raw file {:?}", path))?;

        tracing::debug!(path = ?path, append, "Opened raw frame file");

        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
            frames_written: 0,
        })
    }

    /// Append a frame slab.
    pub fn add(&mut self, slab: &ArrayView3<'_, u16>) -> Result<()> {
        let bytes: Vec<u8> = slab.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.file
            .write_all(&bytes)
            .with_context(|| format!("Failed to write frames to {:?}", self.path))?;
        self.frames_written += slab.len_of(ndarray::Axis(0)) as u64;
        Ok(())
    }

    /// Flush buffered data and close the file.
    pub fn close(mut self) -> Result<()> {
        self.file
            .flush()
            .with_context(|| format!("Failed to flush {:?}", self.path))?;
        tracing::debug!(path = ?self.path, frames = self.frames_written, "Closed raw frame file");
        Ok(())
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames written through this writer.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::TempDir;

    #[test]
    fn test_writes_little_endian_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("frames.bin");

        let slab = Array3::from_shape_vec((1, 1, 2), vec![0x0102u16, 0x0304]).unwrap();
        let mut writer = RawWriter::open(&path, false).unwrap();
        writer.add(&slab.view()).unwrap();
        writer.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn test_append_and_truncate() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("frames.bin");
        let slab = Array3::<u16>::ones((2, 3, 3));

        for append in [false, true] {
            let mut writer = RawWriter::open(&path, append).unwrap();
            writer.add(&slab.view()).unwrap();
            writer.close().unwrap();
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * 2 * 9 * 2);

        let mut writer = RawWriter::open(&path, false).unwrap();
        writer.add(&slab.view()).unwrap();
        assert_eq!(writer.frames_written(), 2);
        writer.close().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * 9 * 2);
    }
}
