//! Multi-page TIFF writer for camera frames.
//!
//! Every frame becomes one 16-bit grayscale page. Pages are emitted one at a
//! time, so a slab of 3 or 4 frames is never mistaken for a colour image the way
//! a single multi-sample write could be.
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_storage::tiff_writer::TiffStackWriter;
//!
//! let mut writer = TiffStackWriter::open("stack.tiff".as_ref(), false)?;
//! writer.add(&slab.view())?;
//! writer.close()?;
//! ```
//!
//! # Appending
//!
//! The encoder cannot extend a finished file in place. When `append` is requested
//! and the file already holds pages, they are read back and re-emitted into the
//! new file before any new frame.

use anyhow::{anyhow, Context, Result};
use ndarray::{ArrayView3, Axis};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};

/// One decoded 16-bit page: `(width, height, pixels)`.
type Page = (u32, u32, Vec<u16>);

/// TIFF stack writer keeping one encoder open for the life of the file.
pub struct TiffStackWriter {
    path: PathBuf,
    encoder: TiffEncoder<File>,
    pages_written: u64,
}

impl TiffStackWriter {
    /// Create `path` (or, with `append`, carry over its existing pages).
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be created
    /// - An existing file to append to is not a 16-bit grayscale TIFF
    pub fn open(path: &Path, append: bool) -> Result<Self> {
        let existing = if append && Self::has_content(path) {
            Self::read_pages(path)?
        } else {
            Vec::new()
        };

        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let encoder =
            TiffEncoder::new(file).with_context(|| format!("Failed to start TIFF {:?}", path))?;

        let mut writer = Self {
            path: path.to_path_buf(),
            encoder,
            pages_written: 0,
        };
        let carried = existing.len();
        for (width, height, pixels) in existing {
            writer.write_page(width, height, &pixels)?;
        }

        tracing::debug!(path = ?path, append, carried_pages = carried, "Opened TIFF stack");
        Ok(writer)
    }

    fn has_content(path: &Path) -> bool {
        std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
    }

    fn read_pages(path: &Path) -> Result<Vec<Page>> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .with_context(|| format!("Failed to read existing TIFF {:?}", path))?;

        let mut pages = Vec::new();
        loop {
            let (width, height) = decoder.dimensions()?;
            match decoder.read_image()? {
                DecodingResult::U16(pixels) => pages.push((width, height, pixels)),
                _ => {
                    return Err(anyhow!(
                        "Cannot append to {:?}: page {} is not 16-bit grayscale",
                        path,
                        pages.len()
                    ))
                }
            }
            if !decoder.more_images() {
                break;
            }
            decoder.next_image()?;
        }
        Ok(pages)
    }

    fn write_page(&mut self, width: u32, height: u32, pixels: &[u16]) -> Result<()> {
        self.encoder
            .write_image::<colortype::Gray16>(width, height, pixels)
            .with_context(|| format!("Failed to encode TIFF page to {:?}", self.path))?;
        self.pages_written += 1;
        Ok(())
    }

    /// Append every frame of the slab as its own page.
    pub fn add(&mut self, slab: &ArrayView3<'_, u16>) -> Result<()> {
        let (_, rows, cols) = slab.dim();
        let width = u32::try_from(cols).context("Frame width exceeds TIFF limits")?;
        let height = u32::try_from(rows).context("Frame height exceeds TIFF limits")?;
        for frame in slab.axis_iter(Axis(0)) {
            let pixels: Vec<u16> = frame.iter().copied().collect();
            self.write_page(width, height, &pixels)?;
        }
        Ok(())
    }

    /// Close the file. Every page is complete once written, so this only releases the handle.
    pub fn close(self) -> Result<()> {
        tracing::debug!(path = ?self.path, pages = self.pages_written, "Closed TIFF stack");
        Ok(())
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pages written in this session, excluding pre-existing ones.
    pub fn pages_written(&self) -> u64 {
        self.pages_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::TempDir;

    fn gradient(frames: usize, rows: usize, cols: usize) -> Array3<u16> {
        Array3::from_shape_fn((frames, rows, cols), |(f, r, c)| (f * 1000 + r * cols + c) as u16)
    }

    fn read_back(path: &Path) -> Vec<Page> {
        TiffStackWriter::read_pages(path).unwrap()
    }

    #[test]
    fn test_four_frame_slab_is_four_pages() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stack.tiff");

        let slab = gradient(4, 8, 6);
        let mut writer = TiffStackWriter::open(&path, false).unwrap();
        writer.add(&slab.view()).unwrap();
        assert_eq!(writer.pages_written(), 4);
        writer.close().unwrap();

        let pages = read_back(&path);
        assert_eq!(pages.len(), 4);
        for (i, (width, height, pixels)) in pages.iter().enumerate() {
            assert_eq!((*width, *height), (6, 8));
            assert_eq!(pixels[0], (i * 1000) as u16);
        }
    }

    #[test]
    fn test_append_carries_existing_pages() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stack.tiff");

        let mut writer = TiffStackWriter::open(&path, false).unwrap();
        writer.add(&gradient(2, 4, 4).view()).unwrap();
        writer.close().unwrap();

        let mut writer = TiffStackWriter::open(&path, true).unwrap();
        writer.add(&gradient(3, 4, 4).view()).unwrap();
        writer.close().unwrap();

        let pages = read_back(&path);
        assert_eq!(pages.len(), 5);
        assert_eq!(pages[2].2[0], 0);
        assert_eq!(pages[4].2[0], 2000);
    }

    #[test]
    fn test_fresh_open_discards_existing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stack.tiff");

        for _ in 0..2 {
            let mut writer = TiffStackWriter::open(&path, false).unwrap();
            writer.add(&gradient(2, 4, 4).view()).unwrap();
            writer.close().unwrap();
        }
        assert_eq!(read_back(&path).len(), 2);
    }
}
