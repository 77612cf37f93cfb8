//! Output format selection and file splitting.
//!
//! [`SaveFormat`] names the output format of a session. [`FrameWriter`] is the
//! closed set of writer variants behind the shared open/add/close contract, and
//! [`SessionWriter`] drives one of them for a whole session: it opens files
//! lazily, splits the output into numbered files, and keeps frame order across
//! split boundaries.

use crate::cam_writer::CamWriter;
use crate::raw_writer::RawWriter;
use crate::tiff_writer::TiffStackWriter;
use anyhow::Result;
use daq_core::DaqError;
use ndarray::{s, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Storage format for a save session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveFormat {
    /// Headerless little-endian `u16` frames
    #[default]
    Raw,
    /// Alias of `Raw`
    Bin,
    /// Multi-page TIFF, one page per frame
    Tiff,
    /// Each frame prefixed by an 8-byte size header
    Cam,
}

impl SaveFormat {
    /// Lowercase name, as accepted by `FromStr`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveFormat::Raw => "raw",
            SaveFormat::Bin => "bin",
            SaveFormat::Tiff => "tiff",
            SaveFormat::Cam => "cam",
        }
    }
}

impl fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaveFormat {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(SaveFormat::Raw),
            "bin" => Ok(SaveFormat::Bin),
            "tiff" | "tif" => Ok(SaveFormat::Tiff),
            "cam" => Ok(SaveFormat::Cam),
            _ => Err(DaqError::UnknownFormat(s.to_string())),
        }
    }
}

/// One open output file of a given format.
pub enum FrameWriter {
    /// `raw` and `bin`
    Raw(RawWriter),
    /// `tiff`
    Tiff(TiffStackWriter),
    /// `cam`
    Cam(CamWriter),
}

impl FrameWriter {
    /// Open a writer for `format` at `path`.
    pub fn open(format: SaveFormat, path: &Path, append: bool) -> Result<Self> {
        Ok(match format {
            SaveFormat::Raw | SaveFormat::Bin => FrameWriter::Raw(RawWriter::open(path, append)?),
            SaveFormat::Tiff => FrameWriter::Tiff(TiffStackWriter::open(path, append)?),
            SaveFormat::Cam => FrameWriter::Cam(CamWriter::open(path, append)?),
        })
    }

    /// Write every frame of `slab`.
    pub fn add(&mut self, slab: &ArrayView3<'_, u16>) -> Result<()> {
        match self {
            FrameWriter::Raw(w) => w.add(slab),
            FrameWriter::Tiff(w) => w.add(slab),
            FrameWriter::Cam(w) => w.add(slab),
        }
    }

    /// Flush and close.
    pub fn close(self) -> Result<()> {
        match self {
            FrameWriter::Raw(w) => w.close(),
            FrameWriter::Tiff(w) => w.close(),
            FrameWriter::Cam(w) => w.close(),
        }
    }

    /// File currently being written.
    pub fn path(&self) -> &Path {
        match self {
            FrameWriter::Raw(w) => w.path(),
            FrameWriter::Tiff(w) => w.path(),
            FrameWriter::Cam(w) => w.path(),
        }
    }
}

/// Path of split file `index`: `<stem>_<index:04><ext>` next to `base`.
pub fn split_file_path(base: &Path, index: u64) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("frames");
    let name = match base.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{:04}.{}", stem, index, ext),
        None => format!("{}_{:04}", stem, index),
    };
    base.with_file_name(name)
}

/// Writer for one save session.
pub struct SessionWriter {
    format: SaveFormat,
    base_path: PathBuf,
    append: bool,
    file_split: Option<u64>,
    current: Option<FrameWriter>,
    file_index: u64,
    frames_in_file: u64,
    files_opened: u64,
    frames_written: u64,
}

impl SessionWriter {
    /// No file is touched until frames arrive.
    pub fn new(format: SaveFormat, base_path: &Path, append: bool, file_split: Option<u64>) -> Self {
        Self {
            format,
            base_path: base_path.to_path_buf(),
            append,
            file_split: file_split.filter(|&n| n > 0),
            current: None,
            file_index: 0,
            frames_in_file: 0,
            files_opened: 0,
            frames_written: 0,
        }
    }

    fn file_path(&self, index: u64) -> PathBuf {
        match self.file_split {
            Some(_) => split_file_path(&self.base_path, index),
            None => self.base_path.clone(),
        }
    }

    /// Append a slab, opening and splitting files as needed.
    pub fn write(&mut self, slab: &ArrayView3<'_, u16>) -> Result<()> {
        let total = slab.len_of(Axis(0));
        let mut offset = 0;
        while offset < total {
            let writer = match self.current.take() {
                Some(writer) => writer,
                None => self.open_next()?,
            };
            let writer = self.current.insert(writer);

            let room = match self.file_split {
                Some(split) => (split - self.frames_in_file) as usize,
                None => total - offset,
            };
            let take = room.min(total - offset);
            writer.add(&slab.slice(s![offset..offset + take, .., ..]))?;

            offset += take;
            self.frames_in_file += take as u64;
            self.frames_written += take as u64;

            if self.file_split == Some(self.frames_in_file) {
                self.close_current()?;
                self.file_index += 1;
                self.frames_in_file = 0;
            }
        }
        Ok(())
    }

    fn open_next(&mut self) -> Result<FrameWriter> {
        let path = self.file_path(self.file_index);
        let append = self.append && self.files_opened == 0;
        let writer = FrameWriter::open(self.format, &path, append)?;
        self.files_opened += 1;
        tracing::info!(path = ?path, format = %self.format, append, "Opened output file");
        Ok(writer)
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some(writer) = self.current.take() {
            let path = writer.path().to_path_buf();
            writer.close()?;
            tracing::info!(path = ?path, "Closed output file");
        }
        Ok(())
    }

    /// Close the currently open file, if any.
    pub fn close(&mut self) -> Result<()> {
        self.close_current()
    }

    /// Frames written across all files.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Files opened so far, including the current one.
    pub fn files_opened(&self) -> u64 {
        self.files_opened
    }
}
