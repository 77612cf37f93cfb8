//! `daq-core`
//!
//! Core types shared by the frame saving pipeline.
//!
//! ## Key Types
//!
//! - [`FrameBundle`]: one ingestion event (frame slabs, their global indices and metadata)
//! - [`StatusLine`]: descriptor of an embedded per-frame hardware counter region
//! - [`DaqError`]: error type used across the pipeline
//!
//! The [`status_line`] module holds the pure codec that extracts, removes and
//! re-inserts the status-line region of a frame stack.

/// Frame bundles and their metadata
pub mod data;
/// Pipeline error type
pub mod error;
/// Status-line codec
pub mod status_line;

pub use data::{BundleMeta, FrameBundle, FrameStack, RESET_INDEX};
pub use error::{AppResult, DaqError};
pub use status_line::{RemovePolicy, StatusLine, StatusLineKind, StatusRect};
