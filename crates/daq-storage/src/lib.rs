//! Frame persistence for the daq-saver pipeline.
//!
//! The [`FrameSaveController`] admits [`FrameBundle`](daq_core::FrameBundle)s into a
//! RAM-bounded, time-chunked [`SaveQueue`] and drains it through one of the
//! [`FrameWriter`] variants on a periodic tick. Frames that arrive while no
//! session is active can be retained in a [`PretriggerBuffer`] and replayed
//! when the next session starts.
//!
//! # Architecture
//!
//! ```text
//! producer ──> receive_frames ──┬──> SaveQueue (chunks) ──> dump_queue ──> FrameWriter ──> disk
//!                               └──> PretriggerBuffer (when not saving)
//! ```

/// Headered `.cam` frame files
pub mod cam_writer;
/// Session state machine and admission
pub mod controller;
/// Per-session text event log
pub mod event_log;
/// Format dispatch and file splitting
pub mod frame_writer;
/// Rolling buffer of frames received while idle
pub mod pretrigger;
/// Headerless little-endian frame files
pub mod raw_writer;
/// Time-chunked queue between admission and disk
pub mod save_queue;
/// Settings and background sidecar files
pub mod sidecar;
/// Frame counter continuity checking
pub mod status_check;
/// Multi-page TIFF stacks
pub mod tiff_writer;

pub use controller::{
    ControllerSettings, FrameCounters, FrameSaveController, SaveRequest, SaveState, SaverStatus,
};
pub use frame_writer::{FrameWriter, SaveFormat, SessionWriter};
pub use pretrigger::{PretriggerBuffer, PretriggerStatus};
pub use save_queue::{Chunk, SaveQueue};
pub use sidecar::{BackgroundSnapshot, SettingsDocument, SettingsProvider};
pub use status_check::{StatusLineCheck, StatusLineChecker};
