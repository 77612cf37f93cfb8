//! # daq-saver
//!
//! Host application for the streaming frame persistence pipeline. The heavy
//! lifting lives in the workspace crates:
//!
//! - `daq-core`: frame bundles, status-line codec and the shared error type.
//! - `daq-storage`: save controller, chunked queue, pretrigger buffer and the
//!   raw/TIFF/cam writers.
//!
//! This crate wires them into a running service:
//!
//! - **`config`**: Figment-based configuration (TOML file plus `DAQ_SAVER_*`
//!   environment overrides).
//! - **`tracing_setup`**: `tracing-subscriber` initialisation.
//! - **`messages`**: commands accepted by the saver actor.
//! - **`saver_actor`**: the task that owns the controller, receives frames and
//!   runs the periodic drain job.
//! - **`mock_source`**: synthetic camera used by the CLI and integration tests.

/// Layered configuration
pub mod config;
/// Actor command protocol
pub mod messages;
/// Synthetic camera
pub mod mock_source;
/// Task owning the save controller
pub mod saver_actor;
/// Log subscriber setup
pub mod tracing_setup;

pub use config::SaverConfig;
pub use saver_actor::{SaverActor, SaverHandle};

pub use daq_core::{AppResult, DaqError, FrameBundle};
pub use daq_storage::{SaveFormat, SaveRequest, SaveState, SaverStatus};
