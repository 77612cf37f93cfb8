//! Custom error types for the frame saving pipeline.
//!
//! This module defines the primary error type, `DaqError`, shared by the core types,
//! the storage layer and the host actor. Using the `thiserror` crate, it provides a
//! centralized and consistent way to handle the few kinds of errors the pipeline
//! can raise.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidBundle`**: a frame bundle was constructed with slab/index lengths that
//!   disagree. This is a caller bug in the producer.
//! - **`Configuration`**, **`UnknownFormat`**, **`InvalidCapacity`**: rejected
//!   parameters. These are raised at the call site before any session state is
//!   mutated, so the controller stays in its prior consistent state.
//! - **`Io`**, **`Storage`**, **`Serialization`**: failures while writing frames or
//!   sidecar files. They are never retried by the pipeline and are fatal to the
//!   current save session.
//!
//! - **`ActorUnavailable`**: a command could not reach the task that owns the
//!   controller (it has shut down).
//!
//! Backpressure drops are not errors; they only show up in the `missed` counter.
//! Status-line degradation is observable state, not an error either.

use thiserror::Error;

/// Convenience alias for results using the pipeline error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the frame saving pipeline.
///
/// # Error Categories
///
/// 1. **Caller errors** - `InvalidBundle`
///    - Occur when a producer builds an inconsistent bundle
///    - Recovery: fix the producer
///
/// 2. **Configuration errors** - `Configuration`, `UnknownFormat`, `InvalidCapacity`
///    - Occur when a command is issued with invalid parameters
///    - Recovery: reissue the command with valid parameters; nothing was changed
///
/// 3. **Persistence errors** - `Io`, `Storage`, `Serialization`
///    - Occur while a queue chunk or a sidecar is written
///    - Recovery: none at this layer; the host decides how to surface the fault
///
/// # Example
///
/// ```rust
/// use daq_core::error::{AppResult, DaqError};
///
/// fn validate_split(split: u64) -> AppResult<()> {
///     if split == 0 {
///         return Err(DaqError::Configuration("file_split must be positive".into()));
///     }
///     Ok(())
/// }
/// # assert!(validate_split(0).is_err());
/// ```
#[derive(Error, Debug)]
pub enum DaqError {
    /// Frame bundle slabs and index sequences disagree.
    ///
    /// **Error Type**: Permanent - the producer built an invalid bundle.
    #[error("Invalid frame bundle: {0}")]
    InvalidBundle(String),

    /// Configuration validation failed.
    ///
    /// Occurs when command parameters parse correctly but are logically invalid
    /// (e.g. a zero file split or a zero dumping period).
    ///
    /// **Error Type**: Permanent - requires different parameters.
    ///
    /// **Recovery Strategy**: Reissue the command. No session state was mutated.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Unrecognized output format name.
    #[error("Unknown save format '{0}' (expected raw, bin, tiff or cam)")]
    UnknownFormat(String),

    /// Pretrigger buffer capacity must be positive.
    #[error("Pretrigger capacity must be positive, got {0}")]
    InvalidCapacity(u64),

    /// Standard I/O operation failed.
    ///
    /// **Error Type**: Fatal to the current save session.
    ///
    /// **Source**: Wraps `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A writer, sidecar or event log operation failed.
    ///
    /// The storage layer reports failures as `anyhow::Error` with file context
    /// attached; they are carried here unchanged.
    ///
    /// **Error Type**: Fatal to the current save session. Not retried.
    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    /// JSON encoding of a sidecar document failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The task owning the controller is gone, so the command was not processed.
    #[error("Saver actor unavailable: {0}")]
    ActorUnavailable(String),
}

impl DaqError {
    /// Whether this error was raised before any state was touched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DaqError::Configuration(_) | DaqError::UnknownFormat(_) | DaqError::InvalidCapacity(_)
        )
    }
}
