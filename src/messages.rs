//! Message types for the saver actor.
//!
//! Commands are sent to the [`SaverActor`](crate::saver_actor::SaverActor) over an
//! mpsc channel; each carries a `oneshot::Sender` for its response. The actor
//! handles one command at a time on the same task that receives frames and runs
//! the drain job, so no command ever interleaves with admission or a disk write.
//!
//! # Message Flow
//!
//! ```text
//! Host                               Actor Task
//! ----                               ----------
//! 1. Create command with oneshot
//! 2. Send via mpsc channel    ------>
//!                                    3. Receive command
//!                                    4. Apply to the controller
//!                                    5. Send response
//! 6. Await oneshot receiver   <------
//! ```
//!
//! # Helper Methods
//!
//! Each command variant has a helper that builds the command and returns the
//! receiver for its response:
//!
//! ```rust
//! use daq_saver::messages::SaverCommand;
//!
//! let (cmd, rx) = SaverCommand::save_stop();
//! // cmd_tx.send(cmd).await?;
//! // rx.await?;
//! ```

use daq_core::AppResult;
use daq_storage::{SaveRequest, SaverStatus};
use tokio::sync::oneshot;

/// Commands accepted by the saver actor.
#[derive(Debug)]
pub enum SaverCommand {
    /// Start a save session, finalizing the running one first.
    ///
    /// # Response
    ///
    /// - `Ok(())`: session started (pretrigger frames already replayed)
    /// - `Err`: invalid request, or the previous session failed to flush
    SaveStart {
        /// Session parameters
        request: SaveRequest,
        /// Response channel
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Stop admitting frames; the session finalizes once the queue drains.
    SaveStop {
        /// Acknowledges the request
        response: oneshot::Sender<()>,
    },

    /// Configure the pretrigger buffer.
    SetupPretrigger {
        /// Capacity in frames
        size: usize,
        /// Whether incoming frames are buffered and replayed
        enabled: bool,
        /// Keep already buffered frames
        preserve_frames: bool,
        /// Empty the buffer after replaying it into a session
        clear_on_write: bool,
        /// Response channel
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Drop all buffered pretrigger frames.
    ClearPretrigger {
        /// Acknowledges the request
        response: oneshot::Sender<()>,
    },

    /// Change the queue admission limit.
    SetupQueueRam {
        /// Limit in bytes
        max_queue_ram: usize,
        /// Acknowledges the request
        response: oneshot::Sender<()>,
    },

    /// Append a line to the session event log.
    ///
    /// # Response
    ///
    /// `Ok(false)` when no session is active.
    WriteEventLog {
        /// Event text
        message: String,
        /// Response channel
        response: oneshot::Sender<AppResult<bool>>,
    },

    /// Current status snapshot.
    GetStatus {
        /// Response channel
        response: oneshot::Sender<SaverStatus>,
    },

    /// Drain and finalize any session, then stop the actor.
    Shutdown {
        /// Sent after the final status is published
        response: oneshot::Sender<()>,
    },
}

impl SaverCommand {
    /// Helper to create a SaveStart command
    pub fn save_start(request: SaveRequest) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SaveStart {
                request,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a SaveStop command
    pub fn save_stop() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::SaveStop { response: tx }, rx)
    }

    /// Helper to create a SetupPretrigger command
    pub fn setup_pretrigger(
        size: usize,
        enabled: bool,
        preserve_frames: bool,
        clear_on_write: bool,
    ) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetupPretrigger {
                size,
                enabled,
                preserve_frames,
                clear_on_write,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a ClearPretrigger command
    pub fn clear_pretrigger() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::ClearPretrigger { response: tx }, rx)
    }

    /// Helper to create a SetupQueueRam command
    pub fn setup_queue_ram(max_queue_ram: usize) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetupQueueRam {
                max_queue_ram,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a WriteEventLog command
    pub fn write_event_log(message: String) -> (Self, oneshot::Receiver<AppResult<bool>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::WriteEventLog {
                message,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a GetStatus command
    pub fn get_status() -> (Self, oneshot::Receiver<SaverStatus>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetStatus { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_pairs_command_with_receiver() {
        let (cmd, mut rx) = SaverCommand::write_event_log("marker".to_string());
        match cmd {
            SaverCommand::WriteEventLog { message, response } => {
                assert_eq!(message, "marker");
                response.send(Ok(true)).unwrap();
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(matches!(rx.try_recv(), Ok(Ok(true))));
    }
}
