//! Single-task host for the frame save controller.
//!
//! [`SaverActor`] owns a [`FrameSaveController`] and is the only code that ever
//! touches it. One `tokio::select!` loop multiplexes:
//! - host commands ([`SaverCommand`]) from an mpsc channel,
//! - frame bundles from a broadcast subscription, fed to `receive_frames`,
//! - the periodic drain job, calling `dump_queue` every dumping period.
//!
//! Each branch runs to completion before the next is polled, which gives the
//! controller the exclusive, sequential execution context it relies on.
//! After every branch the actor publishes a [`SaverStatus`] snapshot on a
//! `watch` channel.
//!
//! # Example
//!
//! ```no_run
//! use daq_saver::saver_actor::SaverActor;
//! use daq_saver::config::SaverConfig;
//! use daq_storage::SaveRequest;
//! use tokio::sync::broadcast;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SaverConfig::load()?;
//! let (frame_tx, frame_rx) = broadcast::channel(64);
//! let (handle, task) = SaverActor::from_config(&config)?.spawn(frame_rx);
//!
//! handle.save_start(SaveRequest::new("run.tiff").format_name("tiff")?).await?;
//! // ... producer sends bundles on frame_tx ...
//! # drop(frame_tx);
//! handle.save_stop().await?;
//! handle.shutdown().await?;
//! task.await?;
//! # Ok(())
//! # }
//! ```

use crate::config::SaverConfig;
use crate::messages::SaverCommand;
use daq_core::{AppResult, DaqError, FrameBundle};
use daq_storage::{FrameSaveController, SaveRequest, SaveState, SaverStatus, SettingsProvider};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Capacity of the command channel
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Actor owning the save controller.
pub struct SaverActor {
    controller: FrameSaveController,
    dumping_period: Duration,
    status_tx: watch::Sender<SaverStatus>,
}

impl SaverActor {
    /// Wrap an existing controller.
    pub fn new(controller: FrameSaveController, dumping_period: Duration) -> Self {
        let (status_tx, _) = watch::channel(controller.status());
        Self {
            controller,
            dumping_period,
            status_tx,
        }
    }

    /// Build the controller from configuration, including the start-up
    /// pretrigger buffer when `pretrigger.size > 0`.
    pub fn from_config(config: &SaverConfig) -> AppResult<Self> {
        let mut controller = FrameSaveController::new(config.controller_settings()?)?;
        if config.pretrigger.size > 0 {
            controller.setup_pretrigger(config.pretrigger.size, true, true, true)?;
        }
        Ok(Self::new(controller, config.dumping_period()))
    }

    /// Source of the settings captured at session start.
    pub fn with_settings_provider(mut self, provider: Box<dyn SettingsProvider>) -> Self {
        self.controller.set_settings_provider(provider);
        self
    }

    /// Spawn the actor loop on the current runtime.
    pub fn spawn(self, frames: broadcast::Receiver<FrameBundle>) -> (SaverHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = SaverHandle {
            command_tx,
            status_rx: self.status_tx.subscribe(),
        };
        let task = tokio::spawn(self.run(command_rx, frames));
        (handle, task)
    }

    /// Run the event loop until a `Shutdown` command arrives or every command
    /// sender is dropped. Any running session is drained and finalized first.
    pub async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<SaverCommand>,
        mut frames: broadcast::Receiver<FrameBundle>,
    ) {
        info!(dumping_period = ?self.dumping_period, "Saver actor started");

        let mut dump_tick = tokio::time::interval(self.dumping_period);
        dump_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frames_open = true;
        let mut shutdown_response = None;

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(SaverCommand::Shutdown { response }) => {
                            shutdown_response = Some(response);
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => {
                            debug!("All saver handles dropped");
                            break;
                        }
                    }
                }

                received = frames.recv(), if frames_open => {
                    match received {
                        Ok(bundle) => {
                            self.controller.receive_frames(bundle);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            // The index gap of the next bundle accounts for the lost frames
                            warn!(skipped_bundles = skipped, "Frame subscription lagged");
                        }
                        Err(RecvError::Closed) => {
                            info!("Frame source closed");
                            frames_open = false;
                        }
                    }
                }

                _ = dump_tick.tick() => {
                    self.dump();
                    if self.controller.queue_ram() == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }
            self.publish();
        }

        self.finish();
        self.publish();
        if let Some(response) = shutdown_response {
            let _ = response.send(());
        }
        info!("Saver actor stopped");
    }

    fn handle_command(&mut self, command: SaverCommand) {
        match command {
            SaverCommand::SaveStart { request, response } => {
                let result = self.controller.save_start(request);
                // Observers must see the new session before the caller resumes
                self.publish();
                let _ = response.send(result);
            }
            SaverCommand::SaveStop { response } => {
                self.controller.save_stop();
                let _ = response.send(());
            }
            SaverCommand::SetupPretrigger {
                size,
                enabled,
                preserve_frames,
                clear_on_write,
                response,
            } => {
                let result =
                    self.controller
                        .setup_pretrigger(size, enabled, preserve_frames, clear_on_write);
                let _ = response.send(result);
            }
            SaverCommand::ClearPretrigger { response } => {
                self.controller.clear_pretrigger();
                let _ = response.send(());
            }
            SaverCommand::SetupQueueRam {
                max_queue_ram,
                response,
            } => {
                self.controller.setup_queue_ram(max_queue_ram);
                let _ = response.send(());
            }
            SaverCommand::WriteEventLog { message, response } => {
                let _ = response.send(self.controller.write_event_log(&message));
            }
            SaverCommand::GetStatus { response } => {
                let _ = response.send(self.controller.status());
            }
            SaverCommand::Shutdown { response } => {
                // Handled by the run loop
                let _ = response.send(());
            }
        }
    }

    fn dump(&mut self) {
        if let Err(e) = self.controller.dump_queue() {
            error!(error = %e, "Failed to write queued frames");
        }
    }

    /// Stop any running session and drain it to disk.
    fn finish(&mut self) {
        self.controller.save_stop();
        while self.controller.state() != SaveState::Stopped {
            if let Err(e) = self.controller.dump_queue() {
                error!(error = %e, "Failed to flush session during shutdown");
                break;
            }
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.controller.status());
    }
}

/// Client side of a running [`SaverActor`].
#[derive(Clone)]
pub struct SaverHandle {
    command_tx: mpsc::Sender<SaverCommand>,
    status_rx: watch::Receiver<SaverStatus>,
}

impl SaverHandle {
    async fn request<T>(&self, (command, rx): (SaverCommand, oneshot::Receiver<T>)) -> AppResult<T> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| DaqError::ActorUnavailable("command channel closed".to_string()))?;
        rx.await
            .map_err(|_| DaqError::ActorUnavailable("no response from saver actor".to_string()))
    }

    pub async fn save_start(&self, request: SaveRequest) -> AppResult<()> {
        self.request(SaverCommand::save_start(request)).await?
    }

    pub async fn save_stop(&self) -> AppResult<()> {
        self.request(SaverCommand::save_stop()).await
    }

    pub async fn setup_pretrigger(
        &self,
        size: usize,
        enabled: bool,
        preserve_frames: bool,
        clear_on_write: bool,
    ) -> AppResult<()> {
        self.request(SaverCommand::setup_pretrigger(
            size,
            enabled,
            preserve_frames,
            clear_on_write,
        ))
        .await?
    }

    pub async fn clear_pretrigger(&self) -> AppResult<()> {
        self.request(SaverCommand::clear_pretrigger()).await
    }

    pub async fn setup_queue_ram(&self, max_queue_ram: usize) -> AppResult<()> {
        self.request(SaverCommand::setup_queue_ram(max_queue_ram))
            .await
    }

    pub async fn write_event_log(&self, message: impl Into<String>) -> AppResult<bool> {
        self.request(SaverCommand::write_event_log(message.into()))
            .await?
    }

    /// Fresh status, computed by the actor.
    pub async fn status(&self) -> AppResult<SaverStatus> {
        self.request(SaverCommand::get_status()).await
    }

    /// Last published status without a round trip.
    pub fn latest_status(&self) -> SaverStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver for every published status snapshot.
    pub fn subscribe_status(&self) -> watch::Receiver<SaverStatus> {
        self.status_rx.clone()
    }

    /// Wait until no session is active.
    pub async fn wait_until_stopped(&self) -> AppResult<SaverStatus> {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(|status| status.state == SaveState::Stopped)
            .await
            .map_err(|_| DaqError::ActorUnavailable("status channel closed".to_string()))?;
        Ok(status.clone())
    }

    /// Drain any running session and stop the actor.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.request(SaverCommand::shutdown()).await
    }
}
