//! Frame save controller.
//!
//! Owns one save session at a time and ties the pipeline together: admission
//! with RAM backpressure and batch budget, chunked queueing, periodic draining
//! through the session writer, pretrigger retention and replay, status-line
//! checking, and session finalization.
//!
//! # State machine
//!
//! ```text
//! Stopped ──save_start──> Saving ──save_stop──> Stopping ──(queue drained)──> Stopped
//! ```
//!
//! `Saving` and `Stopping` both drain the queue on every [`dump_queue`] tick;
//! only `Saving` admits new frames. Finalization happens on the tick that
//! leaves the queue empty after a stop was requested, so every admitted frame
//! is on disk before the file is closed.
//!
//! The controller is not thread-safe and does not need to be: every entry point
//! runs to completion on the single task that owns it.
//!
//! [`dump_queue`]: FrameSaveController::dump_queue

use crate::event_log::EventLog;
use crate::frame_writer::{SaveFormat, SessionWriter};
use crate::pretrigger::{PretriggerBuffer, PretriggerStatus};
use crate::save_queue::{Chunk, SaveQueue};
use crate::sidecar::{self, SettingsDocument, SettingsProvider};
use crate::status_check::{StatusLineCheck, StatusLineChecker};
use chrono::{DateTime, Utc};
use daq_core::{AppResult, DaqError, FrameBundle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Static controller parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    /// Admission limit for queued pixel bytes
    pub max_queue_ram: usize,
    /// Width of one chunk window
    pub chunk_period: Duration,
    /// Chunks written per `dump_queue` tick
    pub chunks_per_save: usize,
    /// Trim the pretrigger buffer to exactly its capacity
    pub pretrigger_strict_size: bool,
    /// Empty the pretrigger buffer when the camera index resets
    pub pretrigger_clear_on_reset: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_queue_ram: usize::try_from(4u64 << 30).unwrap_or(usize::MAX),
            chunk_period: Duration::from_millis(200),
            chunks_per_save: 1,
            pretrigger_strict_size: true,
            pretrigger_clear_on_reset: true,
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    /// No session; incoming frames go to the pretrigger buffer
    #[default]
    Stopped,
    /// Admitting frames into the queue
    Saving,
    /// No longer admitting; draining queued chunks
    Stopping,
}

impl fmt::Display for SaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaveState::Stopped => "stopped",
            SaveState::Saving => "saving",
            SaveState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Per-session frame counters.
///
/// `received >= scheduled >= saved` always holds, and `scheduled - saved` is the
/// number of frames still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameCounters {
    /// Frames offered while saving
    pub received: u64,
    /// Frames admitted into the queue
    pub scheduled: u64,
    /// Frames written to disk
    pub saved: u64,
    /// Index gaps plus frames dropped on admission
    pub missed: u64,
}

/// Parameters of one save session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveRequest {
    /// Destination file; split files insert a counter before the extension
    pub path: PathBuf,
    /// Cap on frames scheduled this session
    pub batch_size: Option<u64>,
    /// Append to existing files instead of truncating them
    pub append: bool,
    /// Output file format
    pub format: SaveFormat,
    /// Frames per output file
    pub file_split: Option<u64>,
    /// Write the settings and background sidecars
    pub save_settings: bool,
    /// Verify embedded frame counters while writing
    pub check_status_line: bool,
    /// Host values merged into the settings sidecar
    pub extra_settings: Option<Value>,
}

impl SaveRequest {
    /// Request with defaults: raw format, append, no limits.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            batch_size: None,
            append: true,
            format: SaveFormat::default(),
            file_split: None,
            save_settings: false,
            check_status_line: false,
            extra_settings: None,
        }
    }

    /// Stop after `frames` frames are scheduled.
    pub fn batch_size(mut self, frames: u64) -> Self {
        self.batch_size = Some(frames);
        self
    }

    /// Append to existing files (`true`) or truncate them.
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Output format.
    pub fn format(mut self, format: SaveFormat) -> Self {
        self.format = format;
        self
    }

    /// Select the format by name (`raw`, `bin`, `tiff`, `cam`).
    pub fn format_name(mut self, name: &str) -> AppResult<Self> {
        self.format = name.parse()?;
        Ok(self)
    }

    /// Start a new file every `frames` frames.
    pub fn file_split(mut self, frames: u64) -> Self {
        self.file_split = Some(frames);
        self
    }

    /// Write the settings and background sidecars at session start.
    pub fn save_settings(mut self, enabled: bool) -> Self {
        self.save_settings = enabled;
        self
    }

    /// Check frame counter continuity while writing.
    pub fn check_status_line(mut self, enabled: bool) -> Self {
        self.check_status_line = enabled;
        self
    }

    /// Extra values for the settings sidecar.
    pub fn extra_settings(mut self, extra: Value) -> Self {
        self.extra_settings = Some(extra);
        self
    }

    fn validate(&self) -> AppResult<()> {
        if self.batch_size == Some(0) {
            return Err(DaqError::Configuration("batch size must be positive".into()));
        }
        if self.file_split == Some(0) {
            return Err(DaqError::Configuration("file split must be positive".into()));
        }
        if self.path.file_name().is_none() {
            return Err(DaqError::Configuration(format!(
                "save path {:?} has no file name",
                self.path
            )));
        }
        Ok(())
    }
}

/// Read-only snapshot of the controller for host observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaverStatus {
    /// Current lifecycle state
    pub state: SaveState,
    /// Destination of the current or last session
    pub path: Option<PathBuf>,
    /// Frame limit of the current or last session
    pub batch_size: Option<u64>,
    /// Session counters, see [`FrameCounters`]
    pub received: u64,
    /// Frames admitted
    pub scheduled: u64,
    /// Frames on disk
    pub saved: u64,
    /// Frames lost to gaps or drops
    pub missed: u64,
    /// `None` when no pretrigger buffer is enabled
    pub pretrigger_status: Option<PretriggerStatus>,
    /// Pixel bytes waiting in the queue
    pub queue_ram: u64,
    /// Admission limit
    pub max_queue_ram: u64,
    /// Chunks waiting to be written
    pub queued_chunks: usize,
    /// Result of the counter check
    pub status_line_check: StatusLineCheck,
    /// Output files opened by the session
    pub files_written: u64,
    /// Error that abandoned the last session, if any
    pub last_error: Option<String>,
}

struct Session {
    request: SaveRequest,
    writer: SessionWriter,
    checker: StatusLineChecker,
    event_log: EventLog,
    settings: Option<SettingsDocument>,
    frame_shape: Option<(usize, usize)>,
}

struct PretriggerSlot {
    buffer: PretriggerBuffer,
    enabled: bool,
    clear_on_write: bool,
}

/// Owns the save queue, the pretrigger buffer and the active session.
///
/// All methods are synchronous; the host drives [`dump_queue`](Self::dump_queue)
/// on a timer.
pub struct FrameSaveController {
    settings: ControllerSettings,
    state: SaveState,
    counters: FrameCounters,
    queue: SaveQueue,
    last_seen: Option<u64>,
    session: Option<Session>,
    pretrigger: Option<PretriggerSlot>,
    settings_provider: Option<Box<dyn SettingsProvider>>,
    // Kept after a session ends so the last run stays observable
    last_path: Option<PathBuf>,
    last_batch_size: Option<u64>,
    last_check: StatusLineCheck,
    last_files: u64,
    last_error: Option<String>,
    drop_warned: bool,
}

impl FrameSaveController {
    /// # Errors
    ///
    /// [`DaqError::Configuration`] if `chunks_per_save` is zero.
    pub fn new(settings: ControllerSettings) -> AppResult<Self> {
        if settings.chunks_per_save == 0 {
            return Err(DaqError::Configuration(
                "chunks_per_save must be positive".into(),
            ));
        }
        Ok(Self {
            queue: SaveQueue::new(settings.chunk_period),
            settings,
            state: SaveState::Stopped,
            counters: FrameCounters::default(),
            last_seen: None,
            session: None,
            pretrigger: None,
            settings_provider: None,
            last_path: None,
            last_batch_size: None,
            last_check: StatusLineCheck::Off,
            last_files: 0,
            last_error: None,
            drop_warned: false,
        })
    }

    /// Source of hardware settings for the settings sidecar.
    pub fn set_settings_provider(&mut self, provider: Box<dyn SettingsProvider>) {
        self.settings_provider = Some(provider);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SaveState {
        self.state
    }

    /// Counters of the current or last session.
    pub fn counters(&self) -> FrameCounters {
        self.counters
    }

    /// Pixel bytes currently queued.
    pub fn queue_ram(&self) -> usize {
        self.queue.queue_ram()
    }

    /// Admission limit in bytes.
    pub fn max_queue_ram(&self) -> usize {
        self.settings.max_queue_ram
    }

    /// Static parameters, including the current admission limit.
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    // ---------------------------------------------------------------------
    // Session commands
    // ---------------------------------------------------------------------

    /// Start a new session, finalizing any running one first.
    ///
    /// # Errors
    ///
    /// - [`DaqError::Configuration`] for an invalid request, before any state changes
    /// - [`DaqError::Storage`] if the previous session fails to flush or a sidecar
    ///   cannot be written
    pub fn save_start(&mut self, request: SaveRequest) -> AppResult<()> {
        self.save_start_at(request, Instant::now())
    }

    /// [`save_start`](Self::save_start) with an explicit arrival time for the
    /// replayed pretrigger frames.
    pub fn save_start_at(&mut self, request: SaveRequest, now: Instant) -> AppResult<()> {
        request.validate()?;

        if self.session.is_some() {
            tracing::info!(
                state = %self.state,
                queued = self.queue.frame_count(),
                "New session requested, flushing the running one"
            );
            self.flush_session()?;
        }

        let started = Utc::now();
        let pretrigger_at_start = self.pretrigger_status();
        let settings = if request.save_settings {
            Some(self.capture_settings(&request, started, pretrigger_at_start)?)
        } else {
            None
        };

        let session = Session {
            writer: SessionWriter::new(
                request.format,
                &request.path,
                request.append,
                request.file_split,
            ),
            checker: StatusLineChecker::new(request.check_status_line),
            event_log: EventLog::new(
                &sidecar::sidecar_path(&request.path, "_events.txt"),
                started,
                request.append,
            ),
            settings,
            frame_shape: None,
            request,
        };

        self.counters = FrameCounters::default();
        self.queue.clear();
        self.last_seen = None;
        self.last_error = None;
        self.drop_warned = false;
        tracing::info!(
            path = ?session.request.path,
            format = %session.request.format,
            batch_size = ?session.request.batch_size,
            file_split = ?session.request.file_split,
            append = session.request.append,
            "Save session started"
        );
        self.session = Some(session);
        self.state = SaveState::Saving;

        self.replay_pretrigger(now);
        Ok(())
    }

    fn capture_settings(
        &self,
        request: &SaveRequest,
        started: DateTime<Utc>,
        pretrigger: Option<PretriggerStatus>,
    ) -> AppResult<SettingsDocument> {
        let mut doc = SettingsDocument::new();
        doc.insert("save/path", &request.path)?;
        doc.insert("save/format", request.format)?;
        doc.insert("save/batch_size", request.batch_size)?;
        doc.insert("save/append", request.append)?;
        doc.insert("save/file_split", request.file_split)?;
        doc.insert("save/check_status_line", request.check_status_line)?;
        if let Some(provider) = &self.settings_provider {
            doc.merge_flattened("settings", &provider.settings());
            if let Some(background) = provider.background() {
                sidecar::write_background(&request.path, &background)?;
            }
        }
        if let Some(extra) = &request.extra_settings {
            doc.merge_flattened("extra", extra);
        }
        doc.insert("session/start", started.to_rfc3339())?;
        doc.insert("pretrigger/status_at_start", pretrigger)?;
        doc.write(&sidecar::sidecar_path(&request.path, "_settings.json"))?;
        Ok(doc)
    }

    fn replay_pretrigger(&mut self, now: Instant) {
        let Some(mut slot) = self.pretrigger.take() else {
            return;
        };
        if slot.enabled && !slot.buffer.is_empty() {
            let snapshot = (!slot.clear_on_write).then(|| slot.buffer.snapshot());
            let mut replayed = 0usize;
            while let Some(bundle) = slot.buffer.pop_oldest() {
                let frames = bundle.frame_count();
                if !self.schedule_message_at(bundle, now) {
                    break;
                }
                replayed += frames;
            }
            match snapshot {
                Some(bundles) => slot.buffer.restore(bundles),
                None => slot.buffer.clear(),
            }
            tracing::info!(frames = replayed, "Replayed pretrigger buffer");
        }
        self.pretrigger = Some(slot);
    }

    /// Stop admitting frames. The session finalizes once the queue drains.
    pub fn save_stop(&mut self) {
        if self.state == SaveState::Saving {
            self.state = SaveState::Stopping;
            tracing::info!(
                queued = self.queue.frame_count(),
                scheduled = self.counters.scheduled,
                "Save stop requested"
            );
        }
    }

    // ---------------------------------------------------------------------
    // Admission
    // ---------------------------------------------------------------------

    /// [`schedule_message_at`](Self::schedule_message_at) with the current time.
    pub fn schedule_message(&mut self, bundle: FrameBundle) -> bool {
        self.schedule_message_at(bundle, Instant::now())
    }

    /// Admit a bundle that arrived at `now`. Returns whether any frame was queued.
    pub fn schedule_message_at(&mut self, mut bundle: FrameBundle, now: Instant) -> bool {
        if self.state != SaveState::Saving {
            return false;
        }
        let batch_size = self.session.as_ref().and_then(|s| s.request.batch_size);
        if let Some(limit) = batch_size {
            let remaining = limit.saturating_sub(self.counters.scheduled);
            bundle.cut_to_size(usize::try_from(remaining).unwrap_or(usize::MAX), false);
            if remaining == 0 {
                self.save_stop();
            }
        }
        if bundle.is_empty() {
            return false;
        }

        let frames = bundle.frame_count() as u64;
        let last_index = bundle.last_index();
        self.counters.missed += bundle.missing_frames(self.last_seen);

        // An empty queue admits any bundle
        let admitted = self.queue.is_empty()
            || self.queue.queue_ram() + bundle.byte_size() <= self.settings.max_queue_ram;
        if admitted {
            if let Some(session) = self.session.as_mut() {
                session.frame_shape = session.frame_shape.or(bundle.frame_shape());
            }
            self.queue.push(bundle, now);
            self.counters.scheduled += frames;
        } else {
            self.counters.missed += frames;
            if !self.drop_warned {
                tracing::warn!(
                    queue_ram = self.queue.queue_ram(),
                    max_queue_ram = self.settings.max_queue_ram,
                    "Save queue full, dropping frames"
                );
                self.drop_warned = true;
            }
            tracing::debug!(frames, missed = self.counters.missed, "Dropped bundle");
        }

        self.last_seen = last_index.or(self.last_seen);
        self.counters.received += frames;

        if admitted && batch_size.is_some_and(|limit| self.counters.scheduled >= limit) {
            self.save_stop();
        }
        admitted
    }

    /// [`receive_frames_at`](Self::receive_frames_at) with the current time.
    pub fn receive_frames(&mut self, bundle: FrameBundle) -> bool {
        self.receive_frames_at(bundle, Instant::now())
    }

    /// Subscription entry point: schedule while saving, otherwise retain the
    /// bundle in the pretrigger buffer if one is enabled.
    pub fn receive_frames_at(&mut self, bundle: FrameBundle, now: Instant) -> bool {
        if self.state == SaveState::Saving {
            return self.schedule_message_at(bundle, now);
        }
        if let Some(slot) = self.pretrigger.as_mut().filter(|slot| slot.enabled) {
            slot.buffer.add_frame_bundle(bundle);
        }
        false
    }

    // ---------------------------------------------------------------------
    // Draining
    // ---------------------------------------------------------------------

    /// Periodic job: write up to `chunks_per_save` chunks, then finalize if a
    /// stop was requested and the queue is empty.
    ///
    /// # Errors
    ///
    /// A writer or sidecar failure abandons the session (state `Stopped`, queue
    /// discarded) and is returned as [`DaqError::Storage`].
    pub fn dump_queue(&mut self) -> AppResult<()> {
        if self.session.is_none() {
            return Ok(());
        }
        for _ in 0..self.settings.chunks_per_save {
            let Some(chunk) = self.queue.pop_chunk() else {
                break;
            };
            if chunk.is_empty() {
                continue;
            }
            if let Err(err) = self.write_chunk(chunk) {
                return Err(self.abandon(err));
            }
        }
        if self.queue.is_empty() && self.state == SaveState::Stopping {
            self.finalize()?;
        }
        Ok(())
    }

    fn write_chunk(&mut self, chunk: Chunk) -> anyhow::Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        session.checker.check_chunk(&chunk.bundles);
        for bundle in &chunk.bundles {
            for slab in bundle.slabs() {
                session.writer.write(&slab.view())?;
            }
        }
        self.counters.saved += chunk.frames as u64;
        tracing::trace!(frames = chunk.frames, saved = self.counters.saved, "Chunk written");
        Ok(())
    }

    fn flush_session(&mut self) -> AppResult<()> {
        while let Some(chunk) = self.queue.pop_chunk() {
            if let Err(err) = self.write_chunk(chunk) {
                return Err(self.abandon(err));
            }
        }
        self.finalize()
    }

    fn abandon(&mut self, err: anyhow::Error) -> DaqError {
        tracing::error!(error = %format!("{err:#}"), "Save session abandoned");
        if let Some(session) = self.session.take() {
            self.remember(&session);
        }
        self.queue.clear();
        self.state = SaveState::Stopped;
        self.last_error = Some(format!("{err:#}"));
        DaqError::Storage(err)
    }

    fn remember(&mut self, session: &Session) {
        self.last_path = Some(session.request.path.clone());
        self.last_batch_size = session.request.batch_size;
        self.last_check = session.checker.state();
        self.last_files = session.writer.files_opened();
    }

    fn finalize(&mut self) -> AppResult<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        self.state = SaveState::Stopped;
        self.remember(&session);

        let closed = session.writer.close();
        let logged = session.event_log.finish(self.counters.scheduled);
        let documented = match session.settings.take() {
            Some(doc) => self.finalize_settings(doc, &session),
            None => Ok(()),
        };

        tracing::info!(
            path = ?session.request.path,
            saved = self.counters.saved,
            scheduled = self.counters.scheduled,
            missed = self.counters.missed,
            received = self.counters.received,
            status_line_check = %session.checker.state(),
            "Save session finished"
        );
        closed.and(logged).and(documented).map_err(|err| {
            self.last_error = Some(format!("{err:#}"));
            DaqError::Storage(err)
        })
    }

    fn finalize_settings(&self, mut doc: SettingsDocument, session: &Session) -> anyhow::Result<()> {
        doc.insert("frames/saved", self.counters.saved)?;
        doc.insert("frames/scheduled", self.counters.scheduled)?;
        doc.insert("frames/missed", self.counters.missed)?;
        doc.insert("frames/received", self.counters.received)?;
        doc.insert("frames/status_line_check", session.checker.state())?;
        doc.insert("frames/shape", session.frame_shape.map(|(r, c)| [r, c]))?;
        doc.insert("frames/dtype", "<u2")?;
        doc.insert("session/stop", Utc::now().to_rfc3339())?;
        doc.insert("pretrigger/status_at_stop", self.pretrigger_status())?;
        doc.write(&sidecar::sidecar_path(&session.request.path, "_settings.json"))
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------

    /// Configure the pretrigger buffer.
    ///
    /// `enabled = false` detaches the buffer without forgetting its settings.
    /// `preserve_frames` keeps already buffered frames (trimmed to the new size).
    /// `clear_on_write = false` restores the buffer after it is replayed into a
    /// new session.
    ///
    /// # Errors
    ///
    /// [`DaqError::InvalidCapacity`] if `size` is zero.
    pub fn setup_pretrigger(
        &mut self,
        size: usize,
        enabled: bool,
        preserve_frames: bool,
        clear_on_write: bool,
    ) -> AppResult<()> {
        if size == 0 {
            return Err(DaqError::InvalidCapacity(0));
        }
        let resized = match self.pretrigger.as_mut() {
            Some(slot) if preserve_frames => {
                slot.buffer.set_capacity(size)?;
                slot.enabled = enabled;
                slot.clear_on_write = clear_on_write;
                true
            }
            _ => false,
        };
        if !resized {
            let buffer = PretriggerBuffer::new(
                size,
                self.settings.pretrigger_strict_size,
                self.settings.pretrigger_clear_on_reset,
            )?;
            self.pretrigger = Some(PretriggerSlot {
                buffer,
                enabled,
                clear_on_write,
            });
        }
        tracing::info!(size, enabled, preserve_frames, clear_on_write, "Pretrigger configured");
        Ok(())
    }

    /// Drop every bundle held in the pretrigger buffer.
    pub fn clear_pretrigger(&mut self) {
        if let Some(slot) = self.pretrigger.as_mut() {
            slot.buffer.clear();
        }
    }

    /// Status of the enabled pretrigger buffer, `None` if there is none.
    pub fn pretrigger_status(&self) -> Option<PretriggerStatus> {
        self.pretrigger
            .as_ref()
            .filter(|slot| slot.enabled)
            .map(|slot| slot.buffer.status())
    }

    /// Change the admission limit. Takes effect for the next bundle.
    pub fn setup_queue_ram(&mut self, max_queue_ram: usize) {
        self.settings.max_queue_ram = max_queue_ram;
        tracing::info!(max_queue_ram, "Save queue RAM limit set");
    }

    /// Append a line to the session's event log.
    ///
    /// Returns `false` without writing when no session is active.
    pub fn write_event_log(&mut self, message: &str) -> AppResult<bool> {
        let scheduled = self.counters.scheduled;
        let Some(session) = self.session.as_mut() else {
            tracing::debug!(message, "No active session, event not logged");
            return Ok(false);
        };
        session.event_log.write(message, scheduled)?;
        Ok(true)
    }

    /// Snapshot for host observation.
    pub fn status(&self) -> SaverStatus {
        let (path, batch_size, status_line_check, files_written) = match &self.session {
            Some(session) => (
                Some(session.request.path.clone()),
                session.request.batch_size,
                session.checker.state(),
                session.writer.files_opened(),
            ),
            None => (
                self.last_path.clone(),
                self.last_batch_size,
                self.last_check,
                self.last_files,
            ),
        };
        SaverStatus {
            state: self.state,
            path,
            batch_size,
            received: self.counters.received,
            scheduled: self.counters.scheduled,
            saved: self.counters.saved,
            missed: self.counters.missed,
            pretrigger_status: self.pretrigger_status(),
            queue_ram: self.queue.queue_ram() as u64,
            max_queue_ram: self.settings.max_queue_ram as u64,
            queued_chunks: self.queue.chunk_count(),
            status_line_check,
            files_written,
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::TempDir;

    fn bundle(first: u64, frames: usize) -> FrameBundle {
        let stack = Array3::from_shape_fn((frames, 2, 2), |(f, _, _)| (first as usize + f) as u16);
        FrameBundle::from_stack(stack.into_shared(), first, 1).unwrap()
    }

    fn controller() -> FrameSaveController {
        FrameSaveController::new(ControllerSettings::default()).unwrap()
    }

    #[test]
    fn test_zero_chunks_per_save_rejected() {
        let settings = ControllerSettings {
            chunks_per_save: 0,
            ..Default::default()
        };
        assert!(FrameSaveController::new(settings).is_err());
    }

    #[test]
    fn test_idle_controller_schedules_nothing() {
        let mut ctrl = controller();
        assert!(!ctrl.schedule_message(bundle(1, 3)));
        assert!(!ctrl.receive_frames(bundle(4, 3)));
        assert_eq!(ctrl.counters(), FrameCounters::default());
        assert_eq!(ctrl.pretrigger_status(), None);
    }

    #[test]
    fn test_invalid_request_leaves_state_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let mut ctrl = controller();
        let request = SaveRequest::new(temp_dir.path().join("run.bin")).batch_size(0);
        assert!(ctrl.save_start(request).unwrap_err().is_configuration());
        assert_eq!(ctrl.state(), SaveState::Stopped);

        assert!(matches!(
            SaveRequest::new("run.bin").format_name("avi"),
            Err(DaqError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_batch_budget_truncates_and_stops() {
        let temp_dir = TempDir::new().unwrap();
        let mut ctrl = controller();
        ctrl.save_start(SaveRequest::new(temp_dir.path().join("run.bin")).batch_size(5))
            .unwrap();

        let t0 = Instant::now();
        assert!(ctrl.schedule_message_at(bundle(1, 3), t0));
        assert!(ctrl.schedule_message_at(bundle(4, 3), t0));
        assert_eq!(ctrl.counters().scheduled, 5);
        assert_eq!(ctrl.state(), SaveState::Stopping);
        assert!(!ctrl.schedule_message_at(bundle(7, 3), t0));

        ctrl.dump_queue().unwrap();
        assert_eq!(ctrl.state(), SaveState::Stopped);
        assert_eq!(ctrl.counters().saved, 5);
        assert_eq!(
            std::fs::metadata(temp_dir.path().join("run.bin")).unwrap().len(),
            5 * 4 * 2
        );
    }

    #[test]
    fn test_gap_counts_as_missed() {
        let temp_dir = TempDir::new().unwrap();
        let mut ctrl = controller();
        ctrl.save_start(SaveRequest::new(temp_dir.path().join("run.bin")))
            .unwrap();
        ctrl.schedule_message(bundle(1, 2));
        ctrl.schedule_message(bundle(5, 2));
        assert_eq!(ctrl.counters().missed, 2);
        assert_eq!(ctrl.counters().received, 4);
    }

    #[test]
    fn test_receive_frames_fills_pretrigger_when_idle() {
        let mut ctrl = controller();
        ctrl.setup_pretrigger(10, true, true, true).unwrap();
        ctrl.receive_frames(bundle(1, 4));
        ctrl.receive_frames(bundle(5, 4));
        assert_eq!(ctrl.pretrigger_status().unwrap().frames, 8);

        ctrl.setup_pretrigger(10, false, true, true).unwrap();
        ctrl.receive_frames(bundle(9, 4));
        assert_eq!(ctrl.pretrigger_status(), None);

        ctrl.setup_pretrigger(6, true, true, true).unwrap();
        assert_eq!(ctrl.pretrigger_status().unwrap().frames, 6);

        ctrl.setup_pretrigger(6, true, false, true).unwrap();
        assert_eq!(ctrl.pretrigger_status().unwrap().frames, 0);

        assert!(matches!(
            ctrl.setup_pretrigger(0, true, true, true),
            Err(DaqError::InvalidCapacity(0))
        ));
    }

    #[test]
    fn test_pretrigger_kept_when_not_cleared_on_write() {
        let temp_dir = TempDir::new().unwrap();
        let mut ctrl = controller();
        ctrl.setup_pretrigger(10, true, true, false).unwrap();
        ctrl.receive_frames(bundle(1, 4));
        ctrl.save_start(SaveRequest::new(temp_dir.path().join("run.bin")))
            .unwrap();
        assert_eq!(ctrl.counters().scheduled, 4);
        assert_eq!(ctrl.pretrigger_status().unwrap().frames, 4);
    }

    #[test]
    fn test_event_log_requires_session() {
        let temp_dir = TempDir::new().unwrap();
        let mut ctrl = controller();
        assert!(!ctrl.write_event_log("ignored").unwrap());

        ctrl.save_start(SaveRequest::new(temp_dir.path().join("run.bin")))
            .unwrap();
        ctrl.schedule_message(bundle(1, 3));
        assert!(ctrl.write_event_log("valve opened").unwrap());
        ctrl.save_stop();
        ctrl.dump_queue().unwrap();

        let log = std::fs::read_to_string(temp_dir.path().join("run_events.txt")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("\t3\tvalve opened"));
        assert!(lines[2].ends_with("Recording stopped"));
    }

    #[test]
    fn test_write_failure_abandons_session() {
        let temp_dir = TempDir::new().unwrap();
        let mut ctrl = controller();
        let path = temp_dir.path().join("missing_dir").join("run.bin");
        ctrl.save_start(SaveRequest::new(&path)).unwrap();
        ctrl.schedule_message(bundle(1, 3));

        let err = ctrl.dump_queue().unwrap_err();
        assert!(matches!(err, DaqError::Storage(_)));
        let status = ctrl.status();
        assert_eq!(status.state, SaveState::Stopped);
        assert_eq!(status.queue_ram, 0);
        assert!(status.last_error.is_some());
    }

    #[test]
    fn test_restart_flushes_previous_session() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("first.bin");
        let mut ctrl = controller();
        ctrl.save_start(SaveRequest::new(&first)).unwrap();
        ctrl.schedule_message(bundle(1, 3));

        ctrl.save_start(SaveRequest::new(temp_dir.path().join("second.bin")))
            .unwrap();
        assert_eq!(std::fs::metadata(&first).unwrap().len(), 3 * 4 * 2);
        assert_eq!(ctrl.state(), SaveState::Saving);
        assert_eq!(ctrl.counters(), FrameCounters::default());
    }
}
