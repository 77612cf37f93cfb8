//! Per-session event log.
//!
//! One tab-separated line per event: unix time, seconds since session start,
//! frame index, message. The file is opened lazily by the first entry, which is
//! preceded by a synthetic "Recording started" line.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Tab-separated event file next to the frame data.
pub struct EventLog {
    path: PathBuf,
    session_start: DateTime<Utc>,
    append: bool,
    started: bool,
}

impl EventLog {
    /// Nothing is written until the first [`write`](Self::write).
    pub fn new(path: &Path, session_start: DateTime<Utc>, append: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            session_start,
            append,
            started: false,
        }
    }

    /// Append `message` tagged with `frame_index`.
    pub fn write(&mut self, message: &str, frame_index: u64) -> Result<()> {
        if !self.started {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(self.append)
                .truncate(!self.append)
                .open(&self.path)
                .with_context(|| format!("Failed to open event log {:?}", self.path))?;
            file.write_all(self.line(self.session_start, 0, "Recording started").as_bytes())?;
            self.started = true;
        }
        self.append_line(&self.line(Utc::now(), frame_index, message))
    }

    /// Append the terminal "Recording stopped" line if the log was used.
    pub fn finish(&mut self, frame_index: u64) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        self.append_line(&self.line(Utc::now(), frame_index, "Recording stopped"))
    }

    fn line(&self, at: DateTime<Utc>, frame_index: u64, message: &str) -> String {
        let unix = at.timestamp_millis() as f64 / 1000.0;
        let elapsed = (at - self.session_start).num_milliseconds() as f64 / 1000.0;
        format!("{:.3}\t{:.3}\t{}\t{}\n", unix, elapsed, frame_index, message)
    }

    fn append_line(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open event log {:?}", self.path))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to event log {:?}", self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fields(line: &str) -> Vec<String> {
        line.split('\t').map(str::to_string).collect()
    }

    #[test]
    fn test_lazy_start_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run_events.txt");
        let mut log = EventLog::new(&path, Utc::now(), false);

        log.finish(0).unwrap();
        assert!(!path.exists());

        log.write("shutter open", 42).unwrap();
        log.finish(50).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(fields(lines[0])[1..], ["0.000", "0", "Recording started"]);
        assert_eq!(fields(lines[1])[2..], ["42", "shutter open"]);
        assert_eq!(fields(lines[2])[2..], ["50", "Recording stopped"]);
    }

    #[test]
    fn test_fresh_session_truncates() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run_events.txt");
        std::fs::write(&path, "old line\n").unwrap();

        let mut log = EventLog::new(&path, Utc::now(), false);
        log.write("first", 1).unwrap();
        assert!(!std::fs::read_to_string(&path).unwrap().contains("old line"));

        let mut appended = EventLog::new(&path, Utc::now(), true);
        appended.write("second", 2).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 4);
    }
}
