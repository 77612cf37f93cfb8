//! Settings and background sidecar files written next to a session's data.

use anyhow::{Context, Result};
use ndarray::ArrayD;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Host-side source of the settings captured when a session starts.
pub trait SettingsProvider: Send {
    /// Full settings tree of the host. Nested objects are flattened into
    /// `/`-separated keys in the sidecar.
    fn settings(&self) -> Value;

    /// Background frame to store alongside the data, if the host keeps one.
    fn background(&self) -> Option<BackgroundSnapshot> {
        None
    }
}

/// Background image saved next to the data.
#[derive(Debug, Clone)]
pub struct BackgroundSnapshot {
    /// Background pixels
    pub data: ArrayD<u16>,
    /// How the background was acquired (e.g. "average", "single")
    pub mode: String,
}

/// `<stem><suffix>` next to the data path.
pub fn sidecar_path(data_path: &Path, suffix: &str) -> PathBuf {
    let stem = data_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("frames");
    data_path.with_file_name(format!("{}{}", stem, suffix))
}

/// Flat settings document keyed by `/`-separated paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SettingsDocument(BTreeMap<String, Value>);

impl SettingsDocument {
    /// Empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `value` under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value).context("Failed to serialize setting")?;
        self.0.insert(key.into(), value);
        Ok(())
    }

    /// Insert `value` under `prefix`, flattening nested objects.
    pub fn merge_flattened(&mut self, prefix: &str, value: &Value) {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    self.merge_flattened(&format!("{}/{}", prefix, key), child);
                }
            }
            other => {
                self.0.insert(prefix.to_string(), other.clone());
            }
        }
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when no key is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Write the document as pretty-printed JSON, replacing any existing file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Failed to create settings {:?}", path))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, &self.0)
            .with_context(|| format!("Failed to write settings {:?}", path))?;
        out.flush()?;
        tracing::debug!(path = ?path, keys = self.0.len(), "Wrote settings sidecar");
        Ok(())
    }
}

/// Dump a background snapshot as `<stem>_background.bin` plus a JSON descriptor.
///
/// Returns the path of the binary file.
pub fn write_background(data_path: &Path, background: &BackgroundSnapshot) -> Result<PathBuf> {
    let bin_path = sidecar_path(data_path, "_background.bin");
    let bytes: Vec<u8> = background
        .data
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    std::fs::write(&bin_path, bytes)
        .with_context(|| format!("Failed to write background {:?}", bin_path))?;

    let descriptor = json!({
        "size": background.data.len(),
        "dtype": "<u2",
        "shape": background.data.shape(),
        "mode": background.mode,
    });
    let desc_path = sidecar_path(data_path, "_background.json");
    std::fs::write(&desc_path, serde_json::to_vec_pretty(&descriptor)?)
        .with_context(|| format!("Failed to write background descriptor {:?}", desc_path))?;

    tracing::info!(path = ?bin_path, elements = background.data.len(), "Saved background");
    Ok(bin_path)
}
