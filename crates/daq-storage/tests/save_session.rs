//! End-to-end save sessions through the controller.
//!
//! Every test drives admission with explicit arrival times so chunk windows are
//! deterministic, then drains with `dump_queue` as the periodic job would.

use daq_core::{FrameBundle, StatusLine, StatusLineKind, StatusRect};
use daq_storage::{
    BackgroundSnapshot, ControllerSettings, FrameSaveController, SaveFormat, SaveRequest,
    SaveState, SettingsProvider, StatusLineCheck,
};
use ndarray::{Array3, ArrayD, IxDyn};
use serde_json::{json, Value};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const ROWS: usize = 2;
const COLS: usize = 2;
const FRAME_BYTES: usize = ROWS * COLS * 2;

/// Frames whose pixels all hold their own index.
fn bundle(first: u64, frames: usize) -> FrameBundle {
    let stack = Array3::from_shape_fn((frames, ROWS, COLS), |(f, _, _)| (first as usize + f) as u16);
    FrameBundle::from_stack(stack.into_shared(), first, 1).unwrap()
}

/// Frames with a 32-bit counter in the first two pixels of the last row.
fn counted(first: u64, counters: &[u32]) -> FrameBundle {
    let mut stack = Array3::<u16>::zeros((counters.len(), 3, 4));
    for (f, &c) in counters.iter().enumerate() {
        stack[[f, 2, 0]] = (c & 0xFFFF) as u16;
        stack[[f, 2, 1]] = (c >> 16) as u16;
    }
    FrameBundle::from_stack(stack.into_shared(), first, 1)
        .unwrap()
        .with_status_line(StatusLine::new(StatusLineKind::Word32, StatusRect::last_row()))
}

fn controller(chunks_per_save: usize) -> FrameSaveController {
    FrameSaveController::new(ControllerSettings {
        chunk_period: Duration::from_millis(100),
        chunks_per_save,
        ..Default::default()
    })
    .unwrap()
}

/// First pixel of every frame in a raw file of `ROWS x COLS` frames.
fn raw_frames(path: &Path) -> Vec<u16> {
    std::fs::read(path)
        .unwrap()
        .chunks_exact(FRAME_BYTES)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[test]
fn test_queue_ram_admits_exactly_one_bundle() {
    let temp_dir = TempDir::new().unwrap();
    let mut ctrl = controller(1);
    ctrl.setup_queue_ram(4 * FRAME_BYTES);
    ctrl.save_start(SaveRequest::new(temp_dir.path().join("run.raw")))
        .unwrap();

    let t0 = Instant::now();
    assert!(ctrl.schedule_message_at(bundle(1, 4), t0));
    assert!(!ctrl.schedule_message_at(bundle(5, 4), t0));

    let counters = ctrl.counters();
    assert_eq!(counters.scheduled, 4);
    assert_eq!(counters.missed, 4);
    assert_eq!(counters.received, 8);
    assert_eq!(ctrl.queue_ram(), 4 * FRAME_BYTES);
}

#[test]
fn test_backpressure_drops_are_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let mut ctrl = controller(1);
    ctrl.save_start(SaveRequest::new(temp_dir.path().join("run.raw")))
        .unwrap();

    let t0 = Instant::now();
    ctrl.schedule_message_at(bundle(1, 4), t0);
    ctrl.setup_queue_ram(FRAME_BYTES);
    let queued = ctrl.queue_ram();
    assert!(queued > ctrl.max_queue_ram());

    let mut next = 5;
    for size in [3, 1, 6] {
        let missed_before = ctrl.counters().missed;
        assert!(!ctrl.schedule_message_at(bundle(next, size), t0));
        assert_eq!(ctrl.queue_ram(), queued);
        assert_eq!(ctrl.counters().missed, missed_before + size as u64);
        next += size as u64;
    }
}

#[test]
fn test_empty_queue_admits_bundle_larger_than_limit() {
    let temp_dir = TempDir::new().unwrap();
    let mut ctrl = controller(1);
    ctrl.setup_queue_ram(FRAME_BYTES * 4 - 1);
    ctrl.save_start(SaveRequest::new(temp_dir.path().join("run.raw")))
        .unwrap();

    let t0 = Instant::now();
    let mut next = 1;
    for _ in 0..5 {
        assert!(ctrl.schedule_message_at(bundle(next, 4), t0));
        assert!(!ctrl.schedule_message_at(bundle(next + 4, 4), t0));
        ctrl.dump_queue().unwrap();
        next += 8;
    }

    let counters = ctrl.counters();
    assert_eq!(counters.received, 40);
    assert_eq!(counters.scheduled, 20);
    assert_eq!(counters.saved, 20);
    assert_eq!(counters.missed, 20);
}

#[test]
fn test_gap_before_dropped_bundle_counted_once() {
    let temp_dir = TempDir::new().unwrap();
    let mut ctrl = controller(1);
    ctrl.setup_queue_ram(4 * FRAME_BYTES);
    ctrl.save_start(SaveRequest::new(temp_dir.path().join("run.raw")))
        .unwrap();

    let t0 = Instant::now();
    assert!(ctrl.schedule_message_at(bundle(1, 4), t0));
    // 5 and 6 never arrive; 7..=10 hit a full queue
    assert!(!ctrl.schedule_message_at(bundle(7, 2), t0));
    assert!(!ctrl.schedule_message_at(bundle(9, 2), t0));
    assert_eq!(ctrl.counters().missed, 2 + 2 + 2);

    ctrl.dump_queue().unwrap();
    assert!(ctrl.schedule_message_at(bundle(11, 2), t0));

    let counters = ctrl.counters();
    assert_eq!(counters.received, 10);
    assert_eq!(counters.scheduled, 6);
    assert_eq!(counters.missed, 6);
}

#[test]
fn test_stop_waits_for_queued_chunks() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("run.raw");
    let settings_path = temp_dir.path().join("run_settings.json");
    let mut ctrl = controller(1);
    ctrl.save_start(SaveRequest::new(&path).save_settings(true))
        .unwrap();

    let t0 = Instant::now();
    for i in 0..3u64 {
        ctrl.schedule_message_at(bundle(1 + i * 2, 2), t0 + Duration::from_secs(i));
    }
    assert_eq!(ctrl.status().queued_chunks, 3);

    ctrl.save_stop();
    for tick in 1..=2u64 {
        ctrl.dump_queue().unwrap();
        assert_eq!(ctrl.state(), SaveState::Stopping);
        assert_eq!(ctrl.counters().saved, tick * 2);
        assert!(read_json(&settings_path).get("frames/saved").is_none());
    }

    ctrl.dump_queue().unwrap();
    assert_eq!(ctrl.state(), SaveState::Stopped);
    assert_eq!(ctrl.counters().saved, 6);
    assert_eq!(raw_frames(&path), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(read_json(&settings_path)["frames/saved"], json!(6));
}

#[test]
fn test_pretrigger_replays_latest_frames() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("run.raw");
    let mut ctrl = controller(1);
    ctrl.setup_pretrigger(50, true, true, true).unwrap();

    for i in 0..8u64 {
        ctrl.receive_frames(bundle(1 + i * 10, 10));
    }
    assert_eq!(ctrl.pretrigger_status().unwrap().frames, 50);

    let t0 = Instant::now();
    ctrl.save_start_at(SaveRequest::new(&path).append(false), t0)
        .unwrap();
    assert_eq!(ctrl.pretrigger_status().unwrap().frames, 0);
    assert_eq!(ctrl.counters().scheduled, 50);

    ctrl.save_stop();
    ctrl.dump_queue().unwrap();
    assert_eq!(ctrl.state(), SaveState::Stopped);
    assert_eq!(raw_frames(&path), (31..=80).collect::<Vec<u16>>());
}

#[test]
fn test_fifo_order_and_conservation_across_split_files() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("run.bin");
    let mut ctrl = controller(2);
    ctrl.save_start(
        SaveRequest::new(&path)
            .format(SaveFormat::Bin)
            .file_split(7)
            .append(false),
    )
    .unwrap();

    let t0 = Instant::now();
    let mut next = 1u64;
    for (i, size) in [3usize, 5, 1, 8, 2, 4, 6, 1, 9].into_iter().enumerate() {
        let at = t0 + Duration::from_millis(70 * i as u64);
        ctrl.receive_frames_at(bundle(next, size), at);
        next += size as u64;
        if i % 2 == 1 {
            ctrl.dump_queue().unwrap();
        }
        let c = ctrl.counters();
        assert!(c.received >= c.scheduled && c.scheduled >= c.saved);
        assert_eq!(
            (c.scheduled - c.saved) as usize,
            ctrl.queue_ram() / FRAME_BYTES
        );
    }
    ctrl.save_stop();
    while ctrl.state() != SaveState::Stopped {
        ctrl.dump_queue().unwrap();
    }

    let total = next - 1;
    assert_eq!(ctrl.counters().saved, total);
    let files = total.div_ceil(7);
    assert_eq!(ctrl.status().files_written, files);

    let mut written = Vec::new();
    for idx in 0..files {
        let file = temp_dir.path().join(format!("run_{:04}.bin", idx));
        let frames = raw_frames(&file);
        assert!(frames.len() <= 7);
        written.extend(frames);
    }
    assert_eq!(written, (1..=total as u16).collect::<Vec<u16>>());
}

#[test]
fn test_status_line_skip_detected_in_tiff_session() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("stack.tiff");
    let mut ctrl = controller(1);
    ctrl.save_start(
        SaveRequest::new(&path)
            .format_name("tiff")
            .unwrap()
            .check_status_line(true),
    )
    .unwrap();
    assert_eq!(ctrl.status().status_line_check, StatusLineCheck::Na);

    let t0 = Instant::now();
    ctrl.schedule_message_at(counted(1, &[100, 101, 102]), t0);
    ctrl.dump_queue().unwrap();
    assert_eq!(ctrl.status().status_line_check, StatusLineCheck::Ok);

    ctrl.schedule_message_at(counted(4, &[103, 105, 106]), t0 + Duration::from_secs(1));
    ctrl.schedule_message_at(counted(7, &[106]), t0 + Duration::from_secs(2));
    ctrl.save_stop();
    while ctrl.state() != SaveState::Stopped {
        ctrl.dump_queue().unwrap();
    }
    assert_eq!(ctrl.status().status_line_check, StatusLineCheck::Skip);

    let file = std::fs::File::open(&path).unwrap();
    let mut decoder = tiff::decoder::Decoder::new(std::io::BufReader::new(file)).unwrap();
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image().unwrap();
        pages += 1;
    }
    assert_eq!(pages, 7);
}

struct LabSettings;

impl SettingsProvider for LabSettings {
    fn settings(&self) -> Value {
        json!({"camera": {"exposure_ms": 5.0, "gain": 2}})
    }

    fn background(&self) -> Option<BackgroundSnapshot> {
        Some(BackgroundSnapshot {
            data: ArrayD::from_elem(IxDyn(&[ROWS, COLS]), 7u16),
            mode: "average".into(),
        })
    }
}

#[test]
fn test_settings_and_background_sidecars() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("run.cam");
    let mut ctrl = controller(1);
    ctrl.set_settings_provider(Box::new(LabSettings));
    ctrl.setup_pretrigger(4, true, true, true).unwrap();
    ctrl.save_start(
        SaveRequest::new(&path)
            .format(SaveFormat::Cam)
            .batch_size(3)
            .save_settings(true)
            .extra_settings(json!({"operator": "night shift"})),
    )
    .unwrap();

    ctrl.receive_frames(bundle(1, 5));
    assert_eq!(ctrl.state(), SaveState::Stopping);
    ctrl.dump_queue().unwrap();
    assert_eq!(ctrl.state(), SaveState::Stopped);

    let doc = read_json(&temp_dir.path().join("run_settings.json"));
    assert_eq!(doc["save/format"], json!("cam"));
    assert_eq!(doc["save/batch_size"], json!(3));
    assert_eq!(doc["settings/camera/gain"], json!(2));
    assert_eq!(doc["extra/operator"], json!("night shift"));
    assert_eq!(doc["frames/saved"], json!(3));
    assert_eq!(doc["frames/received"], json!(3));
    assert_eq!(doc["frames/shape"], json!([ROWS, COLS]));
    assert_eq!(doc["frames/dtype"], json!("<u2"));
    assert_eq!(doc["pretrigger/status_at_start"]["capacity"], json!(4));
    assert!(doc["session/start"].is_string());
    assert!(doc["session/stop"].is_string());

    let descriptor = read_json(&temp_dir.path().join("run_background.json"));
    assert_eq!(descriptor["shape"], json!([ROWS, COLS]));
    assert_eq!(
        std::fs::metadata(temp_dir.path().join("run_background.bin"))
            .unwrap()
            .len(),
        FRAME_BYTES as u64
    );

    let cam_frame = 8 + FRAME_BYTES as u64;
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 3 * cam_frame);
}
