//! Status-line consistency checker.
//!
//! Reads the embedded hardware counter of every written frame and verifies that
//! consecutive counters advance by exactly the bundle's `step`. The first anomaly
//! is sticky for the rest of the session.

use daq_core::{FrameBundle, RESET_INDEX};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of the status-line check for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLineCheck {
    /// Checking disabled for this session
    #[default]
    Off,
    /// Enabled, nothing evaluated yet
    Na,
    /// Frames carry no readable counter
    None,
    /// Every counter so far advanced by `step`
    Ok,
    /// Zero spacing (duplicated frame)
    Still,
    /// Negative or sub-`step` spacing
    OutOfOrder,
    /// Spacing larger than `step` (dropped frames)
    Skip,
}

impl StatusLineCheck {
    /// Name used in status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLineCheck::Off => "off",
            StatusLineCheck::Na => "na",
            StatusLineCheck::None => "none",
            StatusLineCheck::Ok => "ok",
            StatusLineCheck::Still => "still",
            StatusLineCheck::OutOfOrder => "out_of_order",
            StatusLineCheck::Skip => "skip",
        }
    }

    /// Whether further chunks are still evaluated in this state.
    pub fn accepts_updates(&self) -> bool {
        matches!(self, StatusLineCheck::Na | StatusLineCheck::Ok)
    }

    /// Transition table: `off` never changes, `na`/`ok` move to the observed
    /// state, every other state is terminal.
    pub fn transition(self, observed: StatusLineCheck) -> StatusLineCheck {
        match self {
            StatusLineCheck::Off => StatusLineCheck::Off,
            StatusLineCheck::Na | StatusLineCheck::Ok => observed,
            sticky => sticky,
        }
    }
}

impl fmt::Display for StatusLineCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks counter continuity across chunks.
#[derive(Debug, Clone)]
pub struct StatusLineChecker {
    state: StatusLineCheck,
    last_counter: Option<u64>,
}

impl StatusLineChecker {
    /// Starts in `na`, or `off` when disabled.
    pub fn new(enabled: bool) -> Self {
        Self {
            state: if enabled {
                StatusLineCheck::Na
            } else {
                StatusLineCheck::Off
            },
            last_counter: None,
        }
    }

    /// Current check result.
    pub fn state(&self) -> StatusLineCheck {
        self.state
    }

    /// Check the frames of one chunk, in arrival order.
    pub fn check_chunk(&mut self, bundles: &[FrameBundle]) -> StatusLineCheck {
        if !self.state.accepts_updates() {
            return self.state;
        }
        for bundle in bundles {
            let observed = self.check_bundle(bundle);
            self.state = self.state.transition(observed);
            if !self.state.accepts_updates() {
                tracing::warn!(state = %self.state, "Status line check degraded");
                break;
            }
        }
        self.state
    }

    fn check_bundle(&mut self, bundle: &FrameBundle) -> StatusLineCheck {
        let Some(status_line) = bundle.status_line() else {
            return StatusLineCheck::None;
        };
        if bundle.first_index() == Some(RESET_INDEX) {
            self.last_counter = None;
        }
        let bits = status_line.kind.counter_bits();
        let step = bundle.step();

        for slab in bundle.slabs() {
            let Some(counters) = status_line.counters(&slab.view()) else {
                return StatusLineCheck::None;
            };
            for counter in counters {
                if let Some(last) = self.last_counter {
                    let observed = classify(wrapped_diff(last, counter, bits), step);
                    if observed != StatusLineCheck::Ok {
                        self.last_counter = Some(counter);
                        return observed;
                    }
                }
                self.last_counter = Some(counter);
            }
        }
        StatusLineCheck::Ok
    }
}

/// Signed difference `current - last` modulo `2^bits`.
fn wrapped_diff(last: u64, current: u64, bits: u32) -> i64 {
    let modulus = 1i128 << bits;
    let mut diff = (i128::from(current) - i128::from(last)).rem_euclid(modulus);
    if diff >= modulus / 2 {
        diff -= modulus;
    }
    diff as i64
}

fn classify(diff: i64, step: u64) -> StatusLineCheck {
    let step = i64::try_from(step).unwrap_or(i64::MAX);
    if diff == 0 {
        StatusLineCheck::Still
    } else if diff < step {
        StatusLineCheck::OutOfOrder
    } else if diff > step {
        StatusLineCheck::Skip
    } else {
        StatusLineCheck::Ok
    }
}
