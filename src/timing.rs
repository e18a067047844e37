//! # Timing
//!
//! Conversions between notated time and wall-clock time, and between pitch
//! indices and frequencies.
//!
//! Relative durations are fractions of a whole note, so a quarter note is
//! `0.25` and lasts one beat:
//!
//! ```rust
//! use etude::timing::duration_ms;
//!
//! assert_eq!(duration_ms(0.25, 120.0), 500.0);
//! assert_eq!(duration_ms(1.0, 60.0), 4000.0);
//! ```

use serde::{Deserialize, Serialize};

/// Reference pitch index (A4).
pub const REFERENCE_PITCH: u8 = 69;
/// Frequency of the reference pitch in Hz.
pub const REFERENCE_FREQUENCY: f64 = 440.0;

/// Wall-clock length of a relative duration at `bpm` quarter notes per minute.
///
/// Non-positive tempos yield zero so callers fall back to their minimum step.
pub fn duration_ms(relative: f64, bpm: f64) -> f64 {
    if bpm <= 0.0 || relative <= 0.0 {
        return 0.0;
    }
    relative * (60_000.0 / bpm) * 4.0
}

/// Length of one beat (quarter note).
pub fn beat_ms(bpm: f64) -> f64 {
    duration_ms(0.25, bpm)
}

/// Equal-tempered frequency of a linear pitch index.
pub fn frequency(pitch_index: u8) -> f64 {
    REFERENCE_FREQUENCY * 2f64.powf((pitch_index as f64 - REFERENCE_PITCH as f64) / 12.0)
}

/// Base tempo plus a user offset.
///
/// The effective tempo never drops below `min_bpm`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    pub base_bpm: f64,
    pub offset: f64,
    pub offset_step: f64,
    pub min_bpm: f64,
}

impl Tempo {
    pub fn new(base_bpm: f64, offset_step: f64, min_bpm: f64) -> Self {
        Self {
            base_bpm,
            offset: 0.0,
            offset_step,
            min_bpm,
        }
    }

    pub fn bpm(&self) -> f64 {
        (self.base_bpm + self.offset).max(self.min_bpm)
    }

    /// Set the offset, clamped so that `bpm()` stays at or above the floor.
    pub fn set_offset(&mut self, offset: f64) {
        self.offset = offset.max(self.min_bpm - self.base_bpm);
    }

    pub fn step_up(&mut self) {
        self.set_offset(self.offset + self.offset_step);
    }

    pub fn step_down(&mut self) {
        self.set_offset(self.offset - self.offset_step);
    }
}
