//! # Performance Capture
//!
//! Records the player's performance and cuts it into one segment per measure.
//!
//! ## Sub-modules
//! - `segmenter` - `CaptureSegmenter`, driven by measure boundaries
//! - `device` - CPAL input device (`audio-device` feature)
//!
//! ## Segments
//! A [`CapturedSegment`] holds the samples captured while the cursor was in
//! one measure, together with the notes the player was expected to play
//! there as `(frequency_hz, duration_ms)` pairs. Expected durations are
//! rescaled so that they add up to the captured duration of the segment:
//! with a sum of 2000 ms expected and 2100 ms captured, every duration is
//! multiplied by 1.05.
//!
//! When the input device is missing or access is denied, segments are still
//! sealed with their expected notes and no samples.

#[cfg(feature = "audio-device")]
mod device;
pub mod segmenter;

#[cfg(feature = "audio-device")]
pub use device::DeviceCapture;
pub use segmenter::CaptureSegmenter;

use serde::{Deserialize, Serialize};

use crate::error::EtudeError;
use crate::score::MeasureLabel;

/// Format granted by the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    /// `None` when the device does not say; the configured rate is assumed
    pub sample_rate: Option<u32>,
}

/// Audio input used for performance capture.
pub trait CaptureDevice: Send {
    /// Ask for the device. Denial or absence is an error.
    fn request_access(&mut self) -> Result<CaptureFormat, EtudeError>;

    /// Next buffered mono frame, if any. Never blocks.
    fn read_next_frame(&mut self) -> Option<Vec<f32>>;

    /// Give the device back. `request_access` may be called again later.
    fn release(&mut self);
}

/// Stand-in when no input device is configured.
#[derive(Debug, Default, Clone)]
pub struct NoCapture;

impl CaptureDevice for NoCapture {
    fn request_access(&mut self) -> Result<CaptureFormat, EtudeError> {
        Err(EtudeError::DeviceError("no capture device configured".to_string()))
    }

    fn read_next_frame(&mut self) -> Option<Vec<f32>> {
        None
    }

    fn release(&mut self) {}
}

/// A note the player was expected to play.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedNote {
    pub frequency_hz: f64,
    pub duration_ms: f64,
}

/// Captured audio and expected notes of one measure.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedSegment {
    pub label: MeasureLabel,
    /// In playing order, durations already rescaled to the capture
    pub expected_notes: Vec<ExpectedNote>,
    /// Mono samples
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Wall-clock time the cursor spent in the measure
    pub elapsed_ms: f64,
}

impl CapturedSegment {
    /// Length of the captured audio, or the wall-clock time in the measure
    /// when nothing was captured.
    pub fn captured_duration_ms(&self) -> f64 {
        if self.samples.is_empty() || self.sample_rate == 0 {
            return self.elapsed_ms;
        }
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// Multiply every duration by `actual_ms / sum(expected)`.
///
/// Left unchanged when either side is zero.
pub fn scale_expected(notes: &[ExpectedNote], actual_ms: f64) -> Vec<ExpectedNote> {
    let expected_ms: f64 = notes.iter().map(|n| n.duration_ms).sum();
    if expected_ms <= 0.0 || actual_ms <= 0.0 {
        return notes.to_vec();
    }
    let factor = actual_ms / expected_ms;
    notes
        .iter()
        .map(|n| ExpectedNote {
            frequency_hz: n.frequency_hz,
            duration_ms: n.duration_ms * factor,
        })
        .collect()
}
