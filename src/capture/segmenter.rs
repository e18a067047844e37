//! Measure-synchronized segmentation of captured audio

use tokio::time::Instant;

use super::{scale_expected, CaptureDevice, CapturedSegment, ExpectedNote};
use crate::error::EtudeError;
use crate::score::MeasureLabel;

#[derive(Debug)]
struct OpenSegment {
    label: MeasureLabel,
    expected: Vec<ExpectedNote>,
    samples: Vec<f32>,
    started: Instant,
}

/// Cuts the capture stream at measure boundaries.
///
/// The scheduler reports every boundary of the main track; the segmenter
/// keeps at most one open segment and seals it exactly once, either at the
/// next boundary or at stop.
pub struct CaptureSegmenter {
    device: Box<dyn CaptureDevice>,
    default_sample_rate: u32,
    sample_rate: u32,
    /// A recording session is running
    recording: bool,
    /// The device granted access for this session
    buffering: bool,
    open: Option<OpenSegment>,
}

impl CaptureSegmenter {
    pub fn new(device: Box<dyn CaptureDevice>, default_sample_rate: u32) -> Self {
        Self {
            device,
            default_sample_rate,
            sample_rate: default_sample_rate,
            recording: false,
            buffering: false,
            open: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn open_label(&self) -> Option<&MeasureLabel> {
        self.open.as_ref().map(|s| &s.label)
    }

    /// Begin a recording session.
    ///
    /// The session starts even when the device refuses; segments are then
    /// sealed without samples and the device error is returned once so the
    /// caller can tell the user.
    pub fn start_session(&mut self) -> Result<(), EtudeError> {
        self.recording = true;
        self.open = None;
        match self.device.request_access() {
            Ok(format) => {
                self.buffering = true;
                self.sample_rate = format.sample_rate.unwrap_or(self.default_sample_rate);
                log::debug!("Capture session started at {}Hz", self.sample_rate);
                Ok(())
            }
            Err(e) => {
                self.buffering = false;
                self.sample_rate = self.default_sample_rate;
                log::warn!("Capture unavailable, recording expected notes only: {}", e);
                Err(e)
            }
        }
    }

    /// The cursor entered `label`. Seals a segment left open, if any.
    pub fn on_measure_enter(&mut self, label: &MeasureLabel, now: Instant) -> Option<CapturedSegment> {
        if !self.recording {
            return None;
        }
        let leftover = self.seal(now);
        if let Some(segment) = &leftover {
            log::debug!("Measure '{}' entered without exiting '{}'", label, segment.label);
        }
        self.open = Some(OpenSegment {
            label: label.clone(),
            expected: Vec::new(),
            samples: Vec::new(),
            started: now,
        });
        leftover
    }

    /// The cursor left `label`. Seals its segment.
    pub fn on_measure_exit(&mut self, label: &MeasureLabel, now: Instant) -> Option<CapturedSegment> {
        if !self.recording {
            return None;
        }
        self.pump();
        if let Some(open) = &self.open {
            if &open.label != label {
                log::warn!("Exit of '{}' while '{}' is open", label, open.label);
            }
        }
        self.seal(now)
    }

    /// Add a note the player should play in the open segment.
    pub fn record_expected(&mut self, frequency_hz: f64, duration_ms: f64) {
        if let Some(open) = self.open.as_mut() {
            open.expected.push(ExpectedNote {
                frequency_hz,
                duration_ms,
            });
        }
    }

    /// Move buffered device frames into the open segment.
    pub fn pump(&mut self) {
        if !self.buffering {
            return;
        }
        while let Some(frame) = self.device.read_next_frame() {
            match self.open.as_mut() {
                Some(open) => open.samples.extend_from_slice(&frame),
                None => log::trace!("Dropped {} samples outside of a measure", frame.len()),
            }
        }
    }

    /// End the session: seal the open segment and release the device.
    pub fn on_stop(&mut self, now: Instant) -> Option<CapturedSegment> {
        if !self.recording {
            return None;
        }
        self.pump();
        let sealed = self.seal(now);
        if self.buffering {
            self.device.release();
        }
        self.recording = false;
        self.buffering = false;
        log::debug!("Capture session ended");
        sealed
    }

    fn seal(&mut self, now: Instant) -> Option<CapturedSegment> {
        let open = self.open.take()?;
        let elapsed_ms = now.saturating_duration_since(open.started).as_secs_f64() * 1000.0;

        let mut segment = CapturedSegment {
            label: open.label,
            expected_notes: Vec::new(),
            samples: open.samples,
            sample_rate: self.sample_rate,
            elapsed_ms,
        };
        segment.expected_notes = scale_expected(&open.expected, segment.captured_duration_ms());

        log::debug!(
            "Sealed measure '{}': {} expected notes, {} samples, {:.1} ms",
            segment.label,
            segment.expected_notes.len(),
            segment.samples.len(),
            elapsed_ms
        );
        Some(segment)
    }
}
