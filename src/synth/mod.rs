//! # Tone Synthesis
//!
//! Short sine tones for the notes under the cursor and for metronome clicks.
//!
//! The scheduler talks to a [`ToneSynth`] only through [`GuardedSynth`],
//! which turns every synthesis failure into a log entry plus at most one
//! user-visible notice per playback session. A broken output device never
//! stops playback.
//!
//! ## Implementations
//! - [`SilentSynth`] - logs tones, produces no sound (always available)
//! - `DeviceSynth` - default output device through CPAL (`audio-device` feature)

#[cfg(feature = "audio-device")]
mod device;

#[cfg(feature = "audio-device")]
pub use device::DeviceSynth;

use crate::error::EtudeError;

/// Sound output used by the playback tracks.
pub trait ToneSynth: Send {
    /// Acquire output resources. Called at every playback start.
    fn open(&mut self) -> Result<(), EtudeError> {
        Ok(())
    }

    /// Start a tone that lasts `duration_ms`. Must not block for the tone's
    /// duration.
    fn play_tone(&mut self, frequency: f64, duration_ms: f64) -> Result<(), EtudeError>;

    /// Start several tones together.
    fn play_chord(&mut self, frequencies: &[f64], duration_ms: f64) -> Result<(), EtudeError> {
        for frequency in frequencies {
            self.play_tone(*frequency, duration_ms)?;
        }
        Ok(())
    }

    /// Release output resources. A later `open()` must work again.
    fn close(&mut self) {}
}

/// Synth that only logs what it would play.
#[derive(Debug, Default, Clone)]
pub struct SilentSynth;

impl ToneSynth for SilentSynth {
    fn play_tone(&mut self, frequency: f64, duration_ms: f64) -> Result<(), EtudeError> {
        log::trace!("tone {:.2} Hz for {:.1} ms", frequency, duration_ms);
        Ok(())
    }
}

/// Failure-isolating wrapper around the configured synth.
pub(crate) struct GuardedSynth {
    inner: Box<dyn ToneSynth>,
    disabled: bool,
    notified: bool,
}

impl GuardedSynth {
    pub(crate) fn new(inner: Box<dyn ToneSynth>) -> Self {
        Self {
            inner,
            disabled: false,
            notified: false,
        }
    }

    /// Start of a session. Returns a notice if the output cannot be opened.
    pub(crate) fn open(&mut self) -> Option<String> {
        self.disabled = false;
        self.notified = false;
        match self.inner.open() {
            Ok(()) => None,
            Err(e) => self.fail(e),
        }
    }

    /// Play a chord (or a single tone). Returns a notice on the first failure
    /// of the session.
    pub(crate) fn play(&mut self, frequencies: &[f64], duration_ms: f64) -> Option<String> {
        if self.disabled || frequencies.is_empty() {
            return None;
        }
        let result = if frequencies.len() == 1 {
            self.inner.play_tone(frequencies[0], duration_ms)
        } else {
            self.inner.play_chord(frequencies, duration_ms)
        };
        match result {
            Ok(()) => None,
            Err(e) => self.fail(e),
        }
    }

    pub(crate) fn close(&mut self) {
        self.inner.close();
    }

    fn fail(&mut self, error: EtudeError) -> Option<String> {
        log::error!("Tone synthesis failed, muting for this session: {}", error);
        self.disabled = true;
        if self.notified {
            return None;
        }
        self.notified = true;
        Some(format!("Audio output unavailable: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct FlakySynth {
        calls: Arc<Mutex<usize>>,
    }

    impl ToneSynth for FlakySynth {
        fn play_tone(&mut self, _frequency: f64, _duration_ms: f64) -> Result<(), EtudeError> {
            *self.calls.lock().unwrap() += 1;
            Err(EtudeError::DeviceError("device closed".to_string()))
        }
    }

    #[test]
    fn test_guarded_synth_reports_once_and_mutes() {
        let calls = Arc::new(Mutex::new(0));
        let mut synth = GuardedSynth::new(Box::new(FlakySynth {
            calls: Arc::clone(&calls),
        }));

        assert!(synth.open().is_none());
        let notice = synth.play(&[440.0], 100.0);
        assert!(notice.unwrap().contains("device closed"));
        assert!(synth.play(&[440.0], 100.0).is_none());
        assert!(synth.play(&[440.0, 550.0], 100.0).is_none());
        assert_eq!(*calls.lock().unwrap(), 1);

        // A new session tries again
        assert!(synth.open().is_none());
        assert!(synth.play(&[440.0], 100.0).is_some());
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_empty_chord_is_silent() {
        let mut synth = GuardedSynth::new(Box::new(SilentSynth));
        assert!(synth.play(&[], 100.0).is_none());
        assert!(synth.play(&[261.63, 329.63], 100.0).is_none());
    }
}
