//! Multi-track step scheduler
//!
//! Every track is a chain of steps. A step reads the cursor, triggers sound,
//! reports measure boundaries, and sets the time of the track's next step.
//! The scheduler itself never sleeps: the player task waits for
//! `next_due()` and calls `run_due()`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::types::{PlaybackStyle, SchedulerEvent, TrackRole};
use crate::capture::{CaptureDevice, CaptureSegmenter};
use crate::config::EngineConfig;
use crate::error::EtudeError;
use crate::score::{Fraction, MeasureLabel, Score, ScoreWalker, VoiceEntry, Walker};
use crate::synth::{GuardedSynth, ToneSynth};
use crate::timing::{beat_ms, duration_ms};

/// Length of one step: the longest note among the simultaneous entries.
///
/// Entries without a usable duration take `fallback_ms`; a step without
/// entries lasts the measure's nominal duration when it is known.
pub fn step_duration_ms(
    entries: &[VoiceEntry],
    nominal: Option<Fraction>,
    bpm: f64,
    fallback_ms: f64,
) -> f64 {
    if entries.is_empty() {
        return nominal
            .map(|d| duration_ms(d.value(), bpm))
            .filter(|ms| *ms > 0.0)
            .unwrap_or(fallback_ms);
    }
    let longest = entries
        .iter()
        .flat_map(|e| e.notes.iter())
        .map(|n| duration_ms(n.duration.value(), bpm))
        .fold(0.0, f64::max);
    if longest > 0.0 {
        longest
    } else {
        fallback_ms
    }
}

/// What to start playing.
#[derive(Debug, Clone)]
pub(crate) struct Lineup {
    pub main: Arc<Score>,
    pub style: PlaybackStyle,
    pub accompaniment: Option<Arc<Score>>,
    pub record: bool,
}

struct Track {
    role: TrackRole,
    walker: Option<Box<dyn Walker>>,
    next_due: Option<Instant>,
    /// The cursor still points at the step played last
    advance_pending: bool,
    last_label: Option<MeasureLabel>,
}

impl Track {
    fn new(role: TrackRole, walker: Option<Box<dyn Walker>>, now: Instant) -> Self {
        Self {
            role,
            walker,
            next_due: Some(now),
            advance_pending: false,
            last_label: None,
        }
    }
}

enum StepOutcome {
    Scheduled,
    /// Track finished on its own; the others go on
    Idle,
    /// The cursor track reached the end
    Finished,
}

/// Tracks sharing one play/pause state.
///
/// Track 0 is always the cursor track; it alone drives capture segmentation
/// and scroll requests.
pub(crate) struct Scheduler {
    config: EngineConfig,
    tracks: Vec<Track>,
    synth: GuardedSynth,
    capture: CaptureSegmenter,
    running: bool,
    bpm: f64,
    events: Vec<SchedulerEvent>,
}

impl Scheduler {
    pub(crate) fn new(
        config: EngineConfig,
        synth: Box<dyn ToneSynth>,
        capture: Box<dyn CaptureDevice>,
    ) -> Self {
        let sample_rate = config.capture.sample_rate;
        let bpm = config.tempo.base_bpm;
        Self {
            config,
            tracks: Vec::new(),
            synth: GuardedSynth::new(synth),
            capture: CaptureSegmenter::new(capture, sample_rate),
            running: false,
            bpm,
            events: Vec::new(),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    /// Start every track of `lineup` with its first step due at `now`.
    ///
    /// Playback already running is stopped first. Fails only when the cursor
    /// walker cannot be built.
    pub(crate) fn start(&mut self, bpm: f64, lineup: Lineup, now: Instant) -> Result<(), EtudeError> {
        if self.running {
            self.stop(now);
        }

        let main_walker = ScoreWalker::new(lineup.main)?;
        let mut tracks = vec![Track::new(
            lineup.style.main_role(),
            Some(Box::new(main_walker)),
            now,
        )];
        match lineup.style {
            PlaybackStyle::Metronome => tracks.push(Track::new(TrackRole::Metronome, None, now)),
            PlaybackStyle::Accompaniment => {
                if let Some(score) = lineup.accompaniment {
                    match ScoreWalker::new(score) {
                        Ok(walker) => tracks.push(Track::new(
                            TrackRole::Accompaniment,
                            Some(Box::new(walker)),
                            now,
                        )),
                        Err(e) => self.notice(format!("Accompaniment not playable: {}", e)),
                    }
                }
            }
            PlaybackStyle::Score => {}
        }

        if let Some(notice) = self.synth.open() {
            self.notice(notice);
        }
        if lineup.record {
            if let Err(e) = self.capture.start_session() {
                self.notice(format!("Recording unavailable: {}", e));
            }
        }

        self.tracks = tracks;
        self.bpm = bpm;
        self.running = true;
        log::debug!(
            "Playback started: {} tracks, {} style, {:.1} BPM",
            self.tracks.len(),
            lineup.style,
            bpm
        );
        Ok(())
    }

    /// Cancel every pending step, seal the open segment and release devices.
    ///
    /// Safe to call at any time, any number of times.
    pub(crate) fn stop(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        self.running = false;
        for track in &mut self.tracks {
            track.next_due = None;
        }
        if let Some(segment) = self.capture.on_stop(now) {
            self.events.push(SchedulerEvent::SegmentSealed(segment));
        }
        self.synth.close();
        self.tracks.clear();
        log::debug!("Playback stopped");
    }

    /// Earliest pending step over all tracks.
    pub(crate) fn next_due(&self) -> Option<Instant> {
        if !self.running {
            return None;
        }
        self.tracks.iter().filter_map(|t| t.next_due).min()
    }

    pub(crate) fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm;
    }

    pub(crate) fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Measure under the cursor track.
    pub(crate) fn main_label(&self) -> Option<MeasureLabel> {
        self.tracks
            .first()
            .and_then(|t| t.walker.as_ref())
            .and_then(|w| w.current_measure_label())
    }

    /// Point the cursor track at a new version of its score.
    pub(crate) fn reload_main(&mut self, score: Arc<Score>) {
        if let Some(walker) = self.tracks.first_mut().and_then(|t| t.walker.as_mut()) {
            walker.reload(score);
        }
    }

    /// Captured audio is waiting in a device queue.
    pub(crate) fn is_capturing(&self) -> bool {
        self.running && self.capture.is_buffering()
    }

    /// Move queued capture frames into the open segment between steps.
    pub(crate) fn pump_capture(&mut self) {
        if self.running {
            self.capture.pump();
        }
    }

    pub(crate) fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Run every step due at `now`, in track order.
    pub(crate) fn run_due(&mut self, now: Instant) {
        let mut index = 0;
        while self.running && index < self.tracks.len() {
            let due = self.tracks[index].next_due.is_some_and(|at| at <= now);
            if due {
                match self.step(index, now) {
                    StepOutcome::Scheduled => {}
                    StepOutcome::Idle => self.tracks[index].next_due = None,
                    StepOutcome::Finished => {
                        log::debug!("Reached the end of the score");
                        self.stop(now);
                        self.events.push(SchedulerEvent::Finished);
                        return;
                    }
                }
            }
            index += 1;
        }
    }

    fn step(&mut self, index: usize, now: Instant) -> StepOutcome {
        match self.tracks[index].role {
            TrackRole::Metronome => self.step_metronome(index, now),
            _ => self.step_walker(index, now),
        }
    }

    fn step_metronome(&mut self, index: usize, now: Instant) -> StepOutcome {
        let beat = beat_ms(self.bpm);
        let click = self.config.metronome.click_ms.min(beat * 0.2);
        if let Some(notice) = self.synth.play(&[self.config.metronome.frequency_hz], click) {
            self.notice(notice);
        }
        self.tracks[index].next_due = Some(now + self.delay(beat));
        StepOutcome::Scheduled
    }

    fn step_walker(&mut self, index: usize, now: Instant) -> StepOutcome {
        let loop_accompaniment = self.config.loop_accompaniment;
        let fallback = self.config.rest_fallback_ms as f64;
        let bpm = self.bpm;
        let is_main = index == 0;

        let track = &mut self.tracks[index];
        let Some(walker) = track.walker.as_mut() else {
            return StepOutcome::Idle;
        };

        if track.advance_pending {
            walker.advance();
            track.advance_pending = false;
        }

        if walker.at_end() {
            match track.role {
                TrackRole::Accompaniment if loop_accompaniment => {
                    log::trace!("Accompaniment loops");
                    walker.reset();
                }
                TrackRole::Accompaniment => return StepOutcome::Idle,
                _ => return StepOutcome::Finished,
            }
        }

        let entries = walker.current_voice_entries();
        let label = walker.current_measure_label();
        let duration = step_duration_ms(&entries, walker.current_measure_duration(), bpm, fallback);
        let role = track.role;

        if is_main {
            self.capture.pump();
            let previous = track.last_label.clone();
            if label != previous {
                if let Some(previous) = &previous {
                    if let Some(segment) = self.capture.on_measure_exit(previous, now) {
                        self.events.push(SchedulerEvent::SegmentSealed(segment));
                    }
                }
                if let Some(label) = &label {
                    if let Some(segment) = self.capture.on_measure_enter(label, now) {
                        self.events.push(SchedulerEvent::SegmentSealed(segment));
                    }
                    self.events.push(SchedulerEvent::ScrollToMeasure {
                        label: label.clone(),
                        smooth: previous.is_some(),
                    });
                }
                track.last_label = label;
            }
            for note in entries.iter().flat_map(|e| e.notes.iter()) {
                if let Some(pitch) = note.pitch {
                    self.capture
                        .record_expected(pitch.frequency(), duration_ms(note.duration.value(), bpm));
                }
            }
        }

        track.advance_pending = true;
        track.next_due = Some(now + Duration::from_millis(
            (duration.round() as u64).max(self.config.min_step_floor_ms),
        ));

        if role.sounds_notes() {
            let frequencies: Vec<f64> = entries
                .iter()
                .flat_map(|e| e.notes.iter())
                .filter_map(|n| n.pitch.map(|p| p.frequency()))
                .collect();
            log::trace!("{:?} step: {} notes, {:.1} ms", role, frequencies.len(), duration);
            if let Some(notice) = self.synth.play(&frequencies, duration) {
                self.notice(notice);
            }
        }

        StepOutcome::Scheduled
    }

    fn delay(&self, ms: f64) -> Duration {
        Duration::from_millis((ms.round() as u64).max(self.config.min_step_floor_ms))
    }

    fn notice(&mut self, message: String) {
        log::warn!("{}", message);
        self.events.push(SchedulerEvent::Notice(message));
    }
}
