//! Playback type definitions
//!
//! Track roles, playback styles, and the command/event vocabulary between the
//! player task and its UI.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adaptive::DifficultySetting;
use crate::capture::CapturedSegment;
use crate::error::EtudeError;
use crate::score::{MeasureLabel, Score};

/// What a track does with the positions it walks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackRole {
    /// Moves the cursor, reports measures, stays silent
    Display,
    /// Moves the cursor and sounds the notes
    Tone,
    /// Clicks every beat, walks no score
    Metronome,
    /// Sounds its own score, looping
    Accompaniment,
}

impl TrackRole {
    pub fn sounds_notes(&self) -> bool {
        matches!(self, TrackRole::Tone | TrackRole::Accompaniment)
    }
}

/// Which tracks play next to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStyle {
    /// The score itself is sounded
    #[default]
    Score,
    /// Silent score, metronome clicks
    Metronome,
    /// Silent score, accompaniment track
    Accompaniment,
}

impl PlaybackStyle {
    /// Next style in the UI cycle. Accompaniment is skipped when none is
    /// loaded.
    pub fn next(self, has_accompaniment: bool) -> Self {
        match self {
            PlaybackStyle::Score => PlaybackStyle::Metronome,
            PlaybackStyle::Metronome if has_accompaniment => PlaybackStyle::Accompaniment,
            PlaybackStyle::Metronome => PlaybackStyle::Score,
            PlaybackStyle::Accompaniment => PlaybackStyle::Score,
        }
    }

    /// Role of the cursor track under this style.
    pub fn main_role(self) -> TrackRole {
        match self {
            PlaybackStyle::Score => TrackRole::Tone,
            _ => TrackRole::Display,
        }
    }
}

impl fmt::Display for PlaybackStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackStyle::Score => "score",
            PlaybackStyle::Metronome => "metronome",
            PlaybackStyle::Accompaniment => "accompaniment",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for PlaybackStyle {
    type Err = EtudeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "score" => Ok(PlaybackStyle::Score),
            "metronome" => Ok(PlaybackStyle::Metronome),
            "accompaniment" => Ok(PlaybackStyle::Accompaniment),
            other => Err(EtudeError::ConfigError(format!(
                "unknown playback style '{}' (expected score, metronome or accompaniment)",
                other
            ))),
        }
    }
}

/// Requests to the player task.
#[derive(Debug, Clone)]
pub enum Command {
    Play,
    Pause,
    /// Absolute offset from the base tempo, in BPM
    SetTempoOffset(f64),
    TempoUp,
    TempoDown,
    /// 0 selects the adaptive score
    SetDifficulty(u8),
    /// Takes effect at the next start
    SetRecordingEnabled(bool),
    SetStyle(PlaybackStyle),
    CycleStyle,
    /// MusicXML document of the accompaniment
    LoadAccompaniment(String),
    /// Proficiency from outside the evaluator
    ReportProficiency(f64),
    Shutdown,
}

/// Notifications from the player task.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    PlaybackStarted {
        style: PlaybackStyle,
        tier: u8,
        bpm: f64,
    },
    PlaybackStopped,
    /// The cursor entered a measure; `smooth` is false for the first one
    ScrollToMeasure {
        label: MeasureLabel,
        smooth: bool,
    },
    SegmentSealed {
        label: MeasureLabel,
        expected_notes: usize,
        samples: usize,
    },
    ProficiencyUpdated(f64),
    /// The score under the cursor changed and should be re-rendered
    ScoreChanged {
        tier: u8,
        score: Arc<Score>,
        patched_from: Option<MeasureLabel>,
        difficulty_map: Vec<DifficultySetting>,
    },
    TempoChanged(f64),
    StyleChanged(PlaybackStyle),
    /// Degraded feature, shown once
    Notice(String),
    /// A request failed; playback state is unchanged
    Error(String),
}

/// Scheduler output, turned into `PlayerEvent`s by the player.
#[derive(Debug, Clone)]
pub(crate) enum SchedulerEvent {
    ScrollToMeasure { label: MeasureLabel, smooth: bool },
    SegmentSealed(CapturedSegment),
    Notice(String),
    /// The cursor track reached the end of its score
    Finished,
}
