//! # Proficiency Evaluation
//!
//! Turns a sealed measure into a new proficiency value.
//!
//! The engine only depends on the [`ProficiencyEvaluator`] trait. The
//! [`ScoringEvaluator`] shipped here does the scoring half: detecting which
//! notes were actually played is left to a [`Transcriber`].
//!
//! ## Scoring
//! Expected notes are matched in order against the detected frequencies. A
//! detected note matches when it lies within one semitone of the expected
//! frequency; each match consumes the detected notes up to and including it,
//! and the first expected note without a match ends the search.
//!
//! The proficiency then moves toward the difficulty that was played:
//!
//! ```text
//! base = (difficulty - current) * 0.5
//! base < 0:  current + base * (1 - accuracy)
//! base >= 0: current + max(0.1, base) * accuracy
//! ```
//!
//! ```rust
//! use etude::evaluator::next_proficiency;
//!
//! assert_eq!(next_proficiency(5.0, 3.0, 1.0), 4.0);
//! assert_eq!(next_proficiency(5.0, 6.0, 0.5), 5.75);
//! ```

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::capture::CapturedSegment;
use crate::error::EtudeError;

/// Ratio of one equal-tempered semitone.
pub const SEMITONE: f64 = 1.059463094;

/// Evaluation request for one measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProficiencyRequest {
    pub captured_samples: Vec<f32>,
    /// `(frequency_hz, duration_ms)` in playing order
    pub expected_notes: Vec<(f64, f64)>,
    pub difficulty_tier: u8,
    pub sample_rate: u32,
}

impl ProficiencyRequest {
    pub fn from_segment(segment: &CapturedSegment, difficulty_tier: u8) -> Self {
        Self {
            captured_samples: segment.samples.clone(),
            expected_notes: segment
                .expected_notes
                .iter()
                .map(|n| (n.frequency_hz, n.duration_ms))
                .collect(),
            difficulty_tier,
            sample_rate: segment.sample_rate,
        }
    }

    /// JSON body for a remote scoring service.
    pub fn to_json(&self) -> Result<String, EtudeError> {
        serde_json::to_string(self).map_err(|e| EtudeError::EvaluatorError(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProficiencyResponse {
    pub proficiency: f64,
}

impl ProficiencyResponse {
    pub fn from_json(body: &str) -> Result<Self, EtudeError> {
        serde_json::from_str(body).map_err(|e| EtudeError::EvaluatorError(e.to_string()))
    }
}

/// Scores captured measures.
///
/// Called off the playback task; implementations may block.
pub trait ProficiencyEvaluator: Send + Sync {
    fn evaluate(&self, request: &ProficiencyRequest) -> Result<ProficiencyResponse, EtudeError>;
}

/// Detects the notes played in a block of samples.
pub trait Transcriber: Send + Sync {
    /// Fundamental frequency of every detected note, in playing order.
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f64>, EtudeError>;
}

/// Share of expected notes found, in order, among the detected ones.
///
/// `None` when nothing was expected.
pub fn note_accuracy(expected: &[f64], detected: &[f64]) -> Option<f64> {
    if expected.is_empty() {
        return None;
    }

    let mut matched = 0usize;
    let mut rest = detected;
    for frequency in expected {
        let low = frequency / SEMITONE;
        let high = frequency * SEMITONE;
        match rest.iter().position(|d| low < *d && *d < high) {
            Some(i) => {
                matched += 1;
                rest = &rest[i + 1..];
            }
            None => break,
        }
        if rest.is_empty() {
            break;
        }
    }

    Some(matched as f64 / expected.len() as f64)
}

/// Proficiency after playing at `difficulty` with the given accuracy.
pub fn next_proficiency(difficulty: f64, current: f64, accuracy: f64) -> f64 {
    let accuracy = accuracy.clamp(0.0, 1.0);
    let base = (difficulty - current) * 0.5;
    if base < 0.0 {
        current + base * (1.0 - accuracy)
    } else {
        current + base.max(0.1) * accuracy
    }
}

/// Rolling proficiency scored from transcribed notes.
pub struct ScoringEvaluator<T: Transcriber> {
    transcriber: T,
    proficiency: Mutex<f64>,
}

impl<T: Transcriber> ScoringEvaluator<T> {
    pub fn new(transcriber: T, initial_proficiency: f64) -> Self {
        Self {
            transcriber,
            proficiency: Mutex::new(initial_proficiency),
        }
    }

    pub fn proficiency(&self) -> f64 {
        match self.proficiency.lock() {
            Ok(p) => *p,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl<T: Transcriber> ProficiencyEvaluator for ScoringEvaluator<T> {
    fn evaluate(&self, request: &ProficiencyRequest) -> Result<ProficiencyResponse, EtudeError> {
        let expected: Vec<f64> = request.expected_notes.iter().map(|(f, _)| *f).collect();
        let mut current = self
            .proficiency
            .lock()
            .map_err(|_| EtudeError::EvaluatorError("proficiency state poisoned".to_string()))?;

        if expected.is_empty() {
            log::debug!("Nothing expected in this measure, proficiency unchanged");
            return Ok(ProficiencyResponse {
                proficiency: *current,
            });
        }
        let detected = self
            .transcriber
            .transcribe(&request.captured_samples, request.sample_rate)?;
        let accuracy = note_accuracy(&expected, &detected).unwrap_or(0.0);

        let updated = next_proficiency(request.difficulty_tier as f64, *current, accuracy);
        log::debug!(
            "Accuracy {:.2} at tier {}: proficiency {:.2} -> {:.2}",
            accuracy,
            request.difficulty_tier,
            *current,
            updated
        );
        *current = updated;
        Ok(ProficiencyResponse {
            proficiency: updated,
        })
    }
}
