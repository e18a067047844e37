//! Cursor over a score
//!
//! A walker visits every distinct onset of every measure in document order.
//! All parts are read together, so one step yields the simultaneous voice
//! entries of the whole score at that onset.

use std::sync::Arc;

use serde::Serialize;

use super::types::*;
use crate::error::EtudeError;

/// Read-only snapshot of a walker's cursor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackPosition {
    pub label: MeasureLabel,
    /// Sequential measure index
    pub measure_index: usize,
    /// Step index inside the measure
    pub entry_index: usize,
    /// First part with an entry at this onset
    pub part_index: usize,
    /// Musical time since the start of the score
    pub timestamp: Fraction,
}

/// Stateful cursor used by the playback scheduler.
///
/// Each track owns one walker; nothing else advances it.
pub trait Walker: Send {
    /// Move the cursor back to the first onset of the first measure.
    fn reset(&mut self);

    /// Move to the next onset, crossing into the next measure when needed.
    /// Does nothing once `at_end` is true.
    fn advance(&mut self);

    fn at_end(&self) -> bool;

    fn current_measure_label(&self) -> Option<MeasureLabel>;

    /// Every voice entry (all parts) starting at the current onset.
    fn current_voice_entries(&self) -> Vec<VoiceEntry>;

    /// Nominal duration of the current measure, when the score declares one.
    fn current_measure_duration(&self) -> Option<Fraction>;

    fn position(&self) -> Option<PlaybackPosition>;

    /// Swap in a new version of the score, keeping the cursor where it is.
    fn reload(&mut self, score: Arc<Score>);
}

/// Walker over the in-memory score model.
#[derive(Debug, Clone)]
pub struct ScoreWalker {
    score: Arc<Score>,
    /// Distinct sorted onsets per measure, across all parts
    onsets: Vec<Vec<Fraction>>,
    /// Musical start time of every measure
    starts: Vec<Fraction>,
    measure: usize,
    step: usize,
}

impl ScoreWalker {
    /// Build a walker positioned at the first onset.
    ///
    /// Fails with `EmptyScore` when there is nothing to walk.
    pub fn new(score: Arc<Score>) -> Result<Self, EtudeError> {
        if score.measure_count() == 0 {
            return Err(EtudeError::EmptyScore);
        }
        let (onsets, starts) = index_score(&score);
        Ok(Self {
            score,
            onsets,
            starts,
            measure: 0,
            step: 0,
        })
    }

    fn current_onset(&self) -> Option<Fraction> {
        self.onsets
            .get(self.measure)
            .and_then(|steps| steps.get(self.step))
            .copied()
    }
}

fn index_score(score: &Score) -> (Vec<Vec<Fraction>>, Vec<Fraction>) {
    let count = score.measure_count();
    let mut onsets = Vec::with_capacity(count);
    let mut starts = Vec::with_capacity(count);
    let mut start = Fraction::ZERO;

    for index in 0..count {
        let mut steps: Vec<Fraction> = Vec::new();
        let mut length = Fraction::ZERO;
        for part in &score.parts {
            if let Some(measure) = part.measures.get(index) {
                steps.extend(measure.entries.iter().map(|e| e.offset));
                length = length.max(measure.duration());
            }
        }
        steps.sort();
        steps.dedup();
        if steps.is_empty() {
            // An empty measure still takes one (silent) step
            steps.push(Fraction::ZERO);
        }
        onsets.push(steps);
        starts.push(start);
        start = start + length;
    }

    (onsets, starts)
}

impl Walker for ScoreWalker {
    fn reset(&mut self) {
        self.measure = 0;
        self.step = 0;
    }

    fn advance(&mut self) {
        if self.at_end() {
            return;
        }
        self.step += 1;
        if self.step >= self.onsets[self.measure].len() {
            self.measure += 1;
            self.step = 0;
        }
    }

    fn at_end(&self) -> bool {
        self.measure >= self.onsets.len()
    }

    fn current_measure_label(&self) -> Option<MeasureLabel> {
        self.score.label_at(self.measure).cloned()
    }

    fn current_voice_entries(&self) -> Vec<VoiceEntry> {
        let Some(onset) = self.current_onset() else {
            return Vec::new();
        };
        self.score
            .parts
            .iter()
            .filter_map(|part| part.measures.get(self.measure))
            .flat_map(|measure| measure.entries.iter().filter(|e| e.offset == onset))
            .cloned()
            .collect()
    }

    fn current_measure_duration(&self) -> Option<Fraction> {
        self.score
            .parts
            .iter()
            .filter_map(|part| part.measures.get(self.measure))
            .find_map(|measure| measure.nominal_duration)
    }

    fn position(&self) -> Option<PlaybackPosition> {
        let onset = self.current_onset()?;
        let label = self.score.label_at(self.measure)?.clone();
        let part_index = self
            .score
            .parts
            .iter()
            .position(|part| {
                part.measures
                    .get(self.measure)
                    .is_some_and(|m| m.entries.iter().any(|e| e.offset == onset))
            })
            .unwrap_or(0);

        Some(PlaybackPosition {
            label,
            measure_index: self.measure,
            entry_index: self.step,
            part_index,
            timestamp: self.starts[self.measure] + onset,
        })
    }

    fn reload(&mut self, score: Arc<Score>) {
        let onset = self.current_onset();
        let (onsets, starts) = index_score(&score);
        self.score = score;
        self.onsets = onsets;
        self.starts = starts;

        if self.at_end() {
            self.measure = self.onsets.len();
            self.step = 0;
            return;
        }

        // Stay at the same musical offset inside the current measure
        let steps = &self.onsets[self.measure];
        self.step = match onset {
            Some(onset) => steps.iter().position(|o| *o >= onset).unwrap_or(steps.len()),
            None => 0,
        };
        if self.step >= steps.len() {
            self.measure += 1;
            self.step = 0;
        }
    }
}
