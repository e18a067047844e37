//! Score model type definitions
//!
//! Score → Parts → Measures → Voice Entries → Notes.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::error::EtudeError;
use crate::timing;

/// A non-negative rational number of whole notes.
///
/// Always stored in lowest terms, so structural equality is numeric equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fraction {
    numerator: u32,
    denominator: u32,
}

impl Fraction {
    pub const ZERO: Fraction = Fraction {
        numerator: 0,
        denominator: 1,
    };

    /// Build a reduced fraction. A zero denominator yields `ZERO`.
    pub fn new(numerator: u32, denominator: u32) -> Self {
        if denominator == 0 || numerator == 0 {
            return Self::ZERO;
        }
        let g = gcd(numerator as u64, denominator as u64) as u32;
        Self {
            numerator: numerator / g,
            denominator: denominator / g,
        }
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    pub fn is_zero(&self) -> bool {
        self.numerator == 0
    }

    /// Value in whole notes.
    pub fn value(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    fn from_u64(numerator: u64, denominator: u64) -> Self {
        if numerator == 0 || denominator == 0 {
            return Self::ZERO;
        }
        let g = gcd(numerator, denominator);
        let (n, d) = (numerator / g, denominator / g);
        if n > u32::MAX as u64 || d > u32::MAX as u64 {
            // Fall back to the nearest representable value in 1/1024ths.
            let approx = (n as f64 / d as f64 * 1024.0).round() as u32;
            return Self::new(approx, 1024);
        }
        Self::new(n as u32, d as u32)
    }
}

impl Default for Fraction {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for Fraction {
    type Output = Fraction;

    fn add(self, rhs: Fraction) -> Fraction {
        let n = self.numerator as u64 * rhs.denominator as u64
            + rhs.numerator as u64 * self.denominator as u64;
        let d = self.denominator as u64 * rhs.denominator as u64;
        Fraction::from_u64(n, d)
    }
}

/// Saturating subtraction: never goes below zero.
impl Sub for Fraction {
    type Output = Fraction;

    fn sub(self, rhs: Fraction) -> Fraction {
        let lhs = self.numerator as u64 * rhs.denominator as u64;
        let rhs_n = rhs.numerator as u64 * self.denominator as u64;
        let d = self.denominator as u64 * rhs.denominator as u64;
        Fraction::from_u64(lhs.saturating_sub(rhs_n), d)
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let lhs = self.numerator as u64 * other.denominator as u64;
        let rhs = other.numerator as u64 * self.denominator as u64;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

pub(crate) fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

/// Least common multiple, `None` when it does not fit in a `u64`.
pub(crate) fn lcm(a: u64, b: u64) -> Option<u64> {
    (a / gcd(a, b)).checked_mul(b)
}

/// Stable, document-level identifier of a measure.
///
/// Shared by every difficulty variant of a piece and used as the splice key.
/// Distinct from the measure's sequential index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeasureLabel(String);

impl MeasureLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeasureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MeasureLabel {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<usize> for MeasureLabel {
    fn from(n: usize) -> Self {
        Self(n.to_string())
    }
}

/// Written pitch (step, alteration, octave).
///
/// The spelling is kept so a re-serialized score reads the same as its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pitch {
    pub step: char,
    pub alter: i8,
    pub octave: i8,
}

impl Pitch {
    pub fn new(step: char, alter: i8, octave: i8) -> Self {
        Self { step, alter, octave }
    }

    /// Linear pitch index (C4 = 60), clamped to `0..=127`.
    pub fn index(&self) -> u8 {
        let base = match self.step.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => 0,
        };
        let index = (self.octave as i32 + 1) * 12 + base + self.alter as i32;
        index.clamp(0, 127) as u8
    }

    pub fn frequency(&self) -> f64 {
        timing::frequency(self.index())
    }
}

/// A single note or rest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    /// `None` marks a rest.
    pub pitch: Option<Pitch>,
    pub duration: Fraction,
}

impl Note {
    pub fn pitched(pitch: Pitch, duration: Fraction) -> Self {
        Self {
            pitch: Some(pitch),
            duration,
        }
    }

    pub fn rest(duration: Fraction) -> Self {
        Self {
            pitch: None,
            duration,
        }
    }

    pub fn is_rest(&self) -> bool {
        self.pitch.is_none()
    }
}

/// Notes of one voice that start together (a single note or a chord).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub voice: u8,
    /// Onset relative to the start of the measure.
    pub offset: Fraction,
    pub notes: Vec<Note>,
}

impl VoiceEntry {
    pub fn new(voice: u8, offset: Fraction, notes: Vec<Note>) -> Self {
        Self { voice, offset, notes }
    }

    /// Longest note in the entry.
    pub fn length(&self) -> Fraction {
        self.notes
            .iter()
            .map(|n| n.duration)
            .max()
            .unwrap_or(Fraction::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSignature {
    pub beats: u8,
    pub beat_type: u8,
}

impl TimeSignature {
    pub fn new(beats: u8, beat_type: u8) -> Self {
        Self { beats, beat_type }
    }

    /// Nominal measure length in whole notes.
    pub fn measure_duration(&self) -> Fraction {
        Fraction::new(self.beats as u32, self.beat_type as u32)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            beats: 4,
            beat_type: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Measure {
    pub label: MeasureLabel,
    /// Time signature declared in this measure, if any.
    pub time: Option<TimeSignature>,
    /// Nominal duration from the time signature in effect.
    pub nominal_duration: Option<Fraction>,
    /// Entries ordered by offset, then voice.
    pub entries: Vec<VoiceEntry>,
}

impl Measure {
    pub fn new(label: impl Into<MeasureLabel>) -> Self {
        Self {
            label: label.into(),
            time: None,
            nominal_duration: None,
            entries: Vec::new(),
        }
    }

    /// Nominal duration, or the end of the last sounding entry when unknown.
    pub fn duration(&self) -> Fraction {
        if let Some(d) = self.nominal_duration {
            return d;
        }
        self.entries
            .iter()
            .map(|e| e.offset + e.length())
            .max()
            .unwrap_or(Fraction::ZERO)
    }

    /// True when the musical content (everything except the label) matches.
    pub fn same_content(&self, other: &Measure) -> bool {
        self.time == other.time
            && self.nominal_duration == other.nominal_duration
            && self.entries == other.entries
    }

    /// Copy the musical content of `other`, keeping this measure's label.
    pub fn replace_content(&mut self, other: &Measure) {
        self.time = other.time;
        self.nominal_duration = other.nominal_duration;
        self.entries = other.entries.clone();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: String,
    pub name: Option<String>,
    pub measures: Vec<Measure>,
}

impl Part {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            measures: Vec::new(),
        }
    }
}

/// A complete score document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub title: Option<String>,
    /// Tempo marking in BPM, if the document carries one.
    pub tempo: Option<f64>,
    pub parts: Vec<Part>,
}

impl Score {
    pub fn new(parts: Vec<Part>) -> Self {
        Self {
            title: None,
            tempo: None,
            parts,
        }
    }

    /// Number of measures (taken from the first part; all parts agree).
    pub fn measure_count(&self) -> usize {
        self.parts.first().map_or(0, |p| p.measures.len())
    }

    /// Measure labels in document order.
    pub fn labels(&self) -> Vec<MeasureLabel> {
        self.parts
            .first()
            .map(|p| p.measures.iter().map(|m| m.label.clone()).collect())
            .unwrap_or_default()
    }

    pub fn label_at(&self, index: usize) -> Option<&MeasureLabel> {
        self.parts
            .first()
            .and_then(|p| p.measures.get(index))
            .map(|m| &m.label)
    }

    /// Sequential index of a measure label.
    pub fn measure_index(&self, label: &MeasureLabel) -> Option<usize> {
        self.parts
            .first()
            .and_then(|p| p.measures.iter().position(|m| &m.label == label))
    }

    /// Measure of `part` carrying `label`.
    pub fn measure(&self, part: usize, label: &MeasureLabel) -> Option<&Measure> {
        self.parts
            .get(part)
            .and_then(|p| p.measures.iter().find(|m| &m.label == label))
    }

    /// Hash over every measure from `from` (inclusive) to the end, all parts.
    pub fn range_hash(&self, from: usize) -> u64 {
        let mut hasher = DefaultHasher::new();
        for part in &self.parts {
            for measure in part.measures.iter().skip(from) {
                measure.hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    /// Check structural invariants:
    /// - at least one measure
    /// - labels unique within each part
    /// - every part carries the same label sequence
    pub fn validate(&self) -> Result<(), EtudeError> {
        if self.measure_count() == 0 {
            return Err(EtudeError::EmptyScore);
        }

        let reference = self.labels();
        for part in &self.parts {
            let mut seen = HashSet::new();
            for measure in &part.measures {
                if !seen.insert(&measure.label) {
                    return Err(EtudeError::LabelError {
                        label: measure.label.to_string(),
                        message: format!("duplicate measure label in part {}", part.id),
                    });
                }
            }

            if part.measures.len() != reference.len() {
                return Err(EtudeError::LabelError {
                    label: reference.last().map(|l| l.to_string()).unwrap_or_default(),
                    message: format!(
                        "part {} has {} measures, expected {}",
                        part.id,
                        part.measures.len(),
                        reference.len()
                    ),
                });
            }
            for (measure, expected) in part.measures.iter().zip(&reference) {
                if &measure.label != expected {
                    return Err(EtudeError::LabelError {
                        label: measure.label.to_string(),
                        message: format!("part {} expected measure '{}' here", part.id, expected),
                    });
                }
            }
        }
        Ok(())
    }
}
