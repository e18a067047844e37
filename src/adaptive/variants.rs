//! Difficulty variants and the per-measure difficulty map

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EtudeError;
use crate::score::{parse_musicxml, Score};

/// Tier number of the automatic (adaptive) score.
pub const AUTO_TIER: u8 = 0;

/// Fixed difficulty variants of one piece, tiers `1..=N`.
///
/// All variants carry the same measure label sequence, so any measure of one
/// can stand in for the same measure of another.
#[derive(Debug, Clone)]
pub struct DifficultyVariantSet {
    tiers: Vec<Arc<Score>>,
}

impl DifficultyVariantSet {
    /// Build a set from scores ordered by tier (first = tier 1).
    ///
    /// Fails when the set is empty or a variant's labels differ from tier 1.
    pub fn new(scores: Vec<Score>) -> Result<Self, EtudeError> {
        if scores.is_empty() {
            return Err(EtudeError::VariantError {
                tier: 1,
                message: "no difficulty variants given".to_string(),
            });
        }
        if scores.len() > u8::MAX as usize {
            return Err(EtudeError::VariantError {
                tier: u8::MAX,
                message: format!("too many variants ({})", scores.len()),
            });
        }

        let reference = scores[0].labels();
        for (i, score) in scores.iter().enumerate() {
            let tier = (i + 1) as u8;
            score.validate()?;
            let labels = score.labels();
            if labels.len() != reference.len() {
                return Err(EtudeError::VariantError {
                    tier,
                    message: format!(
                        "has {} measures, tier 1 has {}",
                        labels.len(),
                        reference.len()
                    ),
                });
            }
            if let Some((found, expected)) = labels.iter().zip(&reference).find(|(a, b)| a != b) {
                return Err(EtudeError::VariantError {
                    tier,
                    message: format!("measure '{}' where tier 1 has '{}'", found, expected),
                });
            }
        }

        log::debug!(
            "Loaded {} difficulty variants with {} measures",
            scores.len(),
            reference.len()
        );
        Ok(Self {
            tiers: scores.into_iter().map(Arc::new).collect(),
        })
    }

    /// Parse one MusicXML document per tier, in tier order.
    pub fn from_documents<S: AsRef<str>>(documents: &[S]) -> Result<Self, EtudeError> {
        let scores = documents
            .iter()
            .map(|doc| parse_musicxml(doc.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(scores)
    }

    /// Score of a fixed tier (`1..=max_tier`).
    pub fn get(&self, tier: u8) -> Option<&Arc<Score>> {
        if tier == AUTO_TIER {
            return None;
        }
        self.tiers.get(tier as usize - 1)
    }

    pub fn max_tier(&self) -> u8 {
        self.tiers.len() as u8
    }

    pub fn measure_count(&self) -> usize {
        self.tiers[0].measure_count()
    }
}

/// Difficulty tier for a proficiency value.
///
/// `clamp(floor(proficiency / step), 1, max_tier)`; never returns the
/// automatic tier.
pub fn tier_from_proficiency(proficiency: f64, step: f64, max_tier: u8) -> u8 {
    let max_tier = max_tier.max(1);
    if !proficiency.is_finite() || !step.is_finite() || step <= 0.0 {
        return 1;
    }
    let raw = (proficiency / step).floor();
    raw.clamp(1.0, max_tier as f64) as u8
}

/// One row of the difficulty history sent to the practice backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultySetting {
    /// 1-based measure position
    pub measure: usize,
    pub difficulty: u8,
}

/// Tier whose content currently fills each measure of the automatic score,
/// indexed by sequential measure position.
#[derive(Debug, Clone, PartialEq)]
pub struct DifficultyMap {
    tiers: Vec<u8>,
}

impl DifficultyMap {
    pub fn new(measure_count: usize, tier: u8) -> Self {
        Self {
            tiers: vec![tier; measure_count],
        }
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.tiers.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.tiers
    }

    /// Overwrite every entry from `from` to the end.
    pub(crate) fn set_from(&mut self, from: usize, tier: u8) {
        for slot in self.tiers.iter_mut().skip(from) {
            *slot = tier;
        }
    }

    pub fn settings(&self) -> Vec<DifficultySetting> {
        self.tiers
            .iter()
            .enumerate()
            .map(|(i, tier)| DifficultySetting {
                measure: i + 1,
                difficulty: *tier,
            })
            .collect()
    }
}
