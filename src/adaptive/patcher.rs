//! Splicing variant measures into the automatic score

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::EtudeError;
use crate::score::{MeasureLabel, Score};

use super::variants::{tier_from_proficiency, DifficultyMap, DifficultyVariantSet, AUTO_TIER};

/// Outcome of a `splice()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpliceReport {
    /// Labels whose content was replaced
    pub changed: Vec<MeasureLabel>,
    /// Labels with no counterpart in the source (left untouched)
    pub missing: Vec<MeasureLabel>,
}

impl SpliceReport {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

/// A retarget that modified the automatic score.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedPatch {
    pub tier: u8,
    /// First measure of the patched range
    pub from_label: MeasureLabel,
    pub changed: Vec<MeasureLabel>,
}

/// Replace the content of every measure of `target` from `from` to the end
/// with the measure carrying the same label in `source`.
///
/// Parts are matched by id, then by position. Labels are kept; measures
/// already equal to the source are left alone, so splicing twice is the same
/// as splicing once.
pub fn splice(target: &mut Score, source: &Score, from: &MeasureLabel) -> SpliceReport {
    let mut report = SpliceReport::default();
    let Some(start) = target.measure_index(from) else {
        log::warn!("Splice start '{}' is not in the target score", from);
        report.missing.push(from.clone());
        return report;
    };

    for (part_index, part) in target.parts.iter_mut().enumerate() {
        let source_part = source
            .parts
            .iter()
            .position(|p| p.id == part.id)
            .unwrap_or(part_index);

        for measure in part.measures.iter_mut().skip(start) {
            match source.measure(source_part, &measure.label) {
                Some(replacement) => {
                    if !measure.same_content(replacement) {
                        measure.replace_content(replacement);
                        if !report.changed.contains(&measure.label) {
                            report.changed.push(measure.label.clone());
                        }
                    }
                }
                None => {
                    log::warn!(
                        "Measure '{}' of part {} has no counterpart in the source, skipped",
                        measure.label,
                        part.id
                    );
                    if !report.missing.contains(&measure.label) {
                        report.missing.push(measure.label.clone());
                    }
                }
            }
        }
    }

    report
}

/// True when `splice(target, source, label_at(start))` would change anything.
fn needs_splice(target: &Score, source: &Score, start: usize) -> bool {
    target.parts.iter().enumerate().any(|(part_index, part)| {
        let source_part = source
            .parts
            .iter()
            .position(|p| p.id == part.id)
            .unwrap_or(part_index);
        part.measures.iter().skip(start).any(|measure| {
            source
                .measure(source_part, &measure.label)
                .is_some_and(|replacement| !measure.same_content(replacement))
        })
    })
}

/// Owner of the automatic score and its difficulty map.
///
/// The patcher is the only writer of both. Readers get an `Arc` snapshot;
/// a retarget that changes something swaps the patcher's copy
/// (copy-on-write), so snapshots held by a playing walker stay intact until
/// the walker is reloaded.
#[derive(Debug, Clone)]
pub struct DifficultyPatcher {
    variants: DifficultyVariantSet,
    auto: Arc<Score>,
    map: DifficultyMap,
    lookahead: usize,
    proficiency_step: f64,
    max_tier: u8,
}

impl DifficultyPatcher {
    /// Seed the automatic score from `config.initial_auto_tier`.
    pub fn new(variants: DifficultyVariantSet, config: &EngineConfig) -> Result<Self, EtudeError> {
        let initial = config.initial_auto_tier;
        let seed = variants.get(initial).ok_or_else(|| EtudeError::VariantError {
            tier: initial,
            message: format!("only {} variants loaded", variants.max_tier()),
        })?;
        let auto = Arc::new(Score::clone(seed));
        let map = DifficultyMap::new(auto.measure_count(), initial);
        let max_tier = config.max_tier.min(variants.max_tier());

        Ok(Self {
            variants,
            auto,
            map,
            lookahead: config.lookahead_measures,
            proficiency_step: config.proficiency_step,
            max_tier,
        })
    }

    pub fn auto_score(&self) -> Arc<Score> {
        Arc::clone(&self.auto)
    }

    /// Score for a selectable tier: 0 is the automatic score.
    pub fn score_for(&self, tier: u8) -> Option<Arc<Score>> {
        if tier == AUTO_TIER {
            Some(self.auto_score())
        } else {
            self.variants.get(tier).cloned()
        }
    }

    pub fn variants(&self) -> &DifficultyVariantSet {
        &self.variants
    }

    pub fn map(&self) -> &DifficultyMap {
        &self.map
    }

    pub fn max_tier(&self) -> u8 {
        self.max_tier
    }

    /// Tier whose content fills the measure carrying `label`.
    pub fn tier_at(&self, label: &MeasureLabel) -> Option<u8> {
        self.auto
            .measure_index(label)
            .and_then(|index| self.map.get(index))
    }

    pub fn target_tier(&self, proficiency: f64) -> u8 {
        tier_from_proficiency(proficiency, self.proficiency_step, self.max_tier)
    }

    /// Move the automatic score toward the tier matching `proficiency`.
    ///
    /// Measures from `current + lookahead` to the end take the target
    /// variant's content. An unknown or missing `current` counts as the
    /// first measure. Returns `None` when nothing changed.
    pub fn retarget(
        &mut self,
        proficiency: f64,
        current: Option<&MeasureLabel>,
    ) -> Option<AppliedPatch> {
        let target = self.target_tier(proficiency);
        let current_index = current
            .and_then(|label| self.auto.measure_index(label))
            .unwrap_or(0);
        let anchor = current_index + self.lookahead;
        let count = self.auto.measure_count();

        if anchor >= count {
            log::debug!(
                "Retarget to tier {} skipped: anchor {} is past the last measure ({})",
                target,
                anchor,
                count
            );
            return None;
        }

        let source = Arc::clone(self.variants.get(target)?);
        let from_label = self.auto.label_at(anchor)?.clone();

        if !needs_splice(&self.auto, &source, anchor) {
            log::trace!("Tier {} already in place from '{}'", target, from_label);
            return None;
        }

        let report = splice(Arc::make_mut(&mut self.auto), &source, &from_label);
        self.map.set_from(anchor, target);

        log::info!(
            "Proficiency {:.2} -> tier {}: patched {} measures from '{}'",
            proficiency,
            target,
            report.changed.len(),
            from_label
        );

        Some(AppliedPatch {
            tier: target,
            from_label,
            changed: report.changed,
        })
    }
}
