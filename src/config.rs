//! # Engine Configuration
//!
//! Tuning constants for the scheduler, the patcher and the tone generator,
//! loaded from YAML. Every key is optional; missing keys take the defaults
//! below.
//!
//! ```yaml
//! lookahead-measures: 2
//! min-step-floor-ms: 10
//! rest-fallback-ms: 50
//! proficiency-step: 2.0
//! max-tier: 5
//! initial-auto-tier: 1
//! loop-accompaniment: true
//! tempo:
//!   base-bpm: 120
//!   offset-step: 10
//!   min-bpm: 10
//! metronome:
//!   frequency-hz: 880
//!   click-ms: 50
//! capture:
//!   sample-rate: 44100
//! ```
//!
//! ## Usage
//! ```rust
//! use etude::EngineConfig;
//!
//! let config = EngineConfig::from_yaml("max-tier: 3\ntempo:\n  base-bpm: 90\n").unwrap();
//! assert_eq!(config.max_tier, 3);
//! assert_eq!(config.tempo.base_bpm, 90.0);
//! assert_eq!(config.lookahead_measures, 2);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EtudeError;
use crate::timing::Tempo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Measures between the cursor and the first patched measure
    pub lookahead_measures: usize,
    /// Shortest delay between two steps of a track
    pub min_step_floor_ms: u64,
    /// Step length for entries without a usable duration
    pub rest_fallback_ms: u64,
    /// Proficiency units per difficulty tier
    pub proficiency_step: f64,
    pub max_tier: u8,
    /// Tier the automatic score starts from
    pub initial_auto_tier: u8,
    pub loop_accompaniment: bool,
    pub tempo: TempoConfig,
    pub metronome: MetronomeConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TempoConfig {
    pub base_bpm: f64,
    pub offset_step: f64,
    pub min_bpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MetronomeConfig {
    pub frequency_hz: f64,
    /// Click length, capped at a fifth of a beat
    pub click_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CaptureConfig {
    /// Used when the device does not report its own rate
    pub sample_rate: u32,
    /// How often captured frames are moved out of the device queue
    pub poll_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookahead_measures: 2,
            min_step_floor_ms: 10,
            rest_fallback_ms: 50,
            proficiency_step: 2.0,
            max_tier: 5,
            initial_auto_tier: 1,
            loop_accompaniment: true,
            tempo: TempoConfig::default(),
            metronome: MetronomeConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            base_bpm: 120.0,
            offset_step: 10.0,
            min_bpm: 10.0,
        }
    }
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 880.0,
            click_ms: 50.0,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            poll_ms: 20,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, EtudeError> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EtudeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        log::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EtudeError> {
        if !self.tempo.base_bpm.is_finite() || self.tempo.base_bpm <= 0.0 {
            return Err(EtudeError::ConfigError(format!(
                "tempo.base-bpm must be positive, got {}",
                self.tempo.base_bpm
            )));
        }
        if !self.tempo.min_bpm.is_finite() || self.tempo.min_bpm <= 0.0 {
            return Err(EtudeError::ConfigError(format!(
                "tempo.min-bpm must be positive, got {}",
                self.tempo.min_bpm
            )));
        }
        if !self.proficiency_step.is_finite() || self.proficiency_step <= 0.0 {
            return Err(EtudeError::ConfigError(
                "proficiency-step must be greater than zero".to_string(),
            ));
        }
        if self.max_tier == 0 {
            return Err(EtudeError::ConfigError(
                "max-tier must be at least 1".to_string(),
            ));
        }
        if self.initial_auto_tier == 0 || self.initial_auto_tier > self.max_tier {
            return Err(EtudeError::ConfigError(format!(
                "initial-auto-tier must be in 1..={}, got {}",
                self.max_tier, self.initial_auto_tier
            )));
        }
        if self.min_step_floor_ms == 0 {
            return Err(EtudeError::ConfigError(
                "min-step-floor-ms must be at least 1".to_string(),
            ));
        }
        if self.capture.sample_rate == 0 {
            return Err(EtudeError::ConfigError(
                "capture.sample-rate must be positive".to_string(),
            ));
        }
        if self.capture.poll_ms == 0 {
            return Err(EtudeError::ConfigError(
                "capture.poll-ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Tempo state seeded from the configured base tempo.
    pub fn tempo(&self) -> Tempo {
        Tempo::new(self.tempo.base_bpm, self.tempo.offset_step, self.tempo.min_bpm)
    }
}
