//! # Error Types
//!
//! This module defines all error types for the practice engine.
//!
//! Errors carry the location that matters to the caller: a byte position for
//! malformed MusicXML, a measure label or index for structural problems, a
//! tier for variant lookups.
//!
//! ## Error Types
//! - `MusicXmlError` - The score document failed to parse
//! - `EmptyScore` - A score without a single measure (no walker can be built)
//! - `LabelError` - Duplicate or mismatched measure labels
//! - `VariantError` - Difficulty variants that cannot be used together
//! - `ConfigError` / `ConfigParseError` / `IoError` - Engine configuration
//! - `DeviceError` - Synthesis or capture device failures
//! - `EvaluatorError` - The proficiency evaluator rejected a segment
//! - `PlayerClosed` - The player task is gone
//!
//! ## Usage
//! ```rust
//! use etude::{parse_musicxml, EtudeError};
//!
//! match parse_musicxml("<score-partwise><part id=\"P1\"></part></score-partwise>") {
//!     Ok(score) => println!("{} measures", score.measure_count()),
//!     Err(EtudeError::EmptyScore) => eprintln!("nothing to play"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtudeError {
    /// MusicXML parse error with the reader position.
    ///
    /// # Example
    /// ```
    /// # use etude::EtudeError;
    /// let err = EtudeError::MusicXmlError {
    ///     position: 120,
    ///     message: "measure without a number attribute".to_string(),
    /// };
    /// assert_eq!(
    ///     err.to_string(),
    ///     "MusicXML error at byte 120: measure without a number attribute"
    /// );
    /// ```
    #[error("MusicXML error at byte {position}: {message}")]
    MusicXmlError { position: usize, message: String },

    /// The score has no parts or no measures.
    #[error("Score contains no measures")]
    EmptyScore,

    /// Measure label problem inside a single score.
    ///
    /// # Example
    /// ```
    /// # use etude::EtudeError;
    /// let err = EtudeError::LabelError {
    ///     label: "4".to_string(),
    ///     message: "duplicate measure label in part P1".to_string(),
    /// };
    /// assert_eq!(err.to_string(), "Measure '4': duplicate measure label in part P1");
    /// ```
    #[error("Measure '{label}': {message}")]
    LabelError { label: String, message: String },

    /// A difficulty variant does not line up with the others.
    #[error("Difficulty tier {tier}: {message}")]
    VariantError { tier: u8, message: String },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Configuration file is not valid YAML for `EngineConfig`.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Synthesis or capture device failure.
    ///
    /// These never stop playback; the affected feature is disabled for the
    /// rest of the session.
    #[error("Audio device error: {0}")]
    DeviceError(String),

    #[error("Proficiency evaluation failed: {0}")]
    EvaluatorError(String),

    #[error("Player is no longer running")]
    PlayerClosed,
}
