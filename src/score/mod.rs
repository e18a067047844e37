//! # Score Module
//!
//! In-memory score model, the MusicXML codec and the position walker.
//!
//! ## Sub-modules
//! - `types` - Score, Part, Measure, VoiceEntry, Note, Fraction
//! - `musicxml` - `parse_musicxml()` / `to_musicxml()`
//! - `walker` - `Walker` trait and `ScoreWalker`
//!
//! ## Measure Labels
//!
//! Every measure carries the `number` attribute of its MusicXML element as a
//! [`MeasureLabel`]. Labels are unique inside a score and identical across its
//! parts, and they are the join key between difficulty variants. The
//! sequential index of a measure is a separate thing: pickup measures, "12a"
//! style labels and renumbered sections all break `label == index + 1`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use etude::score::{parse_musicxml, ScoreWalker, Walker};
//!
//! let xml = r#"<score-partwise><part id="P1">
//!   <measure number="1">
//!     <attributes><divisions>1</divisions><time><beats>2</beats><beat-type>4</beat-type></time></attributes>
//!     <note><pitch><step>C</step><octave>4</octave></pitch><duration>1</duration></note>
//!     <note><pitch><step>E</step><octave>4</octave></pitch><duration>1</duration></note>
//!   </measure>
//! </part></score-partwise>"#;
//!
//! let score = Arc::new(parse_musicxml(xml).unwrap());
//! let mut walker = ScoreWalker::new(score).unwrap();
//!
//! assert_eq!(walker.current_voice_entries()[0].notes[0].pitch.unwrap().index(), 60);
//! walker.advance();
//! walker.advance();
//! assert!(walker.at_end());
//! ```

pub mod musicxml;
pub mod types;
pub mod walker;

pub use musicxml::{parse_musicxml, to_musicxml};
pub use types::*;
pub use walker::{PlaybackPosition, ScoreWalker, Walker};

#[cfg(test)]
pub(crate) mod fixtures;

#[cfg(test)]
mod tests;
