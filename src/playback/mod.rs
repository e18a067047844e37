//! # Playback Module
//!
//! Drives the score cursor, the sound and the capture segmentation in time.
//!
//! ## Sub-modules
//! - `types` - TrackRole, PlaybackStyle, Command, PlayerEvent
//! - `scheduler` - Step loop over the tracks of one playback run
//! - `player` - The player task and its `PlayerHandle`
//!
//! ## Tracks
//!
//! | Style         | Cursor track | Extra track                     |
//! |---------------|--------------|---------------------------------|
//! | Score         | Tone         | -                               |
//! | Metronome     | Display      | Metronome (click every beat)    |
//! | Accompaniment | Display      | Accompaniment (own score, loops)|
//!
//! Each track owns its walker and keeps its own next-step time; all tracks
//! start and stop together. Only the cursor track reports measures to the
//! capture segmenter and asks the renderer to scroll.
//!
//! ## Step Timing
//!
//! A step lasts as long as the longest note starting at the cursor. At 120
//! BPM a quarter note is 500 ms, so the next step of that track is due 500 ms
//! later. Zero-length entries (grace notes) take the configured rest
//! fallback, and no step is shorter than `min-step-floor-ms`.
//!
//! ## Example
//! ```rust,no_run
//! use etude::{DifficultyVariantSet, EngineConfig, Player, PlayerEvent};
//! use etude::capture::NoCapture;
//! use etude::synth::SilentSynth;
//!
//! # async fn demo(tiers: Vec<String>) -> Result<(), etude::EtudeError> {
//! let variants = DifficultyVariantSet::from_documents(&tiers)?;
//! let (player, handle, mut events) = Player::new(
//!     EngineConfig::default(),
//!     variants,
//!     Box::new(SilentSynth),
//!     Box::new(NoCapture),
//!     None,
//! )?;
//! tokio::spawn(player.run());
//!
//! handle.play()?;
//! while let Some(event) = events.recv().await {
//!     if let PlayerEvent::PlaybackStopped = event {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod player;
pub mod scheduler;
pub mod types;

pub use player::{Player, PlayerHandle};
pub use scheduler::step_duration_ms;
pub use types::{Command, PlaybackStyle, PlayerEvent, TrackRole};
