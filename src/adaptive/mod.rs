//! # Adaptive Difficulty
//!
//! Rewrites the automatic score ahead of the cursor with measures taken from
//! pre-authored difficulty variants, driven by a rolling proficiency value.
//!
//! ## Sub-modules
//! - `variants` - The variant set, proficiency → tier mapping, per-measure map
//! - `patcher` - `DifficultyPatcher` and the pure `splice()` operation
//!
//! ## Tiers
//! Tier 0 is the automatic score. Tiers `1..=max_tier` are the fixed variants
//! and are never modified. The automatic score starts as a copy of one fixed
//! tier and is only ever changed by the patcher.
//!
//! ## Lookahead
//! A retarget never touches the measure under the cursor or the next
//! `lookahead - 1` measures, so the notes already scheduled keep sounding the
//! way they were shown. With the default lookahead of 2 and the cursor on
//! index 3, indices 5 and later may change.
//!
//! ## Example
//! ```rust
//! use etude::adaptive::tier_from_proficiency;
//!
//! assert_eq!(tier_from_proficiency(7.0, 2.0, 5), 3);
//! assert_eq!(tier_from_proficiency(0.5, 2.0, 5), 1);
//! assert_eq!(tier_from_proficiency(42.0, 2.0, 5), 5);
//! ```

pub mod patcher;
pub mod variants;

pub use patcher::{splice, AppliedPatch, DifficultyPatcher, SpliceReport};
pub use variants::{
    tier_from_proficiency, DifficultyMap, DifficultySetting, DifficultyVariantSet, AUTO_TIER,
};
