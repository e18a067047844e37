pub mod adaptive;
pub mod capture;
pub mod config;
#[cfg(feature = "audio-device")]
mod device_thread;
pub mod error;
pub mod evaluator;
pub mod playback;
pub mod score;
pub mod synth;
pub mod timing;

pub use adaptive::{DifficultyMap, DifficultyPatcher, DifficultySetting, DifficultyVariantSet};
pub use config::EngineConfig;
pub use error::*;
pub use playback::{Command, PlaybackStyle, Player, PlayerEvent, PlayerHandle};
pub use score::{parse_musicxml, to_musicxml, MeasureLabel, Score};

use tokio::sync::mpsc::UnboundedReceiver;

/// Output device for this build: CPAL with `audio-device`, silent otherwise.
pub fn default_synth() -> Box<dyn synth::ToneSynth> {
    #[cfg(feature = "audio-device")]
    {
        Box::new(synth::DeviceSynth::new())
    }
    #[cfg(not(feature = "audio-device"))]
    {
        Box::new(synth::SilentSynth)
    }
}

/// Capture device for this build: CPAL with `audio-device`, none otherwise.
pub fn default_capture() -> Box<dyn capture::CaptureDevice> {
    #[cfg(feature = "audio-device")]
    {
        Box::new(capture::DeviceCapture::new())
    }
    #[cfg(not(feature = "audio-device"))]
    {
        Box::new(capture::NoCapture)
    }
}

/// Build a player from one MusicXML document per difficulty tier.
/// This is the main entry point for the library.
pub fn open_player<S: AsRef<str>>(
    config: EngineConfig,
    tiers: &[S],
) -> Result<(Player, PlayerHandle, UnboundedReceiver<PlayerEvent>), EtudeError> {
    let variants = DifficultyVariantSet::from_documents(tiers)?;
    Player::new(config, variants, default_synth(), default_capture(), None)
}
