//! CPAL output device
//!
//! The stream lives on its own thread (CPAL streams are not `Send` on every
//! platform). Tones reach the audio callback through a crossbeam channel and
//! are mixed there as decaying sine voices.

use std::f64::consts::TAU;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use crossbeam_channel::{unbounded, Receiver, Sender};

use super::ToneSynth;
use crate::device_thread::{DeviceThread, Ready};
use crate::error::EtudeError;

const AMPLITUDE: f64 = 0.2;
/// Fade-out at the end of every tone, avoids clicks
const RELEASE_MS: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
struct ToneRequest {
    frequency: f64,
    duration_ms: f64,
}

struct Voice {
    step: f64,
    phase: f64,
    remaining: usize,
    release: usize,
}

impl Voice {
    fn new(request: ToneRequest, sample_rate: f64) -> Self {
        let total = (request.duration_ms / 1000.0 * sample_rate).round().max(1.0) as usize;
        let release = ((RELEASE_MS / 1000.0 * sample_rate) as usize).min(total);
        Self {
            step: TAU * request.frequency / sample_rate,
            phase: 0.0,
            remaining: total,
            release: release.max(1),
        }
    }

    fn next_sample(&mut self) -> f64 {
        let gain = if self.remaining < self.release {
            self.remaining as f64 / self.release as f64
        } else {
            1.0
        };
        let sample = self.phase.sin() * AMPLITUDE * gain;
        self.phase = (self.phase + self.step) % TAU;
        self.remaining = self.remaining.saturating_sub(1);
        sample
    }
}

/// Sine-tone synthesizer on the default output device.
#[derive(Default)]
pub struct DeviceSynth {
    tones: Option<Sender<ToneRequest>>,
    output: Option<DeviceThread>,
}

impl DeviceSynth {
    pub fn new() -> Self {
        Self::default()
    }
}

fn run_output(tones: Receiver<ToneRequest>, shutdown: Receiver<()>, ready: Ready) {
    let stream = match build_stream(tones) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(EtudeError::DeviceError(e.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));

    // Keep the stream alive until the synth is closed
    let _ = shutdown.recv();
    drop(stream);
    log::debug!("Output stream closed");
}

fn build_stream(tones: Receiver<ToneRequest>) -> Result<cpal::Stream, EtudeError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| EtudeError::DeviceError("no output device".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| EtudeError::DeviceError(e.to_string()))?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(EtudeError::DeviceError(format!(
            "unsupported output sample format {:?}",
            supported.sample_format()
        )));
    }

    let config: cpal::StreamConfig = supported.config();
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0 as f64;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!(
        "Tone output on {}: {} channels, {}Hz",
        device_name,
        channels,
        config.sample_rate.0
    );

    let mut voices: Vec<Voice> = Vec::new();
    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                while let Ok(request) = tones.try_recv() {
                    voices.push(Voice::new(request, sample_rate));
                }
                for frame in data.chunks_mut(channels) {
                    let mixed: f64 = voices.iter_mut().map(|v| v.next_sample()).sum();
                    let sample = mixed.clamp(-1.0, 1.0) as f32;
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
                voices.retain(|v| v.remaining > 0);
            },
            move |err| {
                log::error!("Output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| EtudeError::DeviceError(e.to_string()))
}

impl ToneSynth for DeviceSynth {
    /// Starts the output thread; a device failure surfaces on the first tone.
    fn open(&mut self) -> Result<(), EtudeError> {
        self.close();

        let (tone_tx, tone_rx) = unbounded();
        let output = DeviceThread::spawn("etude-output", move |shutdown, ready| {
            run_output(tone_rx, shutdown, ready)
        })?;
        self.tones = Some(tone_tx);
        self.output = Some(output);
        Ok(())
    }

    fn play_tone(&mut self, frequency: f64, duration_ms: f64) -> Result<(), EtudeError> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| EtudeError::DeviceError("output not open".to_string()))?;
        if !output.poll_ready()? {
            log::trace!("Output still starting, {:.1}Hz skipped", frequency);
            return Ok(());
        }
        let tones = self
            .tones
            .as_ref()
            .ok_or_else(|| EtudeError::DeviceError("output not open".to_string()))?;
        tones
            .send(ToneRequest {
                frequency,
                duration_ms,
            })
            .map_err(|_| EtudeError::DeviceError("output stream stopped".to_string()))
    }

    fn close(&mut self) {
        self.tones = None;
        if let Some(mut output) = self.output.take() {
            output.stop();
        }
    }
}
