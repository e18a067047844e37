//! CPAL input device
//!
//! Same threading as the output synth: the input stream is owned by a
//! dedicated thread, frames cross over on a bounded crossbeam channel and
//! are dropped when the consumer falls behind.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use super::{CaptureDevice, CaptureFormat};
use crate::device_thread::{DeviceThread, Ready};
use crate::error::EtudeError;

/// Callback buffers kept between two capture polls of the player
const FRAME_QUEUE: usize = 256;

/// Microphone input on the default input device, downmixed to mono.
#[derive(Default)]
pub struct DeviceCapture {
    frames: Option<Receiver<Vec<f32>>>,
    input: Option<DeviceThread>,
}

impl DeviceCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

fn default_input() -> Result<(cpal::Device, cpal::SupportedStreamConfig), EtudeError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| EtudeError::DeviceError("no input device".to_string()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| EtudeError::DeviceError(e.to_string()))?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(EtudeError::DeviceError(format!(
            "unsupported input sample format {:?}",
            supported.sample_format()
        )));
    }
    Ok((device, supported))
}

fn run_input(frames: Sender<Vec<f32>>, shutdown: Receiver<()>, ready: Ready) {
    let stream = match build_stream(frames) {
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

    let _ = shutdown.recv();
    drop(stream);
    log::debug!("Input stream closed");
}

fn build_stream(frames: Sender<Vec<f32>>) -> Result<cpal::Stream, EtudeError> {
    let (device, supported) = default_input()?;
    let config: cpal::StreamConfig = supported.config();
    let channels = (config.channels as usize).max(1);

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!(
        "Capturing from {}: {} channels, {}Hz",
        device_name,
        channels,
        config.sample_rate.0
    );

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                    .collect();
                if let Err(TrySendError::Full(_)) = frames.try_send(mono) {
                    log::warn!("Capture queue full, dropping input");
                }
            },
            move |err| {
                log::error!("Input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| EtudeError::DeviceError(e.to_string()))
}

impl CaptureDevice for DeviceCapture {
    /// Reads the device format here; the stream itself is built on the
    /// capture thread, and frames flow once it runs.
    fn request_access(&mut self) -> Result<CaptureFormat, EtudeError> {
        self.release();

        let (_, supported) = default_input()?;
        let (frame_tx, frame_rx) = bounded(FRAME_QUEUE);
        let input = DeviceThread::spawn("etude-capture", move |shutdown, ready| {
            run_input(frame_tx, shutdown, ready)
        })?;
        self.frames = Some(frame_rx);
        self.input = Some(input);
        Ok(CaptureFormat {
            sample_rate: Some(supported.sample_rate().0),
        })
    }

    fn read_next_frame(&mut self) -> Option<Vec<f32>> {
        match self.input.as_mut()?.poll_ready() {
            Ok(true) => self.frames.as_ref()?.try_recv().ok(),
            Ok(false) => None,
            Err(e) => {
                log::warn!("Capture stopped: {}", e);
                self.release();
                None
            }
        }
    }

    fn release(&mut self) {
        self.frames = None;
        if let Some(mut input) = self.input.take() {
            input.stop();
        }
    }
}
