use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapRb,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::AudioConfig;
use crate::session::ControlEvent;

use super::{AudioBuffer, CaptureDevice, CaptureError, TARGET_SAMPLE_RATE};

/// Trait for controlling audio stream lifecycle
trait StreamControl {
    /// Resume audio stream (activate microphone)
    fn play(&self) -> Result<()>;
    /// Pause audio stream (deactivate microphone)
    fn pause(&self) -> Result<()>;
}

/// CPAL stream wrapper implementing `StreamControl`
struct CpalStreamControl {
    stream: cpal::Stream,
}

impl StreamControl for CpalStreamControl {
    fn play(&self) -> Result<()> {
        self.stream.play().context("failed to resume audio stream")
    }

    fn pause(&self) -> Result<()> {
        self.stream.pause().context("failed to pause audio stream")
    }
}

/// An open input stream with its ring buffer and flags
struct OpenStream {
    /// Kept alive to prevent stream drop
    control: Box<dyn StreamControl>,
    /// Consumer half of the lock-free sample ring buffer
    consumer: HeapCons<f32>,
    /// Set while a press is held; the callback only appends when set
    recording: Arc<AtomicBool>,
    /// Set by the stream error callback when the device fails
    failed: Arc<AtomicBool>,
    /// Device sample rate in Hz
    sample_rate: u32,
    /// Device channel count
    channels: u16,
}

/// Microphone capture via CoreAudio/ALSA/WASAPI through CPAL.
///
/// The stream is opened lazily on the first `start` and kept paused between
/// presses. A device failure drops the stream, so the next press reopens
/// from scratch instead of reusing a dead handle.
pub struct MicCapture {
    device_name: Option<String>,
    max_recording_secs: u32,
    events: mpsc::UnboundedSender<ControlEvent>,
    stream: Option<OpenStream>,
}

impl MicCapture {
    /// Creates a capture backed by the configured input device.
    ///
    /// Does not touch the audio hardware yet; the stream opens on the first
    /// `start` so a missing device surfaces as a recoverable per-press error.
    #[must_use]
    pub fn new(config: &AudioConfig, events: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self {
            device_name: config.device.clone(),
            max_recording_secs: config.max_recording_secs,
            events,
            stream: None,
        }
    }

    fn find_device(&self) -> Result<cpal::Device, CaptureError> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n == *name))
                .ok_or_else(|| {
                    CaptureError::DeviceUnavailable(format!("input device '{name}' not found"))
                }),
            None => host
                .default_input_device()
                .ok_or_else(|| CaptureError::DeviceUnavailable("no input device".to_owned())),
        }
    }

    fn open_stream(&self) -> Result<OpenStream, CaptureError> {
        let device = self.find_device()?;
        let device_label = device.name().unwrap_or_else(|_| "unknown".to_owned());

        let supported = device
            .default_input_config()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        let sample_rate = supported.sample_rate();
        let channels = supported.channels();

        info!(
            device = %device_label,
            sample_rate,
            channels,
            "opening input stream"
        );

        // Ring buffer sized for the recording cap so nothing is dropped
        // under normal load; overflow is logged and the session continues.
        let capacity =
            sample_rate as usize * channels as usize * self.max_recording_secs as usize;
        let (mut producer, consumer) = HeapRb::<f32>::new(capacity).split();

        let recording = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));

        let recording_cb = Arc::clone(&recording);
        let failed_cb = Arc::clone(&failed);
        let events_cb = self.events.clone();

        let stream_config = supported.into();
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if recording_cb.load(Ordering::Relaxed) {
                        let pushed = producer.push_slice(data);
                        if pushed < data.len() {
                            warn!("ring buffer full, dropped {} samples", data.len() - pushed);
                        }
                    }
                },
                move |err| {
                    warn!("audio stream error: {}", err);
                    failed_cb.store(true, Ordering::Relaxed);
                    let _ = events_cb.send(ControlEvent::DeviceError(err.to_string()));
                },
                None,
            )
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        let control = CpalStreamControl { stream };

        // Start then immediately pause: mic stays inactive until a press.
        control
            .play()
            .and_then(|()| control.pause())
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        debug!("input stream open (paused)");

        Ok(OpenStream {
            control: Box::new(control),
            consumer,
            recording,
            failed,
            sample_rate,
            channels,
        })
    }
}

impl CaptureDevice for MicCapture {
    fn start(&mut self) -> Result<(), CaptureError> {
        let start = std::time::Instant::now();

        // A previously failed stream is a dead handle; reopen.
        if self
            .stream
            .as_ref()
            .is_some_and(|s| s.failed.load(Ordering::Relaxed))
        {
            debug!("dropping failed stream before reopen");
            self.stream = None;
        }

        if self.stream.is_none() {
            self.stream = Some(self.open_stream()?);
        }

        // Unwrap-free: just assigned above if it was None
        let Some(stream) = self.stream.as_mut() else {
            return Err(CaptureError::DeviceUnavailable(
                "stream missing after open".to_owned(),
            ));
        };

        // Discard anything left over from a previous press.
        stream.consumer.clear();

        // Set the flag before resuming so no callback data races past us.
        stream.recording.store(true, Ordering::Relaxed);

        if let Err(e) = stream.control.play() {
            self.stream = None;
            return Err(CaptureError::DeviceUnavailable(e.to_string()));
        }

        info!(latency_us = start.elapsed().as_micros(), "recording started");
        Ok(())
    }

    fn stop(&mut self) -> Result<AudioBuffer, CaptureError> {
        let Some(stream) = self.stream.as_mut() else {
            // Stream vanished (device error handled elsewhere); nothing to return.
            return Err(CaptureError::Aborted);
        };

        stream.recording.store(false, Ordering::Relaxed);

        let pause_result = stream.control.pause();

        let mut samples = Vec::with_capacity(stream.consumer.occupied_len());
        while let Some(sample) = stream.consumer.try_pop() {
            samples.push(sample);
        }

        if stream.failed.load(Ordering::Relaxed) {
            warn!(
                partial_samples = samples.len(),
                "device failed mid-recording, discarding partial buffer"
            );
            self.stream = None;
            return Err(CaptureError::Aborted);
        }

        if let Err(e) = pause_result {
            warn!("failed to pause stream after recording: {}", e);
            self.stream = None;
            return Err(CaptureError::Aborted);
        }

        let sample_rate = stream.sample_rate;
        let channels = stream.channels;
        let normalized = resample_to_mono_16k(&samples, sample_rate, channels);

        info!(
            raw_samples = samples.len(),
            samples = normalized.len(),
            "recording stopped"
        );

        Ok(AudioBuffer::new(normalized, TARGET_SAMPLE_RATE, 1))
    }
}

/// Downmix to mono and linearly resample to 16 kHz, the format the
/// transcription engine expects.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn resample_to_mono_16k(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<f32> {
    let mono: Vec<f32> = if channels <= 1 {
        samples.to_vec()
    } else {
        let divisor = f64::from(channels);
        samples
            .chunks(channels as usize)
            .map(|frame| {
                let sum: f64 = frame.iter().map(|&s| f64::from(s)).sum();
                (sum / divisor) as f32
            })
            .collect()
    };

    if sample_rate == TARGET_SAMPLE_RATE || mono.is_empty() {
        return mono;
    }

    let ratio = f64::from(sample_rate) / f64::from(TARGET_SAMPLE_RATE);
    let output_len = ((mono.len() as f64) / ratio).ceil() as usize;

    let mut resampled = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let src = (i as f64) * ratio;
        let lo = (src.floor() as usize).min(mono.len() - 1);
        let hi = (lo + 1).min(mono.len() - 1);
        let fract = src - src.floor();
        let interpolated = f64::from(mono[lo]).mul_add(1.0 - fract, f64::from(mono[hi]) * fract);
        resampled.push(interpolated as f32);
    }
    resampled
}
