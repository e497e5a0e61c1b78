//! Microphone capture and the audio buffer handed to transcription.

/// CPAL-backed microphone capture
pub mod capture;

pub use capture::MicCapture;

use std::time::Duration;
use thiserror::Error;

/// Sample rate every buffer is normalized to before transcription.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Errors from the capture device boundary
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The input device could not be opened (in use, disconnected, denied).
    /// Recoverable: the next press retries from scratch.
    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device failed mid-recording; any partial audio is discarded.
    #[error("capture aborted: input device failed mid-recording")]
    Aborted,
}

/// A finished recording: 16 kHz mono f32 samples, frozen once constructed.
///
/// Ownership moves from the capture device to the session at stop time;
/// transcription only ever sees an immutable buffer.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Wrap already-normalized samples
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// The PCM samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Recorded duration derived from sample count
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as u64 / u64::from(self.channels);
        Duration::from_nanos(frames * 1_000_000_000 / u64::from(self.sample_rate))
    }

    /// Whether the buffer holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Push-to-talk capture device: every `start` is matched by exactly one
/// `stop`, on all paths. The session controller enforces single-owner
/// gating, so implementations need no internal locking around the handle.
#[cfg_attr(test, mockall::automock)]
pub trait CaptureDevice {
    /// Open the microphone and begin accumulating samples
    ///
    /// # Errors
    /// Returns [`CaptureError::DeviceUnavailable`] if the device cannot be
    /// opened
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Stop capturing and hand over the accumulated buffer
    ///
    /// # Errors
    /// Returns [`CaptureError::Aborted`] if the device failed mid-recording
    fn stop(&mut self) -> Result<AudioBuffer, CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_mono_16khz() {
        let buffer = AudioBuffer::new(vec![0.0; 16_000], 16_000, 1);
        assert_eq!(buffer.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_duration_counts_frames_not_samples() {
        // 16k stereo samples = 8k frames = 0.5s
        let buffer = AudioBuffer::new(vec![0.0; 16_000], 16_000, 2);
        assert_eq!(buffer.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_duration_sub_second() {
        let buffer = AudioBuffer::new(vec![0.0; 800], 16_000, 1);
        assert_eq!(buffer.duration(), Duration::from_millis(50));
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = AudioBuffer::new(Vec::new(), 16_000, 1);
        assert!(buffer.is_empty());
        assert_eq!(buffer.duration(), Duration::ZERO);
    }

    #[test]
    fn test_degenerate_metadata_yields_zero_duration() {
        let buffer = AudioBuffer::new(vec![0.0; 100], 0, 0);
        assert_eq!(buffer.duration(), Duration::ZERO);
    }
}
