use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::audio::AudioBuffer;

/// Black-box transcription contract: a frozen audio buffer in, text out.
/// Must be callable concurrently for independent buffers.
#[cfg_attr(test, mockall::automock)]
pub trait Transcriber: Send + Sync {
    /// Transcribe a finished recording to text
    ///
    /// # Errors
    /// Returns error if the model cannot be loaded or inference fails
    fn transcribe(&self, buffer: &AudioBuffer) -> Result<String, TranscriptionError>;
}

/// Errors that can occur during transcription
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// Failed to load the Whisper model
    #[error("failed to load whisper model from {path}: {source}")]
    ModelLoad {
        /// Path to model file
        path: String,
        /// Underlying error
        source: anyhow::Error,
    },

    /// Failed to create Whisper inference state
    #[error("failed to create whisper state")]
    StateCreation,

    /// Inference itself failed
    #[error("whisper inference failed")]
    Inference(#[from] anyhow::Error),

    /// The session-level timeout elapsed before inference finished
    #[error("transcription timed out after {0}s")]
    Timeout(u64),
}

/// Whisper transcription engine with lazy model loading.
///
/// The context is created on first use (or eagerly via [`Self::preload`])
/// behind a mutex. Inference itself runs on a per-call state outside the
/// lock, so independent sessions can transcribe concurrently.
pub struct WhisperTranscriber {
    model_path: PathBuf,
    threads: i32,
    beam_size: i32,
    language: Option<String>,
    ctx: Mutex<Option<WhisperContext>>,
}

impl WhisperTranscriber {
    /// Determines sampling strategy based on beam size (pure, testable)
    const fn sampling_strategy(beam_size: i32) -> SamplingStrategy {
        if beam_size > 1 {
            SamplingStrategy::BeamSearch {
                beam_size,
                patience: -1.0,
            }
        } else {
            SamplingStrategy::Greedy { best_of: 1 }
        }
    }

    /// Creates an engine for the given model file. The model itself is not
    /// loaded until [`Self::preload`] or the first transcription.
    ///
    /// # Errors
    /// Returns error if `threads`/`beam_size` are zero or exceed `i32::MAX`
    pub fn new(
        model_path: &Path,
        threads: usize,
        beam_size: usize,
        language: Option<String>,
    ) -> Result<Self, TranscriptionError> {
        let invalid = |msg: String| TranscriptionError::ModelLoad {
            path: model_path.display().to_string(),
            source: anyhow::anyhow!(msg),
        };

        if threads == 0 {
            return Err(invalid("threads must be > 0".to_owned()));
        }
        if beam_size == 0 {
            return Err(invalid("beam_size must be > 0".to_owned()));
        }
        let threads = i32::try_from(threads)
            .map_err(|_| invalid(format!("threads value too large (max: {})", i32::MAX)))?;
        let beam_size = i32::try_from(beam_size)
            .map_err(|_| invalid(format!("beam_size value too large (max: {})", i32::MAX)))?;

        Ok(Self {
            model_path: model_path.to_path_buf(),
            threads,
            beam_size,
            language,
            ctx: Mutex::new(None),
        })
    }

    /// Load the model now instead of on first transcription
    ///
    /// # Errors
    /// Returns error if the model file is missing or invalid
    pub fn preload(&self) -> Result<(), TranscriptionError> {
        let mut guard = self
            .ctx
            .lock()
            .map_err(|e| anyhow::anyhow!("model lock poisoned: {e}"))?;
        Self::ensure_loaded(&mut guard, &self.model_path)?;
        Ok(())
    }

    /// Whether the model has been loaded yet
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.ctx.lock().is_ok_and(|guard| guard.is_some())
    }

    fn ensure_loaded<'a>(
        guard: &'a mut Option<WhisperContext>,
        model_path: &Path,
    ) -> Result<&'a WhisperContext, TranscriptionError> {
        if guard.is_none() {
            let path_str = model_path
                .to_str()
                .ok_or_else(|| TranscriptionError::ModelLoad {
                    path: model_path.display().to_string(),
                    source: anyhow::anyhow!("model path contains invalid UTF-8"),
                })?;

            tracing::info!(path = %model_path.display(), "loading whisper model");
            let params = WhisperContextParameters::default();
            let ctx = WhisperContext::new_with_params(path_str, params).map_err(|e| {
                TranscriptionError::ModelLoad {
                    path: model_path.display().to_string(),
                    source: anyhow::anyhow!("{e:?}"),
                }
            })?;
            tracing::info!("whisper model loaded");
            *guard = Some(ctx);
        }

        guard.as_ref().ok_or_else(|| TranscriptionError::ModelLoad {
            path: model_path.display().to_string(),
            source: anyhow::anyhow!("model missing after load"),
        })
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, buffer: &AudioBuffer) -> Result<String, TranscriptionError> {
        let _span =
            tracing::debug_span!("transcription", samples = buffer.samples().len()).entered();

        // Lock only for load + state creation; inference runs unlocked so
        // overlapping sessions do not serialize on each other.
        let mut state = {
            let mut guard = self
                .ctx
                .lock()
                .map_err(|e| anyhow::anyhow!("model lock poisoned: {e}"))?;
            let ctx = Self::ensure_loaded(&mut guard, &self.model_path)?;
            ctx.create_state()
                .map_err(|_| TranscriptionError::StateCreation)?
        };

        let strategy = Self::sampling_strategy(self.beam_size);
        let mut params = FullParams::new(strategy);
        params.set_n_threads(self.threads);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(self.language.as_deref());
        params.set_translate(false);

        let start = std::time::Instant::now();
        state
            .full(params, buffer.samples())
            .context("whisper inference failed")?;
        let inference_duration = start.elapsed();

        let mut result = String::new();
        for segment in state.as_iter() {
            result.push_str(&segment.to_string());
        }
        let result = result.trim().to_owned();

        tracing::info!(
            segments = state.full_n_segments(),
            text_len = result.len(),
            inference_ms = inference_duration.as_millis(),
            "transcription completed"
        );

        Ok(result)
    }
}

// SAFETY: the WhisperContext lives behind a Mutex, all access goes through
// the lock, and no other shared mutable state exists. whisper-rs contexts
// are safe to use across threads under external synchronization.
#[allow(unsafe_code)]
unsafe impl Send for WhisperTranscriber {}
#[allow(unsafe_code)]
unsafe impl Sync for WhisperTranscriber {}
