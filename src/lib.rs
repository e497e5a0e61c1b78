//! Pushtalk - push-to-talk dictation
//!
//! Hold a hotkey, speak, release; the transcribed text is typed into
//! whatever application has focus. This library exports the core modules
//! for testing and potential future reuse.

/// Audio capture and buffering
pub mod audio;
/// Configuration management
pub mod config;
/// Global hotkey listening
pub mod input;
/// Single-instance enforcement
pub mod instance;
/// Text injection and the output sink
pub mod output;
/// The push-to-talk session state machine
pub mod session;
/// Logging setup
pub mod telemetry;
/// Whisper transcription engine
pub mod transcription;
/// Status tray icon
pub mod tray;
