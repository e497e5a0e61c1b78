//! Push-to-talk session state machine.
//!
//! A session is one press-hold-release-transcribe cycle. The controller
//! consumes hotkey and completion events from a single channel and runs its
//! transitions on one thread, so no state needs locking; transcription work
//! is dispatched to blocking tasks and reports back through the same channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::{AudioBuffer, CaptureDevice, CaptureError};
use crate::config::SessionConfig;
use crate::transcription::{Transcriber, TranscriptionError};

/// Events consumed by the controller loop.
#[derive(Debug)]
pub enum ControlEvent {
    /// Push-to-talk key went down
    HotkeyDown,
    /// Push-to-talk key came up
    HotkeyUp,
    /// A dispatched transcription finished (or failed)
    TranscriptionDone {
        /// Session the result belongs to
        session: u64,
        /// Transcribed text or the failure
        result: Result<String, TranscriptionError>,
    },
    /// The audio backend reported a device failure
    DeviceError(String),
    /// Stop the controller loop
    Shutdown,
}

/// Observational status broadcast to the output sink. Never feeds back
/// into the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Idle, waiting for a press
    Ready,
    /// Microphone is live
    Recording,
    /// At least one session is being transcribed
    Transcribing,
    /// Something went wrong; shown transiently
    Error(String),
}

/// Where final text and status updates go. Both calls are fire-and-forget.
#[cfg_attr(test, mockall::automock)]
pub trait OutputSink: Send + Sync {
    /// Deliver final transcribed text
    fn deliver_text(&self, text: &str);
    /// Reflect the controller's externally visible status
    fn set_status(&self, status: StatusEvent);
}

/// The recording currently in progress, if any. At most one exists.
struct ActiveRecording {
    id: u64,
    started_at: Instant,
}

/// Coordinates hotkey events, the capture device, and transcription
/// dispatch.
///
/// Owns the capture handle exclusively: a `start` is issued only from
/// `Idle`, and every `start` is matched by exactly one `stop` on all exit
/// paths. Runs on the thread that owns the capture device; only the
/// dispatched transcription tasks are `Send`.
pub struct SessionController {
    capture: Box<dyn CaptureDevice>,
    engine: Arc<dyn Transcriber>,
    sink: Arc<dyn OutputSink>,
    /// Loopback sender so dispatched tasks can report completions
    events: mpsc::UnboundedSender<ControlEvent>,
    min_press: Duration,
    transcribe_timeout: Duration,
    next_id: u64,
    recording: Option<ActiveRecording>,
    /// Sessions with a transcription in flight. A completion for a session
    /// not in this set (already timed out, or duplicated) is discarded,
    /// which is what guarantees exactly-once delivery.
    in_flight: HashSet<u64>,
}

impl SessionController {
    /// Creates an idle controller.
    pub fn new(
        capture: Box<dyn CaptureDevice>,
        engine: Arc<dyn Transcriber>,
        sink: Arc<dyn OutputSink>,
        events: mpsc::UnboundedSender<ControlEvent>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            capture,
            engine,
            sink,
            events,
            min_press: Duration::from_millis(config.min_press_ms),
            transcribe_timeout: Duration::from_secs(config.transcribe_timeout_secs),
            next_id: 0,
            recording: None,
            in_flight: HashSet::new(),
        }
    }

    /// Consume events until `Shutdown` (or the channel closes).
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ControlEvent>) {
        while let Some(event) = rx.recv().await {
            if matches!(event, ControlEvent::Shutdown) {
                self.abort_recording();
                info!("session controller stopped");
                break;
            }
            self.handle_event(event);
        }
    }

    /// Apply one event to the state machine. Never blocks: recording
    /// start/stop are fast, transcription is spawned off this path.
    pub fn handle_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::HotkeyDown => self.on_hotkey_down(),
            ControlEvent::HotkeyUp => self.on_hotkey_up(),
            ControlEvent::TranscriptionDone { session, result } => {
                self.on_transcription_done(session, result);
            }
            ControlEvent::DeviceError(reason) => self.on_device_error(&reason),
            ControlEvent::Shutdown => self.abort_recording(),
        }
    }

    /// Whether a recording is active (for tests and the tray)
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Number of transcriptions currently in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn on_hotkey_down(&mut self) {
        if self.recording.is_some() {
            // OS key-repeat while held; debounced.
            debug!("hotkey down while recording (ignored)");
            return;
        }

        let id = self.next_id;
        match self.capture.start() {
            Ok(()) => {
                self.next_id += 1;
                self.recording = Some(ActiveRecording {
                    id,
                    started_at: Instant::now(),
                });
                info!(session = id, "recording started");
                self.sink.set_status(StatusEvent::Recording);
            }
            Err(e) => {
                // Recoverable: stay idle, next press retries from scratch.
                warn!(session = id, "failed to start recording: {}", e);
                self.sink.set_status(StatusEvent::Error(e.to_string()));
                self.emit_resting_status();
            }
        }
    }

    fn on_hotkey_up(&mut self) {
        let Some(active) = self.recording.take() else {
            debug!("hotkey up while idle (ignored)");
            return;
        };

        let held = active.started_at.elapsed();
        match self.capture.stop() {
            Ok(buffer) => {
                if buffer.duration() < self.min_press {
                    // Too short to be speech; skip the engine entirely.
                    debug!(
                        session = active.id,
                        held_ms = held.as_millis(),
                        buffer_ms = buffer.duration().as_millis(),
                        "press below minimum duration, discarding"
                    );
                    self.emit_resting_status();
                    return;
                }

                info!(
                    session = active.id,
                    audio_ms = buffer.duration().as_millis(),
                    "dispatching transcription"
                );
                self.in_flight.insert(active.id);
                self.sink.set_status(StatusEvent::Transcribing);
                self.spawn_transcription(active.id, buffer);
            }
            Err(e) => {
                // Partial buffer discarded; recoverable.
                warn!(session = active.id, "capture aborted: {}", e);
                self.sink.set_status(StatusEvent::Error(e.to_string()));
                self.emit_resting_status();
            }
        }
    }

    fn on_transcription_done(&mut self, session: u64, result: Result<String, TranscriptionError>) {
        if !self.in_flight.remove(&session) {
            // Already timed out or delivered; never deliver twice.
            debug!(session, "stale transcription result discarded");
            return;
        }

        match result {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    info!(session, "no speech detected");
                } else {
                    info!(session, chars = text.len(), "transcription complete");
                    self.sink.deliver_text(text);
                }
            }
            Err(e) => {
                // Reported, never retried.
                warn!(session, "transcription failed: {}", e);
                self.sink.set_status(StatusEvent::Error(e.to_string()));
            }
        }

        if self.recording.is_none() {
            self.emit_resting_status();
        }
    }

    fn on_device_error(&mut self, reason: &str) {
        warn!("fatal device error: {}", reason);
        self.abort_recording();
        self.sink.set_status(StatusEvent::Error(reason.to_owned()));
        // After reporting, the machine is available again.
        self.emit_resting_status();
    }

    /// Stop an active recording and discard its audio, keeping the
    /// start/stop balance intact.
    fn abort_recording(&mut self) {
        if let Some(active) = self.recording.take() {
            debug!(session = active.id, "aborting active recording");
            if let Err(e) = self.capture.stop() {
                debug!(session = active.id, "abort stop reported: {}", e);
            }
        }
    }

    /// Status when no recording is active: Transcribing while work remains,
    /// Ready otherwise.
    fn emit_resting_status(&self) {
        if self.in_flight.is_empty() {
            self.sink.set_status(StatusEvent::Ready);
        } else {
            self.sink.set_status(StatusEvent::Transcribing);
        }
    }

    /// Hand the frozen buffer to the engine on a blocking task. The hotkey
    /// path is free as soon as this returns; multiple sessions may be in
    /// flight at once and report back in completion order.
    fn spawn_transcription(&self, session: u64, buffer: AudioBuffer) {
        let engine = Arc::clone(&self.engine);
        let events = self.events.clone();
        let timeout = self.transcribe_timeout;

        tokio::spawn(async move {
            let work = tokio::task::spawn_blocking(move || engine.transcribe(&buffer));
            let result = match tokio::time::timeout(timeout, work).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(TranscriptionError::Inference(anyhow::anyhow!(
                    "transcription task panicked: {join_err}"
                ))),
                Err(_) => Err(TranscriptionError::Timeout(timeout.as_secs())),
            };
            // Receiver gone means we are shutting down; nothing to do.
            let _ = events.send(ControlEvent::TranscriptionDone { session, result });
        });
    }
}
