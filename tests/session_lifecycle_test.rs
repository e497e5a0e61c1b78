//! End-to-end tests of the session controller loop: hotkey events in,
//! text and status out, with fake capture/engine/sink implementations
//! standing in for the hardware-facing components.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use pushtalk::audio::{AudioBuffer, CaptureDevice, CaptureError};
use pushtalk::config::SessionConfig;
use pushtalk::session::{ControlEvent, OutputSink, SessionController, StatusEvent};
use pushtalk::transcription::{Transcriber, TranscriptionError};

fn buffer_of_ms(ms: u64) -> AudioBuffer {
    AudioBuffer::new(vec![0.0_f32; (16 * ms) as usize], 16_000, 1)
}

/// Capture fake that returns scripted buffers and counts start/stop calls.
struct FakeCapture {
    stops: Mutex<VecDeque<Result<AudioBuffer, CaptureError>>>,
    start_count: Arc<AtomicUsize>,
    stop_count: Arc<AtomicUsize>,
}

impl FakeCapture {
    fn scripted(
        stops: Vec<Result<AudioBuffer, CaptureError>>,
    ) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let start_count = Arc::new(AtomicUsize::new(0));
        let stop_count = Arc::new(AtomicUsize::new(0));
        (
            Self {
                stops: Mutex::new(stops.into()),
                start_count: Arc::clone(&start_count),
                stop_count: Arc::clone(&stop_count),
            },
            start_count,
            stop_count,
        )
    }
}

impl CaptureDevice for FakeCapture {
    fn start(&mut self) -> Result<(), CaptureError> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<AudioBuffer, CaptureError> {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        self.stops
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(buffer_of_ms(0)))
    }
}

/// Engine fake keyed on buffer duration: each entry maps a duration to a
/// blocking delay and the text to return.
struct FakeEngine {
    script: Vec<(Duration, Duration, &'static str)>,
}

impl Transcriber for FakeEngine {
    fn transcribe(&self, buffer: &AudioBuffer) -> Result<String, TranscriptionError> {
        for (audio_len, delay, text) in &self.script {
            if buffer.duration() == *audio_len {
                std::thread::sleep(*delay);
                return Ok((*text).to_owned());
            }
        }
        Err(TranscriptionError::Inference(anyhow::anyhow!(
            "unscripted buffer of {:?}",
            buffer.duration()
        )))
    }
}

/// Sink that records everything it is given, in order.
#[derive(Default)]
struct RecordingSink {
    texts: Mutex<Vec<String>>,
    statuses: Mutex<Vec<StatusEvent>>,
}

impl OutputSink for RecordingSink {
    fn deliver_text(&self, text: &str) {
        self.texts.lock().unwrap().push(text.to_owned());
    }

    fn set_status(&self, status: StatusEvent) {
        self.statuses.lock().unwrap().push(status);
    }
}

fn config(min_press_ms: u64, timeout_secs: u64) -> SessionConfig {
    SessionConfig {
        min_press_ms,
        transcribe_timeout_secs: timeout_secs,
    }
}

#[tokio::test]
async fn overlapping_sessions_deliver_in_completion_order() {
    // First press yields 2s of audio transcribed slowly; second press yields
    // 1s transcribed quickly. The second result must arrive first, each
    // exactly once.
    let (capture, starts, stops) = FakeCapture::scripted(vec![
        Ok(buffer_of_ms(2_000)),
        Ok(buffer_of_ms(1_000)),
    ]);
    let engine = FakeEngine {
        script: vec![
            (Duration::from_millis(2_000), Duration::from_millis(300), "slow first"),
            (Duration::from_millis(1_000), Duration::from_millis(50), "fast second"),
        ],
    };
    let sink = Arc::new(RecordingSink::default());

    let (tx, rx) = mpsc::unbounded_channel();
    let controller = SessionController::new(
        Box::new(capture),
        Arc::new(engine),
        Arc::clone(&sink) as Arc<dyn OutputSink>,
        tx.clone(),
        &config(200, 30),
    );

    let driver = async {
        tx.send(ControlEvent::HotkeyDown).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(ControlEvent::HotkeyUp).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(ControlEvent::HotkeyDown).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(ControlEvent::HotkeyUp).unwrap();
        // Both transcriptions complete within this window
        tokio::time::sleep(Duration::from_millis(600)).await;
        tx.send(ControlEvent::Shutdown).unwrap();
    };

    let ((), ()) = tokio::join!(controller.run(rx), driver);

    let texts = sink.texts.lock().unwrap().clone();
    assert_eq!(texts, vec!["fast second".to_owned(), "slow first".to_owned()]);
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert_eq!(stops.load(Ordering::SeqCst), 2);

    let statuses = sink.statuses.lock().unwrap().clone();
    assert_eq!(
        statuses.last(),
        Some(&StatusEvent::Ready),
        "machine must end Ready"
    );
}

#[tokio::test]
async fn short_press_skips_transcription_and_returns_ready() {
    // 50ms press, 200ms threshold: the engine must never run.
    let (capture, starts, stops) = FakeCapture::scripted(vec![Ok(buffer_of_ms(50))]);
    let engine = FakeEngine { script: vec![] }; // any call would error
    let sink = Arc::new(RecordingSink::default());

    let (tx, rx) = mpsc::unbounded_channel();
    let controller = SessionController::new(
        Box::new(capture),
        Arc::new(engine),
        Arc::clone(&sink) as Arc<dyn OutputSink>,
        tx.clone(),
        &config(200, 30),
    );

    let driver = async {
        tx.send(ControlEvent::HotkeyDown).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(ControlEvent::HotkeyUp).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(ControlEvent::Shutdown).unwrap();
    };
    let ((), ()) = tokio::join!(controller.run(rx), driver);

    assert!(sink.texts.lock().unwrap().is_empty());
    let statuses = sink.statuses.lock().unwrap().clone();
    assert_eq!(statuses, vec![StatusEvent::Recording, StatusEvent::Ready]);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn full_cycle_status_sequence_and_single_delivery() {
    let (capture, _starts, _stops) = FakeCapture::scripted(vec![Ok(buffer_of_ms(2_000))]);
    let engine = FakeEngine {
        script: vec![(
            Duration::from_millis(2_000),
            Duration::from_millis(100),
            "hello world",
        )],
    };
    let sink = Arc::new(RecordingSink::default());

    let (tx, rx) = mpsc::unbounded_channel();
    let controller = SessionController::new(
        Box::new(capture),
        Arc::new(engine),
        Arc::clone(&sink) as Arc<dyn OutputSink>,
        tx.clone(),
        &config(200, 30),
    );

    let driver = async {
        tx.send(ControlEvent::HotkeyDown).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(ControlEvent::HotkeyUp).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        tx.send(ControlEvent::Shutdown).unwrap();
    };
    let ((), ()) = tokio::join!(controller.run(rx), driver);

    assert_eq!(sink.texts.lock().unwrap().clone(), vec!["hello world".to_owned()]);
    assert_eq!(
        sink.statuses.lock().unwrap().clone(),
        vec![
            StatusEvent::Recording,
            StatusEvent::Transcribing,
            StatusEvent::Ready,
        ]
    );
}

#[tokio::test]
async fn timed_out_session_reports_error_and_never_delivers() {
    let (capture, _starts, _stops) = FakeCapture::scripted(vec![Ok(buffer_of_ms(1_000))]);
    // Engine takes 2s; the session timeout is 1s.
    let engine = FakeEngine {
        script: vec![(
            Duration::from_millis(1_000),
            Duration::from_millis(2_000),
            "too late",
        )],
    };
    let sink = Arc::new(RecordingSink::default());

    let (tx, rx) = mpsc::unbounded_channel();
    let controller = SessionController::new(
        Box::new(capture),
        Arc::new(engine),
        Arc::clone(&sink) as Arc<dyn OutputSink>,
        tx.clone(),
        &config(200, 1),
    );

    let driver = async {
        tx.send(ControlEvent::HotkeyDown).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(ControlEvent::HotkeyUp).unwrap();
        // Wait past both the timeout and the engine's eventual finish
        tokio::time::sleep(Duration::from_millis(2_400)).await;
        tx.send(ControlEvent::Shutdown).unwrap();
    };
    let ((), ()) = tokio::join!(controller.run(rx), driver);

    assert!(
        sink.texts.lock().unwrap().is_empty(),
        "timed-out session must not deliver"
    );
    let statuses = sink.statuses.lock().unwrap().clone();
    let errors = statuses
        .iter()
        .filter(|s| matches!(s, StatusEvent::Error(_)))
        .count();
    assert_eq!(errors, 1, "exactly one timeout error reported");
    assert_eq!(statuses.last(), Some(&StatusEvent::Ready));
}

#[tokio::test]
async fn device_failure_on_stop_recovers_for_next_press() {
    let (capture, starts, stops) = FakeCapture::scripted(vec![
        Err(CaptureError::Aborted),
        Ok(buffer_of_ms(1_000)),
    ]);
    let engine = FakeEngine {
        script: vec![(
            Duration::from_millis(1_000),
            Duration::from_millis(20),
            "recovered",
        )],
    };
    let sink = Arc::new(RecordingSink::default());

    let (tx, rx) = mpsc::unbounded_channel();
    let controller = SessionController::new(
        Box::new(capture),
        Arc::new(engine),
        Arc::clone(&sink) as Arc<dyn OutputSink>,
        tx.clone(),
        &config(200, 30),
    );

    let driver = async {
        tx.send(ControlEvent::HotkeyDown).unwrap();
        tx.send(ControlEvent::HotkeyUp).unwrap(); // aborted by device failure
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(ControlEvent::HotkeyDown).unwrap();
        tx.send(ControlEvent::HotkeyUp).unwrap(); // succeeds
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(ControlEvent::Shutdown).unwrap();
    };
    let ((), ()) = tokio::join!(controller.run(rx), driver);

    assert_eq!(sink.texts.lock().unwrap().clone(), vec!["recovered".to_owned()]);
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert_eq!(stops.load(Ordering::SeqCst), 2);
}
