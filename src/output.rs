//! Delivery of final text and status to the outside world.
//!
//! The controller only sees the [`OutputSink`] trait; the production sink
//! forwards over a channel to the main loop, which owns the tray icon and
//! the keyboard injector. Completion-order delivery falls out of the
//! channel being FIFO.

use anyhow::{Context, Result};
use enigo::{Enigo, Keyboard, Settings};
use tokio::sync::mpsc;
use tracing::debug;

use crate::session::{OutputSink, StatusEvent};

/// What the main loop receives from the controller's sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// Final transcribed text to inject into the focused app
    Text(String),
    /// Status change for the tray
    Status(StatusEvent),
}

/// Channel-backed sink; both calls are fire-and-forget.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// Wrap a sender feeding the main loop
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<SinkEvent>) -> Self {
        Self { tx }
    }
}

impl OutputSink for ChannelSink {
    fn deliver_text(&self, text: &str) {
        let _ = self.tx.send(SinkEvent::Text(text.to_owned()));
    }

    fn set_status(&self, status: StatusEvent) {
        let _ = self.tx.send(SinkEvent::Status(status));
    }
}

/// Types transcribed text into whatever window has focus.
pub struct TextInjector {
    enigo: Enigo,
}

impl TextInjector {
    /// Set up the synthetic-keyboard backend
    ///
    /// # Errors
    /// Returns error if the platform input backend cannot be initialized
    pub fn new() -> Result<Self> {
        let enigo =
            Enigo::new(&Settings::default()).context("failed to initialize keyboard injector")?;
        Ok(Self { enigo })
    }

    /// Type `text` into the focused application
    ///
    /// # Errors
    /// Returns error if the synthetic key events are rejected by the OS
    pub fn inject(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.enigo
            .text(text)
            .context("failed to type text into focused window")?;
        debug!(chars = text.len(), "text injected");
        Ok(())
    }
}
