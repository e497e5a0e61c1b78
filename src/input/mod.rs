//! Global hotkey listening.

/// Push-to-talk hotkey registration and event translation
pub mod hotkey;

pub use hotkey::HotkeyManager;
