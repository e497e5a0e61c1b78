//! Status tray icon.
//!
//! Purely observational: the icon mirrors the controller's status events
//! and never feeds back into the state machine. Icons are rendered
//! in-memory so the binary carries no asset files.

use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use std::collections::HashMap;
use tray_icon::menu::{Menu, MenuId, MenuItem, PredefinedMenuItem};
use tray_icon::{Icon, TrayIconBuilder};

use crate::session::StatusEvent;

const ICON_SIZE: u32 = 32;

/// Icon variants, one per externally visible status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum IconState {
    Ready,
    Recording,
    Transcribing,
    Error,
}

impl IconState {
    const fn for_status(status: &StatusEvent) -> Self {
        match status {
            StatusEvent::Ready => Self::Ready,
            StatusEvent::Recording => Self::Recording,
            StatusEvent::Transcribing => Self::Transcribing,
            StatusEvent::Error(_) => Self::Error,
        }
    }

    const fn color(self) -> [u8; 4] {
        match self {
            Self::Ready => [128, 128, 128, 255],     // gray
            Self::Recording => [220, 60, 60, 255],   // red
            Self::Transcribing => [230, 180, 40, 255], // amber
            Self::Error => [150, 60, 180, 255],      // purple
        }
    }

    const fn tooltip(self) -> &'static str {
        match self {
            Self::Ready => "Pushtalk: ready",
            Self::Recording => "Pushtalk: recording",
            Self::Transcribing => "Pushtalk: transcribing",
            Self::Error => "Pushtalk: error",
        }
    }
}

/// Tray icon that tracks the session status.
pub struct StatusTray {
    tray: tray_icon::TrayIcon,
    current: IconState,
    icons: HashMap<IconState, Icon>,
    quit_id: MenuId,
    open_config_id: MenuId,
}

impl StatusTray {
    /// Build the tray with its menu, starting in the Ready state
    ///
    /// # Errors
    /// Returns error if the platform tray cannot be created
    pub fn new(hotkey_label: &str) -> Result<Self> {
        let mut icons = HashMap::new();
        for state in [
            IconState::Ready,
            IconState::Recording,
            IconState::Transcribing,
            IconState::Error,
        ] {
            icons.insert(state, render_icon(state.color())?);
        }

        let menu = Menu::new();
        let header = MenuItem::new(
            format!("Pushtalk (hold {hotkey_label} to dictate)"),
            false,
            None,
        );
        let open_config = MenuItem::new("Open config file", true, None);
        // PredefinedMenuItem::quit() would bypass the event loop entirely,
        // skipping shutdown; use a plain item routed through MenuEvent.
        let quit = MenuItem::new("Quit", true, None);
        menu.append_items(&[
            &header,
            &PredefinedMenuItem::separator(),
            &open_config,
            &PredefinedMenuItem::separator(),
            &quit,
        ])
        .context("failed to build tray menu")?;

        let ready_icon = icons
            .get(&IconState::Ready)
            .context("ready icon missing from cache")?
            .clone();

        let tray = TrayIconBuilder::new()
            .with_menu(Box::new(menu))
            .with_tooltip(IconState::Ready.tooltip())
            .with_icon(ready_icon)
            .build()
            .context("failed to build tray icon")?;

        Ok(Self {
            tray,
            current: IconState::Ready,
            icons,
            quit_id: quit.id().clone(),
            open_config_id: open_config.id().clone(),
        })
    }

    /// Reflect a status change; no-op if the icon already matches
    ///
    /// # Errors
    /// Returns error if the platform refuses the icon update
    pub fn set_status(&mut self, status: &StatusEvent) -> Result<()> {
        let state = IconState::for_status(status);
        if state == self.current {
            return Ok(());
        }
        tracing::debug!("tray state change: {:?} -> {:?}", self.current, state);

        let icon = self
            .icons
            .get(&state)
            .with_context(|| format!("icon for state {state:?} not in cache"))?
            .clone();
        self.tray
            .set_icon(Some(icon))
            .context("failed to update tray icon")?;
        self.tray
            .set_tooltip(Some(state.tooltip()))
            .context("failed to update tray tooltip")?;
        self.current = state;
        Ok(())
    }

    /// Menu id of the Quit entry
    #[must_use]
    pub const fn quit_id(&self) -> &MenuId {
        &self.quit_id
    }

    /// Menu id of the open-config entry
    #[must_use]
    pub const fn open_config_id(&self) -> &MenuId {
        &self.open_config_id
    }
}

/// Render a filled circle on a transparent square
fn render_icon(color: [u8; 4]) -> Result<Icon> {
    let mut img = RgbaImage::from_pixel(ICON_SIZE, ICON_SIZE, Rgba([0, 0, 0, 0]));
    let center = f64::from(ICON_SIZE) / 2.0;
    let radius = center - 2.0;

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let dx = f64::from(x) + 0.5 - center;
        let dy = f64::from(y) + 0.5 - center;
        if dx.hypot(dy) <= radius {
            *pixel = Rgba(color);
        }
    }

    Icon::from_rgba(img.into_raw(), ICON_SIZE, ICON_SIZE)
        .context("failed to create icon from RGBA data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icon_state_maps_statuses() {
        assert_eq!(
            IconState::for_status(&StatusEvent::Ready),
            IconState::Ready
        );
        assert_eq!(
            IconState::for_status(&StatusEvent::Recording),
            IconState::Recording
        );
        assert_eq!(
            IconState::for_status(&StatusEvent::Transcribing),
            IconState::Transcribing
        );
        assert_eq!(
            IconState::for_status(&StatusEvent::Error("x".to_owned())),
            IconState::Error
        );
    }

    #[test]
    fn test_render_icon_produces_valid_rgba() {
        // Icon::from_rgba validates dimensions against the byte length
        assert!(render_icon(IconState::Recording.color()).is_ok());
    }

    #[test]
    fn test_error_reasons_share_one_icon() {
        let a = IconState::for_status(&StatusEvent::Error("mic".to_owned()));
        let b = IconState::for_status(&StatusEvent::Error("model".to_owned()));
        assert_eq!(a, b);
    }
}
