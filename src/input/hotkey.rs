use anyhow::{anyhow, Context, Result};
use global_hotkey::{
    hotkey::{Code, HotKey, Modifiers},
    GlobalHotKeyEvent, GlobalHotKeyManager,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::HotkeyConfig;
use crate::session::ControlEvent;

/// Registers the push-to-talk key with the OS and translates its
/// press/release stream into [`ControlEvent`]s for the session controller.
///
/// This component only consumes the OS event stream; which key is bound
/// lives in the config.
pub struct HotkeyManager {
    manager: GlobalHotKeyManager,
    hotkey: HotKey,
    events: mpsc::UnboundedSender<ControlEvent>,
}

impl HotkeyManager {
    /// Create and register the global hotkey from config
    ///
    /// # Errors
    /// Returns error if the key spec is invalid or OS registration fails
    pub fn new(config: &HotkeyConfig, events: mpsc::UnboundedSender<ControlEvent>) -> Result<Self> {
        let manager = GlobalHotKeyManager::new().context("failed to create hotkey manager")?;

        let modifiers = parse_modifiers(&config.modifiers)?;
        let code = parse_key(&config.key)?;

        let hotkey = HotKey::new(modifiers, code);
        manager
            .register(hotkey)
            .context("failed to register hotkey")?;

        info!("registered hotkey: {:?} + {}", config.modifiers, config.key);

        Ok(Self {
            manager,
            hotkey,
            events,
        })
    }

    /// Forward a raw OS hotkey event as a down/up control event
    pub fn handle_event(&self, event: &GlobalHotKeyEvent) {
        if event.id != self.hotkey.id() {
            return;
        }

        let control = match event.state {
            global_hotkey::HotKeyState::Pressed => ControlEvent::HotkeyDown,
            global_hotkey::HotKeyState::Released => ControlEvent::HotkeyUp,
        };
        debug!("hotkey {:?}", event.state);
        // Controller gone means shutdown is in progress; drop the event.
        let _ = self.events.send(control);
    }
}

impl Drop for HotkeyManager {
    fn drop(&mut self) {
        if let Err(e) = self.manager.unregister(self.hotkey) {
            tracing::error!("failed to unregister hotkey: {}", e);
        }
    }
}

fn parse_modifiers(modifiers: &[String]) -> Result<Option<Modifiers>> {
    if modifiers.is_empty() {
        return Ok(None);
    }
    let mut result = Modifiers::empty();
    for modifier in modifiers {
        match modifier.as_str() {
            "Control" | "Ctrl" => result |= Modifiers::CONTROL,
            "Option" | "Alt" => result |= Modifiers::ALT,
            "Command" | "Super" => result |= Modifiers::SUPER,
            "Shift" => result |= Modifiers::SHIFT,
            _ => return Err(anyhow!("unknown modifier: {}", modifier)),
        }
    }
    Ok(Some(result))
}

fn parse_key(key: &str) -> Result<Code> {
    let code = match key {
        "F1" => Code::F1,
        "F2" => Code::F2,
        "F3" => Code::F3,
        "F4" => Code::F4,
        "F5" => Code::F5,
        "F6" => Code::F6,
        "F7" => Code::F7,
        "F8" => Code::F8,
        "F9" => Code::F9,
        "F10" => Code::F10,
        "F11" => Code::F11,
        "F12" => Code::F12,
        "Insert" => Code::Insert,
        "Pause" => Code::Pause,
        "ScrollLock" => Code::ScrollLock,
        other => {
            // Single letters fall through to KeyA..KeyZ
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_uppercase() => letter_code(c),
                _ => return Err(anyhow!("unsupported key: {}", key)),
            }
        }
    };
    Ok(code)
}

fn letter_code(c: char) -> Code {
    match c {
        'A' => Code::KeyA,
        'B' => Code::KeyB,
        'C' => Code::KeyC,
        'D' => Code::KeyD,
        'E' => Code::KeyE,
        'F' => Code::KeyF,
        'G' => Code::KeyG,
        'H' => Code::KeyH,
        'I' => Code::KeyI,
        'J' => Code::KeyJ,
        'K' => Code::KeyK,
        'L' => Code::KeyL,
        'M' => Code::KeyM,
        'N' => Code::KeyN,
        'O' => Code::KeyO,
        'P' => Code::KeyP,
        'Q' => Code::KeyQ,
        'R' => Code::KeyR,
        'S' => Code::KeyS,
        'T' => Code::KeyT,
        'U' => Code::KeyU,
        'V' => Code::KeyV,
        'W' => Code::KeyW,
        'X' => Code::KeyX,
        'Y' => Code::KeyY,
        _ => Code::KeyZ,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_function_keys() {
        assert_eq!(parse_key("F9").unwrap(), Code::F9);
        assert_eq!(parse_key("F1").unwrap(), Code::F1);
        assert_eq!(parse_key("F12").unwrap(), Code::F12);
    }

    #[test]
    fn test_parse_letters() {
        assert_eq!(parse_key("A").unwrap(), Code::KeyA);
        assert_eq!(parse_key("Z").unwrap(), Code::KeyZ);
    }

    #[test]
    fn test_parse_special_keys() {
        assert_eq!(parse_key("Insert").unwrap(), Code::Insert);
        assert_eq!(parse_key("ScrollLock").unwrap(), Code::ScrollLock);
    }

    #[test]
    fn test_parse_key_rejects_unknown() {
        assert!(parse_key("F13").is_err());
        assert!(parse_key("lowercase").is_err());
        assert!(parse_key("").is_err());
    }

    #[test]
    fn test_parse_modifiers_empty_is_none() {
        assert_eq!(parse_modifiers(&[]).unwrap(), None);
    }

    #[test]
    fn test_parse_modifiers_combined() {
        let mods = parse_modifiers(&["Control".to_owned(), "Shift".to_owned()])
            .unwrap()
            .unwrap();
        assert!(mods.contains(Modifiers::CONTROL));
        assert!(mods.contains(Modifiers::SHIFT));
        assert!(!mods.contains(Modifiers::ALT));
    }

    #[test]
    fn test_parse_modifier_aliases() {
        let ctrl = parse_modifiers(&["Ctrl".to_owned()]).unwrap().unwrap();
        assert!(ctrl.contains(Modifiers::CONTROL));
        let alt = parse_modifiers(&["Alt".to_owned()]).unwrap().unwrap();
        assert!(alt.contains(Modifiers::ALT));
    }

    #[test]
    fn test_parse_modifiers_rejects_unknown() {
        assert!(parse_modifiers(&["Hyper".to_owned()]).is_err());
    }
}
