use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Model names accepted in `[model] name`. Matches the ggml checkpoints
/// published for whisper.cpp on HuggingFace.
pub const AVAILABLE_MODELS: &[&str] = &[
    "tiny.en", "tiny", "base.en", "base", "small.en", "small", "medium.en", "medium", "large-v3",
    "large-v3-turbo",
];

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub hotkey: HotkeyConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
    pub model: ModelConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HotkeyConfig {
    /// Modifier names: "Control"/"Ctrl", "Option"/"Alt", "Command"/"Super", "Shift"
    pub modifiers: Vec<String>,
    /// Key name: a letter or a function key ("A".."Z", "F1".."F12")
    pub key: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            modifiers: Vec::new(),
            key: "F9".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name. None = system default device.
    pub device: Option<String>,
    /// Hard cap on a single recording; the capture buffer is sized for this.
    pub max_recording_secs: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            max_recording_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// Presses shorter than this never reach the transcription engine.
    pub min_press_ms: u64,
    /// Per-session transcription timeout.
    pub transcribe_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_press_ms: 200,
            transcribe_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    /// One of [`AVAILABLE_MODELS`].
    pub name: String,
    /// Directory holding the ggml model files.
    pub dir: String,
    /// Load the model at startup instead of on first transcription.
    pub preload: bool,
    /// CPU threads for inference.
    pub threads: usize,
    /// Beam width; 1 = greedy sampling.
    pub beam_size: usize,
    /// Language code, None = auto-detect.
    pub language: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "base.en".to_owned(),
            dir: "~/.pushtalk/models".to_owned(),
            preload: true,
            threads: 4,
            beam_size: 5,
            language: Some("en".to_owned()),
        }
    }
}

impl ModelConfig {
    /// Resolved path of the configured ggml model file
    ///
    /// # Errors
    /// Returns error if HOME is not set
    pub fn model_path(&self) -> Result<PathBuf> {
        Ok(Config::expand_path(&self.dir)?.join(format!("ggml-{}.bin", self.name)))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub log_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: "~/.pushtalk/pushtalk.log".to_owned(),
        }
    }
}

impl Config {
    /// Load config from ~/.pushtalk.toml, creating a default file on first run
    ///
    /// # Errors
    /// Returns error if the file cannot be read/written, fails to parse, or
    /// fails validation
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        let contents = fs::read_to_string(&config_path).context("failed to read config file")?;

        let config: Self = toml::from_str(&contents).context("failed to parse config TOML")?;
        config.validate()?;

        Ok(config)
    }

    /// Path of the user config file
    ///
    /// # Errors
    /// Returns error if HOME is not set
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".pushtalk.toml"))
    }

    fn create_default(path: &PathBuf) -> Result<()> {
        let default_config = r#"[hotkey]
modifiers = []
key = "F9"

[audio]
# device = "USB Microphone"
max_recording_secs = 120

[session]
min_press_ms = 200
transcribe_timeout_secs = 30

[model]
name = "base.en"
dir = "~/.pushtalk/models"
preload = true
threads = 4
beam_size = 5
language = "en"

[telemetry]
enabled = true
log_path = "~/.pushtalk/pushtalk.log"
"#;
        fs::write(path, default_config).context("failed to write default config")?;
        Ok(())
    }

    /// Validate whitelisted values
    ///
    /// # Errors
    /// Returns error for unknown model names or zero-valued tuning knobs
    pub fn validate(&self) -> Result<()> {
        if !AVAILABLE_MODELS.contains(&self.model.name.as_str()) {
            bail!(
                "unknown model '{}', choose one of: {}",
                self.model.name,
                AVAILABLE_MODELS.join(", ")
            );
        }
        if self.model.threads == 0 {
            bail!("model.threads must be > 0");
        }
        if self.model.beam_size == 0 {
            bail!("model.beam_size must be > 0");
        }
        if self.audio.max_recording_secs == 0 {
            bail!("audio.max_recording_secs must be > 0");
        }
        Ok(())
    }

    /// Expand ~ in paths to home directory
    ///
    /// # Errors
    /// Returns error if HOME is not set
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.hotkey.key, "F9");
        assert!(config.hotkey.modifiers.is_empty());
        assert_eq!(config.session.min_press_ms, 200);
        assert_eq!(config.session.transcribe_timeout_secs, 30);
        assert_eq!(config.model.name, "base.en");
        assert_eq!(config.audio.max_recording_secs, 120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
[hotkey]
key = "F12"

[session]
min_press_ms = 150
"#,
        )
        .expect("partial config should parse");

        assert_eq!(config.hotkey.key, "F12");
        assert_eq!(config.session.min_press_ms, 150);
        // Untouched sections keep defaults
        assert_eq!(config.session.transcribe_timeout_secs, 30);
        assert_eq!(config.model.name, "base.en");
    }

    #[test]
    fn test_validate_rejects_unknown_model() {
        let mut config = Config::default();
        config.model.name = "gpt-4".to_owned();
        let err = config.validate().expect_err("unknown model must fail");
        assert!(err.to_string().contains("unknown model"));
    }

    #[test]
    fn test_validate_rejects_zero_threads() {
        let mut config = Config::default();
        config.model.threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_max_recording() {
        let mut config = Config::default();
        config.audio.max_recording_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let home = std::env::var("HOME").expect("HOME not set");
        let result = Config::expand_path("~/models/ggml-base.en.bin").expect("expand failed");
        assert_eq!(result, PathBuf::from(home).join("models/ggml-base.en.bin"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let result = Config::expand_path("/opt/models").expect("expand failed");
        assert_eq!(result, PathBuf::from("/opt/models"));
    }

    #[test]
    fn test_model_path_uses_ggml_naming() {
        let config = Config::default();
        let path = config.model.model_path().expect("model path");
        assert!(path.to_string_lossy().ends_with("ggml-base.en.bin"));
    }
}
