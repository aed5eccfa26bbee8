//! Configuration for the appmux runtime.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.appmux/config.toml`
//! - Key combination parsing for the focus-switch binding
//! - Timing knobs for the event pump and shutdown grace period
//!
//! # Configuration File
//!
//! The configuration file is located at `~/.appmux/config.toml`:
//!
//! ```toml
//! # Key combination that moves focus to the next application
//! focus_switch = "ctrl+a"
//!
//! [timing]
//! # Event pump poll timeout in milliseconds
//! poll_timeout_ms = 10
//! # How long shutdown waits for each application to stop
//! stop_grace_ms = 3000
//! ```
//!
//! Missing keys fall back to their defaults; a missing or malformed
//! file yields `Config::default()`.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Key combination that moves focus to the next application
    pub focus_switch: String,
    /// Timing settings
    pub timing: TimingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            focus_switch: "ctrl+a".to_string(),
            timing: TimingConfig::default(),
        }
    }
}

/// Timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Event pump poll timeout in milliseconds
    pub poll_timeout_ms: u64,
    /// Grace period for cooperative stop during shutdown, in milliseconds
    pub stop_grace_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 10,
            stop_grace_ms: 3000,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(config) = toml::from_str(&content) {
                        return config;
                    }
                }
            }
        }
        Self::default()
    }

    /// Save configuration to file
    #[allow(dead_code)]
    pub fn save(&self) -> Result<(), String> {
        if let Some(path) = Self::get_config_path() {
            let content = toml::to_string_pretty(self)
                .map_err(|e| format!("Failed to serialize config: {}", e))?;
            fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
            Ok(())
        } else {
            Err("Could not determine config path".to_string())
        }
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        if let Some(home) = home_dir() {
            let appmux_dir = home.join(".appmux");
            if !appmux_dir.exists() {
                let _ = fs::create_dir_all(&appmux_dir);
            }
            return Some(appmux_dir.join("config.toml"));
        }
        None
    }

    /// Get the focus-switch key combination, falling back to the
    /// default binding if the configured string does not parse.
    pub fn focus_switch_combo(&self) -> KeyCombo {
        KeyCombo::parse(&self.focus_switch).unwrap_or(KeyCombo {
            code: KeyCode::Char('a'),
            modifiers: KeyModifiers::CONTROL,
        })
    }

    /// Event pump poll timeout
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.poll_timeout_ms)
    }

    /// Shutdown grace period per application
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.timing.stop_grace_ms)
    }
}

/// A key combination such as `ctrl+a` or `alt+shift+tab`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCombo {
    pub code: KeyCode,
    pub modifiers: KeyModifiers,
}

impl KeyCombo {
    /// Parse a combination from its textual form.
    ///
    /// The last `+`-separated part names the key (`a`, `tab`, `esc`,
    /// `space`, `f1`..`f12`, ...); earlier parts are `ctrl`, `alt` and
    /// `shift` modifiers. Returns `None` for unrecognized input.
    pub fn parse(s: &str) -> Option<Self> {
        let mut modifiers = KeyModifiers::NONE;
        let parts: Vec<&str> = s.split('+').map(|p| p.trim()).collect();
        let (key_part, modifier_parts) = parts.split_last()?;

        for part in modifier_parts {
            match part.to_lowercase().as_str() {
                "ctrl" | "control" => modifiers |= KeyModifiers::CONTROL,
                "alt" => modifiers |= KeyModifiers::ALT,
                "shift" => modifiers |= KeyModifiers::SHIFT,
                _ => return None,
            }
        }

        let code = match key_part.to_lowercase().as_str() {
            "" => return None,
            "tab" => KeyCode::Tab,
            "esc" | "escape" => KeyCode::Esc,
            "space" => KeyCode::Char(' '),
            "enter" | "return" => KeyCode::Enter,
            "backspace" => KeyCode::Backspace,
            "up" => KeyCode::Up,
            "down" => KeyCode::Down,
            "left" => KeyCode::Left,
            "right" => KeyCode::Right,
            "home" => KeyCode::Home,
            "end" => KeyCode::End,
            "pageup" => KeyCode::PageUp,
            "pagedown" => KeyCode::PageDown,
            key => {
                if let Some(n) = key.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                    if (1..=12).contains(&n) {
                        KeyCode::F(n)
                    } else {
                        return None;
                    }
                } else {
                    let mut chars = key.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => KeyCode::Char(c),
                        _ => return None,
                    }
                }
            }
        };

        Some(Self { code, modifiers })
    }

    /// Whether a received key event is exactly this combination
    pub fn matches(&self, key: &KeyEvent) -> bool {
        key.code == self.code && key.modifiers == self.modifiers
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
