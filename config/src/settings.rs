//! Application settings management

use crate::PathManager;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Application settings stored in settings.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Turn segmentation parameters
    #[serde(default)]
    pub vad: VadSettings,
    /// Viseme scheduling parameters
    #[serde(default)]
    pub lipsync: LipSyncSettings,
    /// `EnvFilter` directive used when `RUST_LOG` is unset (e.g. "info,murmur_audio=debug")
    pub log_filter: Option<String>,
}

/// Voice activity detection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadSettings {
    /// RMS threshold on samples normalized to [-1, 1]
    pub energy_threshold: f32,
    /// Contiguous voiced audio required to open a turn
    pub startup_ms: u64,
    /// Contiguous silence required to close a turn
    pub shutdown_ms: u64,
    pub sample_rate_hz: u32,
    /// Samples per block
    pub block_size: usize,
    /// Forward the whole confirming voiced run on turn start, not just the last block
    pub forward_preroll: bool,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            startup_ms: 120,
            shutdown_ms: 350,
            sample_rate_hz: 16000,
            block_size: 256,
            forward_preroll: true,
        }
    }
}

/// Lip-sync settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LipSyncSettings {
    /// Output latency added before the first sample is audible
    pub lead_sec: f64,
    /// Delay after the last scheduled viseme before the mouth closes
    pub rest_delay_ms: u64,
    /// Shape id shown when the mouth is at rest
    pub rest_shape: u8,
    /// Cancel the reply being spoken when the user starts talking
    pub barge_in: bool,
}

impl Default for LipSyncSettings {
    fn default() -> Self {
        Self {
            lead_sec: 0.12,
            rest_delay_ms: 150,
            rest_shape: 0,
            barge_in: true,
        }
    }
}

impl Settings {
    /// Load settings from the settings file, or return defaults if not found
    pub fn load() -> Self {
        let Some(path) = PathManager::settings_path() else {
            return Self::default();
        };

        Self::load_from(&path).unwrap_or_default()
    }

    /// Load settings from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
    }

    /// Write pretty TOML, creating the parent directory
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))?;
        Ok(())
    }
}
