//! Persistent host settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use soundtrap_core::{CpalSourceConfig, EngineConfig, StopBehavior};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub threshold_dbfs: f32,
    pub min_retrigger_ms: u64,
    pub pre_roll_secs: f32,
    pub post_roll_secs: f32,
    pub block_ms: u32,
    pub output_dir: PathBuf,
    pub upload_url: Option<String>,
    pub upload_token: Option<String>,
    pub stop_behavior: StopBehavior,
    /// Log one level line every N blocks; 0 disables level logging.
    pub level_log_every: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            threshold_dbfs: -30.0,
            min_retrigger_ms: 1_000,
            pre_roll_secs: 3.0,
            post_roll_secs: 3.0,
            block_ms: 20,
            output_dir: default_output_dir(),
            upload_url: None,
            upload_token: None,
            stop_behavior: StopBehavior::Discard,
            level_log_every: 50,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        if !self.threshold_dbfs.is_finite() {
            self.threshold_dbfs = -30.0;
        }
        self.threshold_dbfs = self.threshold_dbfs.clamp(-100.0, 0.0);
        self.min_retrigger_ms = self.min_retrigger_ms.min(60_000);
        self.pre_roll_secs = clamp_secs(self.pre_roll_secs, 3.0);
        self.post_roll_secs = clamp_secs(self.post_roll_secs, 3.0);
        self.block_ms = self.block_ms.clamp(5, 500);
        self.level_log_every = self.level_log_every.min(10_000);
        self.preferred_input_device = trimmed(self.preferred_input_device.take());
        self.upload_url = trimmed(self.upload_url.take());
        self.upload_token = trimmed(self.upload_token.take());
        if self.output_dir.as_os_str().is_empty() {
            self.output_dir = default_output_dir();
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            threshold_dbfs: self.threshold_dbfs,
            min_retrigger_interval: Duration::from_millis(self.min_retrigger_ms),
            pre_roll: Duration::from_secs_f32(self.pre_roll_secs),
            post_roll: Duration::from_secs_f32(self.post_roll_secs),
            stop_behavior: self.stop_behavior,
            ..EngineConfig::default()
        }
    }

    pub fn source_config(&self) -> CpalSourceConfig {
        CpalSourceConfig {
            preferred_device: self.preferred_input_device.clone(),
            block_ms: self.block_ms,
        }
    }
}

fn clamp_secs(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 60.0)
    } else {
        fallback
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Soundtrap")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("soundtrap")
    }
}

pub fn default_settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

pub fn default_output_dir() -> PathBuf {
    data_dir().join("segments")
}

/// Missing or unparsable files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let mut settings = AppSettings {
            threshold_dbfs: 12.0,
            pre_roll_secs: -1.0,
            post_roll_secs: f32::NAN,
            block_ms: 1,
            preferred_input_device: Some("   ".into()),
            upload_url: Some(" https://example.invalid/upload ".into()),
            output_dir: PathBuf::new(),
            ..AppSettings::default()
        };
        settings.normalize();

        assert_eq!(settings.threshold_dbfs, 0.0);
        assert_eq!(settings.pre_roll_secs, 0.0);
        assert_eq!(settings.post_roll_secs, 3.0);
        assert_eq!(settings.block_ms, 5);
        assert_eq!(settings.preferred_input_device, None);
        assert_eq!(
            settings.upload_url.as_deref(),
            Some("https://example.invalid/upload")
        );
        assert_eq!(settings.output_dir, default_output_dir());
    }

    #[test]
    fn partial_json_uses_defaults_for_missing_fields() {
        let parsed: AppSettings =
            serde_json::from_str(r#"{ "thresholdDbfs": -20, "stopBehavior": "finalizeEarly" }"#)
                .unwrap();
        assert_eq!(parsed.threshold_dbfs, -20.0);
        assert_eq!(parsed.stop_behavior, StopBehavior::FinalizeEarly);
        assert_eq!(parsed.min_retrigger_ms, 1_000);
        assert_eq!(parsed.block_ms, 20);
    }

    #[test]
    fn engine_config_carries_timing_settings() {
        let settings = AppSettings {
            min_retrigger_ms: 250,
            pre_roll_secs: 1.5,
            post_roll_secs: 2.0,
            ..AppSettings::default()
        };
        let config = settings.engine_config();
        assert_eq!(config.min_retrigger_interval, Duration::from_millis(250));
        assert_eq!(config.pre_roll, Duration::from_millis(1_500));
        assert_eq!(config.post_roll, Duration::from_secs(2));
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let path = std::env::temp_dir()
            .join(format!("soundtrap-settings-{}", std::process::id()))
            .join("settings.json");
        let settings = AppSettings {
            threshold_dbfs: -18.0,
            upload_url: Some("http://127.0.0.1:8080/segments".into()),
            ..AppSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);

        if let Some(parent) = path.parent() {
            fs::remove_dir_all(parent).unwrap();
        }
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("soundtrap-settings-does-not-exist.json");
        assert_eq!(load_settings(&path), AppSettings::default());
    }
}
