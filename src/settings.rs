use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::logging::LogSettings;
use crate::matcher::MatcherOptions;

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "textmark";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub matcher: MatcherOptions,

    #[serde(default = "default_tooltip_timeout_ms")]
    pub tooltip_timeout_ms: u64,

    /// Height of one rendered page, used when no page markup is found
    #[serde(default = "default_viewport_height")]
    pub viewport_height: f64,

    /// Pause between consecutive highlights of a batch
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Extra search-and-apply attempts after a range failure
    #[serde(default = "default_range_failure_retries")]
    pub range_failure_retries: u32,

    #[serde(default)]
    pub logging: LogSettings,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_tooltip_timeout_ms() -> u64 {
    5000
}

fn default_viewport_height() -> f64 {
    800.0
}

fn default_batch_delay_ms() -> u64 {
    100
}

fn default_ready_timeout_ms() -> u64 {
    10_000
}

fn default_range_failure_retries() -> u32 {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            matcher: MatcherOptions::default(),
            tooltip_timeout_ms: default_tooltip_timeout_ms(),
            viewport_height: default_viewport_height(),
            batch_delay_ms: default_batch_delay_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            range_failure_retries: default_range_failure_retries(),
            logging: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn tooltip_timeout(&self) -> Duration {
        Duration::from_millis(self.tooltip_timeout_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Loads settings from `path`, or from the user config directory when no path
/// is given. A missing default config file is created with defaults; unreadable
/// files are logged and fall back to defaults.
pub fn load_settings(path: Option<&Path>) -> Settings {
    if let Some(path) = path {
        return load_settings_from_path(path);
    }

    let Some(path) = config_path() else {
        warn!("Could not determine config directory, using default settings");
        return Settings::default();
    };
    if path.exists() {
        return load_settings_from_path(&path);
    }

    info!("Settings file not found, creating with defaults at {path:?}");
    let settings = Settings::default();
    if let Err(e) = save_settings_to_file(&settings, &path) {
        error!("{e:#}");
    }
    settings
}

pub fn load_settings_from_path(path: &Path) -> Settings {
    match read_settings(path) {
        Ok(mut settings) => {
            debug!("Loaded settings from {path:?}");
            if settings.version < CURRENT_VERSION {
                migrate_settings(&mut settings);
                if let Err(e) = save_settings_to_file(&settings, path) {
                    error!("{e:#}");
                }
            }
            settings
        }
        Err(e) => {
            error!("{e:#}");
            Settings::default()
        }
    }
}

fn read_settings(path: &Path) -> Result<Settings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {path:?}"))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse settings file {path:?}"))
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // Version 0 files predate the version field; every other field already
    // falls back to its default.

    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {parent:?}"))?;
        }
    }

    let body = serde_yaml::to_string(settings).context("Failed to serialize settings")?;
    let content = format!("{SETTINGS_HEADER}{body}");
    fs::write(path, content).with_context(|| format!("Failed to save settings to {path:?}"))?;
    debug!("Saved settings to {path:?}");
    Ok(())
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# textmark settings
# ============================================================================
# matcher.min_target_len   shortest target text that is searched at all
# matcher.window_words     consecutive words tried when no exact match exists
# matcher.min_word_len     shortest word used as a partial-match anchor
# viewport_height          page height in pixels for the layout page estimate
# logging.target_levels    per-module levels, e.g. "textmark::matcher: trace"
# logging.muted_targets    modules whose messages are dropped

"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: Settings = serde_yaml::from_str("batch_delay_ms: 250\n").unwrap();
        assert_eq!(settings.batch_delay(), Duration::from_millis(250));
        assert_eq!(settings.tooltip_timeout(), Duration::from_secs(5));
        assert_eq!(settings.matcher, MatcherOptions::default());
        assert_eq!(settings.range_failure_retries, 1);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILENAME);
        let mut settings = Settings::default();
        settings.viewport_height = 1123.0;
        settings.matcher.window_words = 4;
        settings.logging.level = "debug".to_string();

        save_settings_to_file(&settings, &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# ===="));

        assert_eq!(load_settings(Some(path.as_path())), settings);
    }

    #[test]
    fn test_old_version_is_migrated_and_saved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "version: 0\nviewport_height: 900\n").unwrap();

        let settings = load_settings_from_path(&path);
        assert_eq!(settings.version, CURRENT_VERSION);
        assert_eq!(settings.viewport_height, 900.0);

        let reloaded = read_settings(&path).unwrap();
        assert_eq!(reloaded.version, CURRENT_VERSION);
    }

    #[test]
    fn test_unparseable_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "matcher: [not, a, map]\n").unwrap();

        assert_eq!(load_settings_from_path(&path), Settings::default());
    }
}
