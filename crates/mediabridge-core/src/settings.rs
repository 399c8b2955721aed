use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::sanitizer::PlatformFamily;

/// Bridge configuration, persisted between launches.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BridgeSettings {
    /// Selects the allowed-keys tables used by the sanitizer.
    #[serde(default)]
    pub platform: PlatformFamily,
    /// Lifecycle lines go to `info` instead of `debug` when set.
    #[serde(default)]
    pub logs_enabled: bool,
    /// How long `destroyPublisher` waits for the engine to confirm the
    /// unpublish before giving up on it. `None` waits forever.
    #[serde(default = "default_destroy_timeout")]
    pub publisher_destroy_timeout_ms: Option<u64>,
}

fn default_destroy_timeout() -> Option<u64> {
    Some(10_000)
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            platform: PlatformFamily::default(),
            logs_enabled: false,
            publisher_destroy_timeout_ms: default_destroy_timeout(),
        }
    }
}

pub struct SettingsStore {
    settings: Mutex<BridgeSettings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &str) -> Self {
        let file_path = PathBuf::from(data_dir).join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn get(&self) -> BridgeSettings {
        self.settings.lock().unwrap().clone()
    }

    pub fn set_platform(&self, platform: PlatformFamily) {
        self.settings.lock().unwrap().platform = platform;
        self.save();
    }

    pub fn set_logs_enabled(&self, enabled: bool) {
        self.settings.lock().unwrap().logs_enabled = enabled;
        self.save();
    }

    pub fn set_publisher_destroy_timeout_ms(&self, timeout_ms: Option<u64>) {
        self.settings.lock().unwrap().publisher_destroy_timeout_ms = timeout_ms;
        self.save();
    }

    fn save(&self) {
        let settings = self.settings.lock().unwrap().clone();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!(path = %self.file_path.display(), "failed to write settings: {e}");
                }
            }
            Err(e) => tracing::warn!("failed to serialize settings: {e}"),
        }
    }

    fn load(path: &Path) -> BridgeSettings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "ignoring unreadable settings: {e}");
                BridgeSettings::default()
            }),
            Err(_) => BridgeSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_default_settings() {
        let s = BridgeSettings::default();
        assert_eq!(s.platform, PlatformFamily::Ios);
        assert!(!s.logs_enabled);
        assert_eq!(s.publisher_destroy_timeout_ms, Some(10_000));
    }

    #[test]
    fn test_new_creates_defaults_when_no_file() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path().to_str().unwrap());
        assert_eq!(store.get(), BridgeSettings::default());
    }

    #[test]
    fn test_set_platform_persists() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        {
            let store = SettingsStore::new(path);
            store.set_platform(PlatformFamily::Android);
        }
        let store = SettingsStore::new(path);
        assert_eq!(store.get().platform, PlatformFamily::Android);
    }

    #[test]
    fn test_logs_and_timeout_persist() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        {
            let store = SettingsStore::new(path);
            store.set_logs_enabled(true);
            store.set_publisher_destroy_timeout_ms(None);
        }
        let store = SettingsStore::new(path);
        let s = store.get();
        assert!(s.logs_enabled);
        assert_eq!(s.publisher_destroy_timeout_ms, None);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        fs::write(dir.path().join("settings.json"), "not json!!!").unwrap();
        let store = SettingsStore::new(path);
        assert_eq!(store.get(), BridgeSettings::default());
    }

    #[test]
    fn test_partial_json_uses_serde_defaults() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        fs::write(dir.path().join("settings.json"), r#"{"platform":"android"}"#).unwrap();
        let store = SettingsStore::new(path);
        let s = store.get();
        assert_eq!(s.platform, PlatformFamily::Android);
        assert!(!s.logs_enabled);
        assert_eq!(s.publisher_destroy_timeout_ms, Some(10_000));
    }
}
