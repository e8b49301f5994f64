//! Persisted user settings.
//!
//! Stored as JSON:
//!
//! ```json
//! {
//!   "sources": { "flatpak": true, "snap": false, "aur": true, "nix": false },
//!   "packages": { "brave": true, "gimp": false },
//!   "aur_helper": "paru"
//! }
//! ```
//!
//! Missing keys fall back to built-in defaults. A missing file is a first
//! launch; an unreadable or corrupt file is logged and treated the same.

use crate::types::{AurHelper, Backend, EnabledBackends, Selection};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const APP_DIR: &str = "pkgplan";
const SETTINGS_FILE: &str = "settings.json";

/// On-disk settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Backend key -> enabled
    #[serde(default)]
    pub sources: BTreeMap<String, bool>,
    /// Package key -> selected
    #[serde(default)]
    pub packages: BTreeMap<String, bool>,
    #[serde(default)]
    pub aur_helper: AurHelper,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_state(&EnabledBackends::default(), &Selection::new(), AurHelper::default())
    }
}

impl Settings {
    /// `<config dir>/pkgplan/settings.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
    }

    /// Snapshot of the application's current state, ready to save.
    pub fn from_state(enabled: &EnabledBackends, selection: &Selection, aur_helper: AurHelper) -> Self {
        let sources = Backend::in_priority_order()
            .map(|b| (b.to_string(), enabled.is_enabled(b)))
            .collect();
        let packages = selection.iter().map(|key| (key.clone(), true)).collect();
        Self {
            sources,
            packages,
            aur_helper,
        }
    }

    /// Load settings, falling back to defaults when the file is missing
    /// or cannot be parsed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No settings at {:?}, using defaults", path);
            return Self::default();
        }

        match Self::load_from_file(path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Could not load settings from {:?}, using defaults: {:#}", path, e);
                Self::default()
            }
        }
    }

    /// Load settings from a JSON file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {:?}", path.as_ref()))?;

        let settings: Self =
            serde_json::from_str(&content).context("Failed to parse settings JSON")?;

        Ok(settings)
    }

    /// Save settings as pretty JSON, creating parent directories.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, json).with_context(|| format!("Failed to write settings to {:?}", path))?;

        tracing::debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Backend flags, with defaults for absent keys. Unknown keys are
    /// ignored.
    pub fn enabled_backends(&self) -> EnabledBackends {
        let mut enabled = EnabledBackends::default();
        for (key, on) in &self.sources {
            match Backend::from_str(key) {
                Ok(backend) => enabled.set(backend, *on),
                Err(_) => tracing::warn!("Ignoring unknown source '{}' in settings", key),
            }
        }
        enabled
    }

    /// Keys marked `true`.
    pub fn selection(&self) -> Selection {
        self.packages
            .iter()
            .filter(|(_, selected)| **selected)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn set_backend(&mut self, backend: Backend, enabled: bool) {
        self.sources.insert(backend.to_string(), enabled);
    }

    pub fn set_selected(&mut self, key: impl Into<String>, selected: bool) {
        self.packages.insert(key.into(), selected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.enabled_backends(), EnabledBackends::default());
        assert!(settings.selection().is_empty());
        assert_eq!(settings.aur_helper, AurHelper::Paru);
    }

    #[test]
    fn test_absent_keys_take_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "sources": { "snap": true } }"#).unwrap();
        let enabled = settings.enabled_backends();
        assert!(enabled.is_enabled(Backend::Flatpak));
        assert!(enabled.is_enabled(Backend::Snap));
        assert!(enabled.is_enabled(Backend::Aur));
        assert!(!enabled.is_enabled(Backend::Nix));
    }

    #[test]
    fn test_unknown_source_is_ignored() {
        let settings: Settings =
            serde_json::from_str(r#"{ "sources": { "apt": true, "aur": false } }"#).unwrap();
        let enabled = settings.enabled_backends();
        assert!(!enabled.is_enabled(Backend::Aur));
        assert_eq!(enabled.enabled().count(), 1);
    }

    #[test]
    fn test_selection_only_includes_true() {
        let settings: Settings = serde_json::from_str(
            r#"{ "packages": { "brave": true, "gimp": false, "zoom": true } }"#,
        )
        .unwrap();
        let selection: Vec<String> = settings.selection().into_iter().collect();
        assert_eq!(selection, vec!["brave".to_string(), "zoom".to_string()]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.set_backend(Backend::Nix, true);
        settings.set_selected("krita", true);
        settings.aur_helper = AurHelper::Yay;
        settings.save_to_file(&path).unwrap();

        let loaded = Settings::load_from_file(&path).unwrap();
        assert_eq!(loaded, settings);
        assert!(loaded.enabled_backends().is_enabled(Backend::Nix));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_or_default(dir.path().join("absent.json"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_corrupt_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(Settings::load_from_file(&path).is_err());
        assert_eq!(Settings::load_or_default(&path), Settings::default());
    }
}
