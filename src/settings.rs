//! Persisted key bindings
//!
//! The settings file is a single JSON object holding the four symbolic key
//! names and the "back to sword" flag. A missing or malformed file is never
//! an error for the caller: it simply means "start with nothing bound".

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::hotkey::keys::NONE_NAME;
use crate::hotkey::KeyRole;

/// Persisted form of the macro configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Primary (sword) key
    #[serde(rename = "swordKey")]
    pub primary_key: Option<String>,

    /// Secondary (rod) key
    #[serde(rename = "rodKey")]
    pub secondary_key: Option<String>,

    /// Trigger (macro) key
    #[serde(rename = "macKey")]
    pub trigger_key: Option<String>,

    /// Toggle key
    #[serde(rename = "toggleKey")]
    pub toggle_key: Option<String>,

    /// Tap the primary key again when the trigger is released
    #[serde(rename = "backToSwordSelected")]
    pub return_to_primary: bool,
}

impl Settings {
    /// The name bound to `role`, if any
    pub fn key(&self, role: KeyRole) -> Option<&str> {
        match role {
            KeyRole::Primary => self.primary_key.as_deref(),
            KeyRole::Secondary => self.secondary_key.as_deref(),
            KeyRole::Trigger => self.trigger_key.as_deref(),
            KeyRole::Toggle => self.toggle_key.as_deref(),
        }
    }

    /// Copy with `"None"` and blank selections replaced by `null`
    pub fn normalized(&self) -> Self {
        fn clean(name: &Option<String>) -> Option<String> {
            name.as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty() && *name != NONE_NAME)
                .map(str::to_owned)
        }

        Self {
            primary_key: clean(&self.primary_key),
            secondary_key: clean(&self.secondary_key),
            trigger_key: clean(&self.trigger_key),
            toggle_key: clean(&self.toggle_key),
            return_to_primary: self.return_to_primary,
        }
    }
}

/// Why a settings file could not be used
#[derive(Debug, thiserror::Error)]
pub enum SettingsLoadError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Why settings could not be written
#[derive(Debug, thiserror::Error)]
pub enum SettingsSaveError {
    #[error("failed to create settings directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write settings file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Reads and writes the settings file at a fixed path
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; `None` when the file is missing or unreadable
    pub fn load(&self) -> Option<Settings> {
        match self.try_load() {
            Ok(settings) => {
                info!(path = ?self.path, "settings loaded");
                Some(settings)
            }
            Err(SettingsLoadError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "no settings file, using defaults");
                None
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "ignoring unusable settings file");
                None
            }
        }
    }

    fn try_load(&self) -> Result<Settings, SettingsLoadError> {
        let contents = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write `settings` in normalized form, creating the directory if needed
    pub fn save(&self, settings: &Settings) -> Result<(), SettingsSaveError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsSaveError::CreateDir {
                path: parent.to_owned(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(&settings.normalized())?;
        fs::write(&self.path, json).map_err(|source| SettingsSaveError::Write {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = ?self.path, "settings saved");
        Ok(())
    }
}
