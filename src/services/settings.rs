use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::json_file;

const SETTINGS_FILE: &str = "settings.json";

/// User preferences persisted to `settings.json`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    /// Render the clock as 00-23 hours (default: true)
    #[serde(rename = "use24Hour", default = "default_true")]
    pub use_24_hour: bool,
}

fn default_true() -> bool { true }

impl Default for Preferences {
    fn default() -> Self {
        Self { use_24_hour: true }
    }
}

/// SettingsStore - loads and saves preferences in the app data directory.
/// Reads fail open to defaults; writes are eager and last-write-wins.
pub struct SettingsStore {
    file_path: PathBuf,
}

impl SettingsStore {
    /// Creates the data folder if it doesn't exist yet.
    pub fn open(data_dir: &Path) -> Self {
        if !data_dir.exists() {
            if let Err(err) = fs::create_dir_all(data_dir) {
                tracing::warn!(dir = %data_dir.display(), error = %err, "failed to create data directory");
            }
        }
        Self {
            file_path: data_dir.join(SETTINGS_FILE),
        }
    }

    pub fn get(&self) -> Preferences {
        match json_file::read::<Preferences>(&self.file_path) {
            Ok(Some(prefs)) => prefs,
            Ok(None) => {
                // First run: materialize the defaults so the file exists from now on.
                let prefs = Preferences::default();
                self.set(&prefs);
                prefs
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "settings unreadable, using defaults");
                Preferences::default()
            }
        }
    }

    pub fn set(&self, prefs: &Preferences) {
        match json_file::write(&self.file_path, prefs) {
            Ok(()) => tracing::debug!(use_24_hour = prefs.use_24_hour, "settings saved"),
            Err(err) => tracing::warn!(error = %format!("{err:#}"), "failed to save settings"),
        }
    }
}
