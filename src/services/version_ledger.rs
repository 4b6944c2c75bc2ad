use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::json_file;

const VERSION_FILE: &str = "version.json";

#[derive(Debug, Serialize, Deserialize)]
struct VersionRecord {
    version: String,
}

/// An upgrade detected at startup: the last recorded run was `from`, this one is `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeNotice {
    pub from: String,
    pub to: String,
}

/// Remembers which application version ran last, in `version.json`.
pub struct VersionLedger {
    file_path: PathBuf,
}

impl VersionLedger {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            file_path: data_dir.join(VERSION_FILE),
        }
    }

    pub fn get_last(&self) -> Option<String> {
        match json_file::read::<VersionRecord>(&self.file_path) {
            Ok(record) => record.map(|r| r.version),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "version ledger unreadable");
                None
            }
        }
    }

    pub fn record_current(&self, version: &str) {
        let record = VersionRecord {
            version: version.to_string(),
        };
        if let Err(err) = json_file::write(&self.file_path, &record) {
            tracing::warn!(error = %format!("{err:#}"), "failed to record running version");
        }
    }

    /// Compares the previous run against `current`, then records `current`.
    /// Call once per start; a first run (no record) never produces a notice.
    pub fn take_upgrade_notice(&self, current: &str) -> Option<UpgradeNotice> {
        let notice = self
            .get_last()
            .filter(|last| last != current)
            .map(|from| UpgradeNotice {
                from,
                to: current.to_string(),
            });
        self.record_current(current);
        notice
    }
}
