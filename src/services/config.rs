//! Startup configuration, resolved once from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const APP_DIR_NAME: &str = "DesktopClock";
pub const DEFAULT_RELEASES_URL: &str =
    "https://api.github.com/repos/desktop-clock/desktop-clock/releases/latest";

const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 30 * 60;
const MIN_UPDATE_INTERVAL_SECS: u64 = 60;
const MAX_UPDATE_INTERVAL_SECS: u64 = 30 * 60;

const ENV_UPDATE_INTERVAL: &str = "DESKTOP_CLOCK_UPDATE_INTERVAL_SECS";
const ENV_RELEASES_URL: &str = "DESKTOP_CLOCK_RELEASES_URL";
const ENV_DATA_DIR: &str = "DESKTOP_CLOCK_DATA_DIR";
const ENV_DISABLE_UPDATES: &str = "DESKTOP_CLOCK_DISABLE_UPDATES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Where settings.json, version.json and logs/ live
    pub data_dir: PathBuf,
    pub update_interval: Duration,
    pub releases_url: String,
    pub updates_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup(ENV_DATA_DIR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let update_interval = Duration::from_secs(
            lookup(ENV_UPDATE_INTERVAL)
                .and_then(|raw| match raw.trim().parse::<u64>() {
                    Ok(secs) => Some(secs),
                    Err(_) => {
                        // Logging isn't up yet at this point.
                        eprintln!("ignoring {ENV_UPDATE_INTERVAL}={raw:?}: not a number of seconds");
                        None
                    }
                })
                .unwrap_or(DEFAULT_UPDATE_INTERVAL_SECS)
                .clamp(MIN_UPDATE_INTERVAL_SECS, MAX_UPDATE_INTERVAL_SECS),
        );

        let releases_url = lookup(ENV_RELEASES_URL)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_RELEASES_URL.to_string());

        let updates_enabled = !lookup(ENV_DISABLE_UPDATES)
            .map(|v| v.trim().to_ascii_lowercase())
            .is_some_and(|v| v == "1" || v == "true" || v == "yes");

        Self {
            data_dir,
            update_interval,
            releases_url,
            updates_enabled,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or(PathBuf::from("."))
        .join(APP_DIR_NAME)
}
