use anyhow::{anyhow, Context};
use once_cell::sync::Lazy;
use semver::Version;
use serde::Deserialize;
use std::env;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use super::coordinator::{UpdateEvent, UpdateFailure, UpdateMessage, Updater};

const USER_AGENT: &str = concat!("DesktopClock-Updater/", env!("CARGO_PKG_VERSION"));

static AGENT: Lazy<ureq::Agent> = Lazy::new(|| {
    ureq::AgentBuilder::new()
        .user_agent(USER_AGENT)
        .timeout_connect(Duration::from_secs(15))
        .timeout_read(Duration::from_secs(60))
        .build()
});

#[derive(Deserialize, Debug, Clone)]
pub struct GitHubRelease {
    pub tag_name: String,
    pub assets: Vec<GitHubAsset>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Debug)]
struct PendingRelease {
    version: Version,
    asset: GitHubAsset,
}

struct Shared {
    releases_url: String,
    current: Version,
    pending: Mutex<Option<PendingRelease>>,
    staged: Mutex<Option<PathBuf>>,
}

/// Updater backed by a GitHub "latest release" endpoint. Network work runs on
/// short-lived threads; outcomes are posted to the shell's update channel.
pub struct GithubUpdater {
    shared: Arc<Shared>,
    events: Sender<UpdateMessage>,
}

impl GithubUpdater {
    pub fn new(releases_url: String, current: Version, events: Sender<UpdateMessage>) -> Self {
        Self {
            shared: Arc::new(Shared {
                releases_url,
                current,
                pending: Mutex::new(None),
                staged: Mutex::new(None),
            }),
            events,
        }
    }

    fn spawn(
        &self,
        name: &str,
        failure: fn(String) -> UpdateFailure,
        job: impl FnOnce(&Shared, &Sender<UpdateMessage>) -> UpdateEvent + Send + 'static,
    ) {
        let shared = self.shared.clone();
        let events = self.events.clone();
        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            let event = job(&shared, &events);
            let _ = events.send(UpdateMessage::Updater(event));
        });
        if let Err(err) = spawned {
            let failure = failure(format!("failed to spawn {name}: {err}"));
            let _ = self.events.send(UpdateMessage::Updater(UpdateEvent::Failed(failure)));
        }
    }
}

impl Updater for GithubUpdater {
    fn check_for_updates(&self) {
        self.spawn("update-check", UpdateFailure::Check, |shared, _| match shared.check() {
            Ok(Some(version)) => UpdateEvent::Available(version),
            Ok(None) => UpdateEvent::NoUpdate,
            Err(err) => UpdateEvent::Failed(UpdateFailure::Check(format!("{err:#}"))),
        });
    }

    fn download_update(&self) {
        self.spawn("update-download", UpdateFailure::Download, |shared, events| match shared.download(events) {
            Ok(()) => UpdateEvent::Downloaded,
            Err(err) => UpdateEvent::Failed(UpdateFailure::Download(format!("{err:#}"))),
        });
    }

    fn quit_and_install(&self) {
        let event = match self.shared.install() {
            Ok(()) => UpdateEvent::Relaunched,
            Err(err) => UpdateEvent::Failed(UpdateFailure::Install(format!("{err:#}"))),
        };
        let _ = self.events.send(UpdateMessage::Updater(event));
    }
}

impl Shared {
    fn check(&self) -> anyhow::Result<Option<Version>> {
        let release = get_latest_release(&self.releases_url)?;
        let Some(version) = newer_version(&release.tag_name, &self.current)? else {
            return Ok(None);
        };
        let asset = asset_for_platform(&release.assets, env::consts::OS, env::consts::ARCH)
            .ok_or_else(|| anyhow!("release {} has no asset for {}", release.tag_name, env::consts::OS))?
            .clone();
        tracing::debug!(%version, asset = %asset.name, "selected release asset");
        *lock(&self.pending) = Some(PendingRelease { version: version.clone(), asset });
        Ok(Some(version))
    }

    fn download(&self, events: &Sender<UpdateMessage>) -> anyhow::Result<()> {
        let (version, url) = {
            let pending = lock(&self.pending);
            let release = pending
                .as_ref()
                .ok_or_else(|| anyhow!("no release selected for download"))?;
            (release.version.clone(), release.asset.browser_download_url.clone())
        };
        let target = staging_path(&current_exe()?);
        tracing::info!(%version, target = %target.display(), "downloading update");

        let resp = AGENT.get(&url).call().with_context(|| format!("GET {url}"))?;
        let total = resp
            .header("Content-Length")
            .and_then(|v| v.parse::<u64>().ok());
        stage_download(resp.into_reader(), total, &target, events)?;

        *lock(&self.staged) = Some(target);
        Ok(())
    }

    fn install(&self) -> anyhow::Result<()> {
        let staged = lock(&self.staged)
            .clone()
            .ok_or_else(|| anyhow!("no downloaded update to install"))?;
        let exe = current_exe()?;
        swap_and_relaunch(&exe, &staged)?;
        tracing::info!(exe = %exe.display(), "update installed, restarting");
        Ok(())
    }
}

/// Streams `reader` into `target`, posting percent progress when the size is
/// known. On any error the partial file is removed.
fn stage_download(
    reader: impl Read,
    total: Option<u64>,
    target: &Path,
    events: &Sender<UpdateMessage>,
) -> anyhow::Result<()> {
    let result = write_staged(reader, total, target, events);
    if result.is_err() {
        let _ = fs::remove_file(target);
    }
    result
}

fn write_staged(
    mut reader: impl Read,
    total: Option<u64>,
    target: &Path,
    events: &Sender<UpdateMessage>,
) -> anyhow::Result<()> {
    let file = File::create(target)
        .with_context(|| format!("failed to create {}", target.display()))?;
    let mut writer = BufWriter::new(file);

    let mut buf = vec![0u8; 64 * 1024];
    let mut written: u64 = 0;
    let mut last_percent: Option<u8> = None;
    loop {
        let n = reader.read(&mut buf).context("download interrupted")?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).context("failed to write update")?;
        written += n as u64;
        if let Some(percent) = total.map(|t| percent_of(written, t)) {
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                let _ = events.send(UpdateMessage::Updater(UpdateEvent::Progress(percent)));
            }
        }
    }
    writer.flush().context("failed to flush update")?;
    drop(writer);

    if let Some(expected) = total {
        if written != expected {
            return Err(anyhow!("download truncated: {written} of {expected} bytes"));
        }
    }
    if last_percent != Some(100) {
        let _ = events.send(UpdateMessage::Updater(UpdateEvent::Progress(100)));
    }
    make_executable(target)
}

/// Moves `staged` over `exe`, keeping the old binary as `<exe>.bak`, and
/// starts the new one. Any failure puts both files back where they were.
fn swap_and_relaunch(exe: &Path, staged: &Path) -> anyhow::Result<()> {
    let backup = backup_path(exe);
    if backup.exists() {
        fs::remove_file(&backup)
            .with_context(|| format!("failed to remove old {}", backup.display()))?;
    }
    // A running executable can be renamed on every desktop OS, just not overwritten in place.
    fs::rename(exe, &backup)
        .with_context(|| format!("failed to move {} aside", exe.display()))?;
    if let Err(err) = fs::rename(staged, exe) {
        restore_file(&backup, exe);
        return Err(err).with_context(|| format!("failed to move {} into place", staged.display()));
    }

    if let Err(err) = Command::new(exe).spawn() {
        restore_file(exe, staged);
        restore_file(&backup, exe);
        return Err(err).with_context(|| format!("failed to relaunch {}", exe.display()));
    }
    Ok(())
}

fn restore_file(from: &Path, to: &Path) {
    if let Err(err) = fs::rename(from, to) {
        tracing::error!(from = %from.display(), to = %to.display(), error = %err, "failed to roll back update");
    }
}

fn get_latest_release(url: &str) -> anyhow::Result<GitHubRelease> {
    let resp = AGENT
        .get(url)
        .set("Accept", "application/vnd.github+json")
        .call()
        .with_context(|| format!("GET {url}"))?;
    let release: GitHubRelease = resp.into_json().context("malformed release JSON")?;
    Ok(release)
}

/// Parses a release tag (`v1.2.3` or `1.2.3`) and returns it when it is newer
/// than `current`.
pub fn newer_version(tag: &str, current: &Version) -> anyhow::Result<Option<Version>> {
    let raw = tag.trim().trim_start_matches(['v', 'V']);
    let version =
        Version::parse(raw).with_context(|| format!("release tag {tag:?} is not a version"))?;
    Ok((version > *current).then_some(version))
}

/// Windows ships a bare `.exe`; other platforms tag the asset name with OS and
/// architecture (accepting the usual aliases).
pub fn asset_for_platform<'a>(assets: &'a [GitHubAsset], os: &str, arch: &str) -> Option<&'a GitHubAsset> {
    assets.iter().find(|asset| asset_matches(&asset.name, os, arch))
}

/// Checksums, signatures, archives and installers; only a bare binary can be swapped in.
const NOT_EXECUTABLE: &[&str] = &[
    ".sha256", ".sig", ".asc", ".txt", ".tar.gz", ".tgz", ".tar.xz", ".tar.bz2", ".zip", ".7z",
    ".dmg", ".pkg", ".deb", ".rpm", ".msi",
];

fn asset_matches(name: &str, os: &str, arch: &str) -> bool {
    let name = name.to_ascii_lowercase();
    if NOT_EXECUTABLE.iter().any(|ext| name.ends_with(ext)) {
        return false;
    }
    if os == "windows" {
        return name.ends_with(".exe");
    }
    let os_tags: &[&str] = match os {
        "macos" => &["macos", "darwin", "apple"],
        other => &[other],
    };
    let arch_tags: &[&str] = match arch {
        "x86_64" => &["x86_64", "amd64", "x64"],
        "aarch64" => &["aarch64", "arm64"],
        other => &[other],
    };
    os_tags.iter().any(|t| name.contains(t)) && arch_tags.iter().any(|t| name.contains(t))
}

fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.saturating_mul(100) / total).min(100) as u8
}

fn current_exe() -> anyhow::Result<PathBuf> {
    env::current_exe().context("cannot locate running executable")
}

fn staging_path(exe: &Path) -> PathBuf {
    exe.with_extension("update")
}

fn backup_path(exe: &Path) -> PathBuf {
    exe.with_extension("bak")
}

#[cfg(unix)]
fn make_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to mark {} executable", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> GitHubAsset {
        GitHubAsset {
            name: name.to_string(),
            browser_download_url: format!("https://example.test/{name}"),
        }
    }

    #[test]
    fn newer_tag_is_detected() {
        let current = Version::new(1, 0, 0);
        assert_eq!(newer_version("v1.1.0", &current).unwrap(), Some(Version::new(1, 1, 0)));
        assert_eq!(newer_version("1.0.1", &current).unwrap(), Some(Version::new(1, 0, 1)));
    }

    #[test]
    fn same_or_older_tag_is_not_an_update() {
        let current = Version::new(1, 2, 0);
        assert_eq!(newer_version("v1.2.0", &current).unwrap(), None);
        assert_eq!(newer_version("v1.10.0", &Version::new(1, 10, 0)).unwrap(), None);
        assert_eq!(newer_version("1.1.9", &current).unwrap(), None);
    }

    #[test]
    fn ordering_is_numeric_not_lexical() {
        let current = Version::new(1, 9, 0);
        assert_eq!(newer_version("v1.10.0", &current).unwrap(), Some(Version::new(1, 10, 0)));
    }

    #[test]
    fn prerelease_sorts_before_release() {
        let current = Version::new(2, 0, 0);
        assert_eq!(newer_version("v2.0.0-rc.1", &current).unwrap(), None);
    }

    #[test]
    fn garbage_tag_is_an_error() {
        assert!(newer_version("latest", &Version::new(1, 0, 0)).is_err());
    }

    #[test]
    fn windows_picks_the_exe() {
        let assets = [asset("desktop-clock.exe.sha256"), asset("desktop-clock-linux-x86_64"), asset("desktop-clock.exe")];
        let picked = asset_for_platform(&assets, "windows", "x86_64").unwrap();
        assert_eq!(picked.name, "desktop-clock.exe");
    }

    #[test]
    fn unix_matches_os_and_arch_aliases() {
        let assets = [
            asset("desktop-clock.exe"),
            asset("desktop-clock-linux-arm64"),
            asset("desktop-clock-linux-amd64"),
            asset("desktop-clock-darwin-arm64"),
        ];
        assert_eq!(
            asset_for_platform(&assets, "linux", "x86_64").unwrap().name,
            "desktop-clock-linux-amd64"
        );
        assert_eq!(
            asset_for_platform(&assets, "macos", "aarch64").unwrap().name,
            "desktop-clock-darwin-arm64"
        );
        assert!(asset_for_platform(&assets, "freebsd", "x86_64").is_none());
    }

    #[test]
    fn archives_and_installers_are_skipped() {
        let assets = [
            asset("desktop-clock-linux-x86_64.tar.gz"),
            asset("desktop-clock-macos-aarch64.dmg"),
            asset("desktop-clock-linux-amd64.deb"),
            asset("desktop-clock-x86_64.msi"),
        ];
        assert!(asset_for_platform(&assets, "linux", "x86_64").is_none());
        assert!(asset_for_platform(&assets, "macos", "aarch64").is_none());
        assert!(asset_for_platform(&assets, "windows", "x86_64").is_none());

        let with_binary = [asset("desktop-clock-linux-x86_64.zip"), asset("desktop-clock-linux-x86_64")];
        assert_eq!(
            asset_for_platform(&with_binary, "linux", "x86_64").unwrap().name,
            "desktop-clock-linux-x86_64"
        );
    }

    /// Yields one chunk, then fails like a dropped connection.
    struct BrokenStream {
        sent: bool,
    }

    impl Read for BrokenStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.sent {
                return Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"ELF!");
            Ok(4)
        }
    }

    #[test]
    fn interrupted_download_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("desktop-clock.update");
        let (tx, _rx) = std::sync::mpsc::channel();

        let err = stage_download(BrokenStream { sent: false }, Some(100), &target, &tx).unwrap_err();
        assert!(err.to_string().contains("download interrupted"));
        assert!(!target.exists());
    }

    #[test]
    fn truncated_download_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("desktop-clock.update");
        let (tx, _rx) = std::sync::mpsc::channel();

        let err = stage_download(&b"short"[..], Some(10), &target, &tx).unwrap_err();
        assert!(err.to_string().contains("truncated"));
        assert!(!target.exists());
    }

    #[test]
    fn complete_download_ends_at_full_progress() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("desktop-clock.update");
        let (tx, rx) = std::sync::mpsc::channel();

        stage_download(&b"payload"[..], None, &target, &tx).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"payload");
        let last = rx.try_iter().last();
        assert_eq!(last, Some(UpdateMessage::Updater(UpdateEvent::Progress(100))));
    }

    #[test]
    fn missing_staged_file_keeps_current_binary() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("desktop-clock");
        fs::write(&exe, b"current").unwrap();

        let err = swap_and_relaunch(&exe, &dir.path().join("desktop-clock.update")).unwrap_err();
        assert!(err.to_string().contains("into place"));
        assert_eq!(fs::read(&exe).unwrap(), b"current");
        assert!(!backup_path(&exe).exists());
    }

    #[cfg(unix)]
    #[test]
    fn failed_relaunch_restores_previous_binary() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("desktop-clock");
        let staged = staging_path(&exe);
        fs::write(&exe, b"current").unwrap();
        // No execute bit, so the relaunch cannot start it.
        fs::write(&staged, b"not a program").unwrap();
        fs::set_permissions(&staged, fs::Permissions::from_mode(0o644)).unwrap();

        let err = swap_and_relaunch(&exe, &staged).unwrap_err();
        assert!(err.to_string().contains("failed to relaunch"));
        assert_eq!(fs::read(&exe).unwrap(), b"current");
        assert_eq!(fs::read(&staged).unwrap(), b"not a program");
        assert!(!backup_path(&exe).exists());
    }

    #[test]
    fn release_json_parses() {
        let json = r#"{
            "tag_name": "v0.2.0",
            "name": "0.2.0",
            "assets": [
                { "name": "desktop-clock.exe", "browser_download_url": "https://example.test/a.exe", "size": 10 }
            ]
        }"#;
        let release: GitHubRelease = serde_json::from_str(json).unwrap();
        assert_eq!(release.tag_name, "v0.2.0");
        assert_eq!(release.assets[0].browser_download_url, "https://example.test/a.exe");
    }

    #[test]
    fn percent_is_bounded() {
        assert_eq!(percent_of(0, 200), 0);
        assert_eq!(percent_of(50, 200), 25);
        assert_eq!(percent_of(300, 200), 100);
        assert_eq!(percent_of(0, 0), 100);
    }

    #[test]
    fn staged_and_backup_files_sit_next_to_the_exe() {
        let exe = Path::new("/opt/clock/desktop-clock");
        assert_eq!(staging_path(exe), Path::new("/opt/clock/desktop-clock.update"));
        assert_eq!(backup_path(exe), Path::new("/opt/clock/desktop-clock.bak"));
    }

    #[test]
    fn download_without_check_fails() {
        let (tx, _rx) = std::sync::mpsc::channel();
        let updater = GithubUpdater::new("http://127.0.0.1:9/latest".into(), Version::new(0, 1, 0), tx);
        let err = updater.shared.download(&updater.events).unwrap_err();
        assert!(err.to_string().contains("no release selected"));
    }

    #[test]
    fn install_without_download_reports_failure() {
        let (tx, rx) = std::sync::mpsc::channel();
        let updater = GithubUpdater::new("http://127.0.0.1:9/latest".into(), Version::new(0, 1, 0), tx);
        updater.quit_and_install();
        match rx.try_recv().unwrap() {
            UpdateMessage::Updater(UpdateEvent::Failed(UpdateFailure::Install(reason))) => {
                assert!(reason.contains("no downloaded update"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
