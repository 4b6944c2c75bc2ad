//! Update lifecycle: check → prompt → download → install.
//!
//! The coordinator is driven entirely from the UI event loop. Collaborators do
//! their slow work elsewhere and report back as [`UpdateMessage`]s, which the
//! shell drains and feeds to [`UpdateCoordinator::handle`]. Because nothing else
//! touches the state, the `phase` check in [`UpdateCoordinator::request_check`]
//! is enough to keep a single check in flight.

use semver::Version;

/// Network/install side of the updater. Every call returns immediately; results
/// come back later as [`UpdateEvent`]s.
pub trait Updater {
    fn check_for_updates(&self);
    fn download_update(&self);
    /// Replaces the running binary and starts the new one, then reports
    /// [`UpdateEvent::Relaunched`] so the shell can exit, or
    /// [`UpdateFailure::Install`] with the old binary restored.
    fn quit_and_install(&self);
}

/// Asks the user whether to install `version`; answers arrive as
/// [`UpdateMessage::Prompt`].
pub trait UpdatePrompt {
    fn ask_to_install(&self, version: &Version);
}

/// Where download progress is shown.
pub trait UpdateDisplay {
    fn progress(&self, percent: u8);
    fn download_finished(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Checking,
    AvailableUnconfirmed,
    AwaitingDownload,
    Downloaded,
    Installing,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateFailure {
    #[error("update check failed: {0}")]
    Check(String),
    #[error("update download failed: {0}")]
    Download(String),
    #[error("update install failed: {0}")]
    Install(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    NoUpdate,
    Available(Version),
    Progress(u8),
    Downloaded,
    /// The new version is running; this process should exit.
    Relaunched,
    Failed(UpdateFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Install,
    Later,
    /// Dialog closed without choosing; treated like `Later`.
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateMessage {
    Updater(UpdateEvent),
    Prompt(PromptAnswer),
}

#[derive(Debug)]
struct Lifecycle {
    phase: Phase,
    /// `Some(true)` = install once downloaded
    user_choice: Option<bool>,
    prompt_shown: bool,
    /// Version the current prompt cycle belongs to
    offered: Option<Version>,
}

pub struct UpdateCoordinator<U, P, D> {
    updater: U,
    prompt: P,
    display: D,
    state: Lifecycle,
}

impl<U: Updater, P: UpdatePrompt, D: UpdateDisplay> UpdateCoordinator<U, P, D> {
    pub fn new(updater: U, prompt: P, display: D) -> Self {
        Self {
            updater,
            prompt,
            display,
            state: Lifecycle {
                phase: Phase::Idle,
                user_choice: None,
                prompt_shown: false,
                offered: None,
            },
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// A downloaded update the user deferred, installable from the tray.
    pub fn has_deferred_update(&self) -> bool {
        self.state.phase == Phase::Downloaded && self.state.user_choice != Some(true)
    }

    /// Starts a check unless one is running or an update is already in hand.
    /// Returns whether the updater was actually asked.
    pub fn request_check(&mut self) -> bool {
        if self.state.phase != Phase::Idle {
            tracing::debug!(phase = ?self.state.phase, "update check skipped");
            return false;
        }
        self.state.phase = Phase::Checking;
        tracing::info!("checking for updates");
        self.updater.check_for_updates();
        true
    }

    pub fn tick(&mut self) {
        self.request_check();
    }

    pub fn handle(&mut self, message: UpdateMessage) {
        match message {
            UpdateMessage::Updater(event) => self.dispatch(event),
            UpdateMessage::Prompt(answer) => self.answer_prompt(answer),
        }
    }

    pub fn dispatch(&mut self, event: UpdateEvent) {
        match event {
            UpdateEvent::NoUpdate => {
                tracing::info!("no update available");
                if self.state.phase == Phase::Checking {
                    self.state.phase = Phase::Idle;
                }
            }
            UpdateEvent::Available(version) => self.on_update_available(version),
            UpdateEvent::Progress(percent) => self.display.progress(percent.min(100)),
            UpdateEvent::Downloaded => self.on_update_downloaded(),
            UpdateEvent::Relaunched => {
                tracing::info!(phase = ?self.state.phase, "new version launched; shutting down");
            }
            UpdateEvent::Failed(failure) => {
                tracing::warn!(phase = ?self.state.phase, error = %failure, "update step failed; retrying on next check");
                self.state.phase = Phase::Idle;
            }
        }
    }

    fn on_update_available(&mut self, version: Version) {
        if matches!(
            self.state.phase,
            Phase::AwaitingDownload | Phase::Downloaded | Phase::Installing
        ) {
            tracing::debug!(%version, phase = ?self.state.phase, "stale availability notice ignored");
            return;
        }

        if self.state.offered.as_ref() != Some(&version) {
            self.state.offered = Some(version.clone());
            self.state.prompt_shown = false;
            self.state.user_choice = None;
        }
        self.state.phase = Phase::AvailableUnconfirmed;

        if self.state.prompt_shown {
            // Same version again after a failed download: reuse the earlier answer.
            if let Some(choice) = self.state.user_choice {
                tracing::info!(%version, install = choice, "resuming update download");
                self.start_download();
            }
            return;
        }

        tracing::info!(%version, "update available");
        self.state.prompt_shown = true;
        self.prompt.ask_to_install(&version);
    }

    pub fn answer_prompt(&mut self, answer: PromptAnswer) {
        if !self.state.prompt_shown || self.state.user_choice.is_some() {
            tracing::debug!(?answer, "unexpected prompt answer ignored");
            return;
        }
        let install = answer == PromptAnswer::Install;
        self.state.user_choice = Some(install);
        tracing::info!(?answer, "update prompt answered");

        // The download starts whatever the answer; only the install waits for consent.
        if self.state.phase == Phase::AvailableUnconfirmed {
            self.start_download();
        }
    }

    fn start_download(&mut self) {
        self.state.phase = Phase::AwaitingDownload;
        self.updater.download_update();
    }

    fn on_update_downloaded(&mut self) {
        self.state.phase = Phase::Downloaded;
        self.display.download_finished();
        if self.state.user_choice == Some(true) {
            self.install();
        } else {
            tracing::info!("update downloaded; install deferred");
        }
    }

    /// Installs a deferred download on explicit request. No-op unless an
    /// update is sitting at `Downloaded`.
    pub fn install_pending(&mut self) -> bool {
        if self.state.phase != Phase::Downloaded {
            return false;
        }
        self.state.user_choice = Some(true);
        self.install();
        true
    }

    fn install(&mut self) {
        self.state.phase = Phase::Installing;
        tracing::info!("installing update and restarting");
        self.updater.quit_and_install();
    }
}
