use rfd::{MessageButtons, MessageDialog, MessageDialogResult, MessageLevel};
use semver::Version;
use std::sync::mpsc::Sender;
use std::thread;

use super::coordinator::{PromptAnswer, UpdateMessage, UpdatePrompt};

/// Native yes/no dialog shown off the UI thread; the answer is posted back on
/// the update channel so the event loop never blocks on the user.
pub struct DialogPrompt {
    answers: Sender<UpdateMessage>,
}

impl DialogPrompt {
    pub fn new(answers: Sender<UpdateMessage>) -> Self {
        Self { answers }
    }
}

impl UpdatePrompt for DialogPrompt {
    fn ask_to_install(&self, version: &Version) {
        let answers = self.answers.clone();
        let description = format!(
            "Desktop Clock {version} is available.\n\nInstall it now? The clock restarts once the download finishes."
        );
        let spawned = thread::Builder::new()
            .name("update-prompt".into())
            .spawn(move || {
                let result = MessageDialog::new()
                    .set_title("Update Available")
                    .set_description(description)
                    .set_level(MessageLevel::Info)
                    .set_buttons(MessageButtons::YesNo)
                    .show();
                let _ = answers.send(UpdateMessage::Prompt(answer_from(result)));
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "could not show update prompt");
            let _ = self.answers.send(UpdateMessage::Prompt(PromptAnswer::Dismissed));
        }
    }
}

fn answer_from(result: MessageDialogResult) -> PromptAnswer {
    match result {
        MessageDialogResult::Yes | MessageDialogResult::Ok => PromptAnswer::Install,
        MessageDialogResult::No => PromptAnswer::Later,
        _ => PromptAnswer::Dismissed,
    }
}
