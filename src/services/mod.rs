pub mod clock;
pub mod config;
pub mod coordinator;
pub mod json_file;
pub mod logging;
pub mod platform;
pub mod prompt;
pub mod settings;
pub mod update;
pub mod version_ledger;
