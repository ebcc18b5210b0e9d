pub mod count;
pub mod help;
pub mod login;
pub mod logout;
pub mod queue;
pub mod upload;
pub mod worker;

use crate::config::AppConfig;
use crate::drive::Drive;
use crate::session::FileSession;
use crate::work::WorkQueue;
use anyhow::{Result, anyhow};
use std::sync::Arc;

pub fn cli_config() -> Result<AppConfig> {
    AppConfig::load()
}

/// A Drive client with a stored session. Commands never start an
/// interactive sign-in on their own.
pub fn cli_drive(config: &AppConfig) -> Result<Arc<Drive>> {
    let drive = Drive::new(config)?;
    if !drive.auth().has_session() {
        return Err(anyhow!(
            "not signed in. Run `drivebackup login` (or `drivebackup` for the TUI) first"
        ));
    }
    Ok(Arc::new(drive))
}

/// An initialized session. Background uploads stay queued for
/// `drivebackup worker`. The queue file is only read when a task is
/// enqueued, so `count` and foreground uploads never depend on it.
pub fn cli_session(config: &AppConfig) -> Result<(FileSession, WorkQueue)> {
    let drive = cli_drive(config)?;
    let queue = WorkQueue::open(config)?.drain_manually();
    let mut session = FileSession::new(Arc::new(queue.clone()));
    session.initialize(drive, &config.app_folder)?;
    Ok((session, queue))
}

pub fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}
