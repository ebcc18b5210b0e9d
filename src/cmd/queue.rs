use crate::work::{TaskStatus, WorkQueue};
use anyhow::{Result, anyhow};

pub fn run(args: &[String]) -> Result<()> {
    let prune = match args.first().map(|s| s.as_str()) {
        None => false,
        Some("--prune") => true,
        Some(other) => {
            return Err(anyhow!(
                "unknown option '{}'\nUsage: drivebackup queue [--prune]",
                other
            ));
        }
    };

    let config = super::cli_config()?;
    let queue = WorkQueue::open(&config)?;
    if prune {
        let removed = queue.prune_finished()?;
        println!("Removed {}", super::plural(removed, "finished task"));
    }

    let tasks = queue.tasks()?;
    if tasks.is_empty() {
        println!("No deferred uploads");
        return Ok(());
    }
    println!(
        "\x1b[2m{} ({} pending)\x1b[0m",
        queue.path().display(),
        queue.pending_count()?
    );
    for t in &tasks {
        let (icon, state) = match &t.status {
            TaskStatus::Enqueued => match &t.last_error {
                Some(err) => ("↻", format!("retrying: {}", err)),
                None => ("…", "waiting".to_string()),
            },
            TaskStatus::Running => ("↑", "running".to_string()),
            TaskStatus::Succeeded => ("✓", "done".to_string()),
            TaskStatus::Failed(reason) => ("✗", reason.clone()),
        };
        println!(
            "{} {:>4}  {:>2} tries  {}  {}",
            icon, t.id, t.attempts, t.task.name, state
        );
    }
    Ok(())
}
