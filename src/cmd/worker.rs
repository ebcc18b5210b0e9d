use crate::work::{WorkEvent, WorkQueue};
use anyhow::{Result, anyhow};
use std::thread;
use std::time::Duration;

pub fn run(args: &[String]) -> Result<()> {
    let watch = match args.first().map(|s| s.as_str()) {
        None => false,
        Some("-w" | "--watch") => true,
        Some(other) => {
            return Err(anyhow!(
                "unknown option '{}'\nUsage: drivebackup worker [--watch]",
                other
            ));
        }
    };

    let config = super::cli_config()?;
    let drive = super::cli_drive(&config)?;
    let queue = WorkQueue::open(&config)?;
    let poll = Duration::from_secs(config.worker.poll_interval_secs.max(1));

    loop {
        let events = queue.run_pending(drive.as_ref())?;
        for event in &events {
            print_event(event);
        }

        match queue.next_due_in()? {
            None if !watch => {
                if events.is_empty() {
                    println!("No deferred uploads");
                }
                return Ok(());
            }
            Some(secs) if !watch => {
                println!("Next retry due in {}s", secs);
                return Ok(());
            }
            Some(secs) => thread::sleep(Duration::from_secs(secs.max(1)).min(poll)),
            None => thread::sleep(poll),
        }
    }
}

fn print_event(event: &WorkEvent) {
    match event {
        WorkEvent::Started { .. } => {}
        WorkEvent::Succeeded { id, name, file_id } => {
            println!("✓ task {} {} (id={})", id, name, file_id);
        }
        WorkEvent::Retrying {
            id,
            name,
            error,
            delay_secs,
        } => println!("↻ task {} {} retry in {}s: {}", id, name, delay_secs, error),
        WorkEvent::Failed { id, name, error } => {
            println!("✗ task {} {}: {}", id, name, error);
        }
    }
}
