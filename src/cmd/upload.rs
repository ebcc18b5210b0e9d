use crate::document::{DocumentRef, LocalFiles};
use crate::session::{UploadMode, UploadReceipt};
use anyhow::{Result, anyhow};
use std::path::PathBuf;

const USAGE: &str = "Usage: drivebackup upload [-b|--background] <file...>";

#[derive(Debug, PartialEq, Eq)]
struct UploadArgs {
    mode: UploadMode,
    files: Vec<PathBuf>,
}

fn parse(args: &[String]) -> Result<UploadArgs> {
    let mut mode = UploadMode::Foreground;
    let mut files = Vec::new();
    for arg in args {
        match arg.as_str() {
            "-b" | "--background" => mode = UploadMode::Background,
            s if s.starts_with('-') && s.len() > 1 => {
                return Err(anyhow!("unknown option '{}'\n{}", s, USAGE));
            }
            s => files.push(PathBuf::from(s)),
        }
    }
    if files.is_empty() {
        return Err(anyhow!("no file specified\n{}", USAGE));
    }
    Ok(UploadArgs { mode, files })
}

pub fn run(args: &[String]) -> Result<()> {
    let UploadArgs { mode, files } = parse(args)?;
    for path in &files {
        if !path.is_file() {
            return Err(anyhow!("'{}' is not a file", path.display()));
        }
    }

    let config = super::cli_config()?;
    let (session, queue) = super::cli_session(&config)?;

    let mut queued = false;
    for path in &files {
        let doc = DocumentRef::from(path.as_path());
        match session.upload_document(&LocalFiles, &doc, mode)? {
            UploadReceipt::Uploaded { name, file_id } => {
                println!("{} - done (id={})", name, file_id);
            }
            UploadReceipt::Enqueued { name, task_id } => {
                println!("{} - queued (task {})", name, task_id);
                queued = true;
            }
        }
    }
    if queued {
        eprintln!(
            "{} waiting; run `drivebackup worker` to upload",
            super::plural(queue.pending_count()?, "task")
        );
    }
    Ok(())
}
