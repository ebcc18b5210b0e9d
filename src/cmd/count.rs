use anyhow::{Result, anyhow};

pub fn run(args: &[String]) -> Result<()> {
    if let Some(extra) = args.first() {
        return Err(anyhow!("unexpected argument '{}'\nUsage: drivebackup count", extra));
    }
    let config = super::cli_config()?;
    let (session, _) = super::cli_session(&config)?;
    println!("Number of files: {}", session.count_files()?);
    Ok(())
}
