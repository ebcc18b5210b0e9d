use crate::auth::GoogleAuth;
use anyhow::{Result, anyhow};

pub fn run(args: &[String]) -> Result<()> {
    if let Some(extra) = args.first() {
        return Err(anyhow!("unexpected argument '{}'\nUsage: drivebackup login", extra));
    }
    let config = super::cli_config()?;
    let auth = GoogleAuth::new(&config)?;

    let device = auth.request_device_code().inspect_err(|e| {
        tracing::error!(error = %format!("{e:#}"), "unable to sign in");
    })?;
    eprintln!("Open {} and enter the code:", device.verification_url);
    println!("{}", device.user_code);
    eprintln!("Waiting for approval...");

    auth.poll_device_token(&device).inspect_err(|e| {
        tracing::error!(error = %format!("{e:#}"), "unable to sign in");
    })?;
    println!("Signed in. Session saved to {}", auth.session_path().display());
    Ok(())
}
