use crate::auth::GoogleAuth;
use anyhow::Result;

pub fn run() -> Result<()> {
    let config = super::cli_config()?;
    let auth = GoogleAuth::new(&config)?;
    if !auth.has_session() {
        println!("Not signed in");
        return Ok(());
    }
    auth.clear_session()?;
    tracing::info!("signed out");
    println!("Signed out");
    Ok(())
}
