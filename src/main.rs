mod auth;
mod cmd;
mod config;
mod document;
mod drive;
mod logging;
mod session;
#[cfg(test)]
mod testing;
mod tui;
mod work;

use crate::config::AppConfig;
use anyhow::Result;
use std::env;
use std::process::exit;

fn main() {
    if let Err(e) = entry() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn entry() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "-h" | "--help" | "help" => return cmd::help::run(),
            "-V" | "--version" => {
                println!("drivebackup {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            _ => {}
        }
    }

    let config = AppConfig::load()?;
    if let Err(e) = logging::init(&config) {
        eprintln!("Warning: logging disabled: {e:#}");
    }

    if args.len() > 1 {
        let rest = &args[2..];
        return match args[1].as_str() {
            "login" => cmd::login::run(rest),
            "logout" => cmd::logout::run(),
            "upload" => cmd::upload::run(rest),
            "count" => cmd::count::run(rest),
            "worker" => cmd::worker::run(rest),
            "queue" => cmd::queue::run(rest),
            other => Err(anyhow::anyhow!(
                "unknown command: {other}\nRun `drivebackup --help` for usage"
            )),
        };
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting");
    tui::run(config)
}
