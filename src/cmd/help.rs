use anyhow::Result;

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

pub fn run() -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    println!(
        "{BOLD}{CYAN}drivebackup{RESET} {DIM}v{version}{RESET}  {DIM}─{RESET}  Back up text documents to a Google Drive app folder"
    );
    println!();
    println!("{BOLD}Usage:{RESET}  {GREEN}drivebackup{RESET} {DIM}[command] [args...]{RESET}");
    println!();
    println!("{BOLD}Commands:{RESET}");
    println!("  {YELLOW}{BOLD}(no command){RESET}                    Launch interactive TUI");

    let commands: &[(&str, &str)] = &[
        ("login",                    "Sign in with a device code"),
        ("logout",                   "Forget the stored session"),
        ("upload [-b] <file...>",    "Upload files (-b defers to the worker)"),
        ("count",                    "Count files visible to the app"),
        ("worker [--watch]",         "Run deferred uploads that are due"),
        ("queue [--prune]",          "List deferred uploads"),
    ];

    for (cmd, desc) in commands {
        let (name, args) = match cmd.find(' ') {
            Some(i) => (&cmd[..i], &cmd[i..]),
            None => (*cmd, ""),
        };
        println!(
            "  {GREEN}{name}{RESET}{DIM}{args}{RESET}  {:>width$}{DIM}{desc}{RESET}",
            "",
            width = 28usize.saturating_sub(cmd.len()),
        );
    }

    println!();
    println!("{BOLD}Options:{RESET}");
    println!("  {GREEN}-h{RESET}, {GREEN}--help{RESET}                   Show this help message");
    println!("  {GREEN}-V{RESET}, {GREEN}--version{RESET}                Show version");
    println!();
    println!(
        "{DIM}Config: ~/.config/drivebackup/config.toml  (client_id, app_folder, [log], [worker]){RESET}"
    );

    Ok(())
}
