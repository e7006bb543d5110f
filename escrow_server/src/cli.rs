use std::{env, env::VarError};

/// There's no real CLI for the server. Any argument prints the help text and the current configuration.
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 18] = [
        "RUST_LOG",
        "ESC_HOST",
        "ESC_PORT",
        "ESC_DATABASE_URL",
        "ESC_CURRENCY",
        "ESC_MIN_DEPOSIT",
        "ESC_MIN_WITHDRAW",
        "ESC_ANNOUNCEMENT_WINDOW_HOURS",
        "ESC_SWEEP_INTERVAL_SECS",
        "ESC_RETRY_ATTEMPTS",
        "ESC_RETRY_BASE_DELAY_MS",
        "ESC_ACTOR_HEADER",
        "ESC_INTERNAL_IP_WHITELIST",
        "ESC_USE_X_FORWARDED_FOR",
        "ESC_USE_FORWARDED",
        "ESC_WEBHOOK_SIGNATURE_CHECKS",
        "ESC_WEBHOOK_TOLERANCE_SECS",
        "ESC_PROVIDER_API_URL",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
