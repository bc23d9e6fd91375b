use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
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
        "AGG_HOST",
        "AGG_PORT",
        "AGG_DATABASE_URL",
        "AGG_PROVIDER_HMAC_CHECKS",
        "AGG_WEBHOOK_BASE_DELAY_SECS",
        "AGG_WEBHOOK_MAX_DELAY_SECS",
        "AGG_WEBHOOK_MAX_ATTEMPTS",
        "AGG_WEBHOOK_TIMEOUT_SECS",
        "AGG_MAX_CANCELLATIONS",
        "AGG_MAX_MATCH_SWEEPS",
        "AGG_ORDER_FULFILLMENT_TIMEOUT_MINS",
        "AGG_RECEIVE_ADDRESS_VALIDITY_MINS",
        "AGG_MIN_CONFIRMATIONS",
        "AGG_CHAIN_START_BLOCK",
        "AGG_MATCHING_INTERVAL_SECS",
        "AGG_WEBHOOK_RETRY_INTERVAL_SECS",
        "AGG_HOUSEKEEPING_INTERVAL_SECS",
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
