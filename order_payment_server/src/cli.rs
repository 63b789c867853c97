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
    const DISPLAY_ENVS: [&str; 16] = [
        "RUST_LOG",
        "OPG_HOST",
        "OPG_PORT",
        "OPG_DATABASE_URL",
        "OPG_DB_MAX_CONNECTIONS",
        "OPG_PUBLIC_URL",
        "OPG_DEFAULT_CURRENCY",
        "OPG_RECONCILIATION_INTERVAL",
        "OPG_RECONCILIATION_THRESHOLD",
        "OPG_RECONCILIATION_BATCH_SIZE",
        "OPG_ALTERNATE_PROVIDER_THRESHOLD",
        "OPG_PROVIDER_TIMEOUT",
        "OPG_WEBHOOK_SIGNATURE_CHECKS",
        "OPG_STRIPE_API_URL",
        "OPG_PAYSTACK_API_URL",
        "OPG_FLUTTERWAVE_API_URL",
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
