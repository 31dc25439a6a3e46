//! agentrun CLI binary entry point.

use agentrun::cli::{handle_decode, handle_permissions, Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = std::env::var("AGENTRUN_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Decode(args) => handle_decode(args),
        Commands::Permissions(args) => handle_permissions(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
