//! strand CLI - load, check and run strand programs.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strand")]
#[command(author, version, about = "Modular audio/MIDI dataflow runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available classes and their variables
    Classes(commands::classes::ClassesArgs),

    /// Validate a program (and optionally its network roster)
    Check(commands::check::CheckArgs),

    /// Load, synchronize and run a program
    Run(commands::run::RunArgs),
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    tracing_log::LogTracer::init().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Classes(args) => commands::classes::run(args),
        Commands::Check(args) => commands::check::run(args),
        Commands::Run(args) => commands::run::run(args),
    }
}
