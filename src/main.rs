//! storyrun - component test orchestrator
//!
//! Starts test runs against a background daemon that reconciles results from
//! the headless runner and the browser into one status tree.

use clap::Parser;
use commands::Commands;
use storyrun::common::logging;
use storyrun::{cli, commands, daemon};

#[derive(Parser)]
#[command(name = "storyrun", about = "Run component tests and reconcile headless and browser results")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Daemon => {
            // Held until exit so buffered log lines get flushed
            let (_log_path, _guard) = logging::init_daemon();
            daemon::run().await
        }
        command => {
            logging::init_cli();
            cli::dispatch(command).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
