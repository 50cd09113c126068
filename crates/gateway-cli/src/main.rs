//! admitgate CLI
//!
//! Offline inspection of admission policy tables.

mod commands;

use admitgate_gateway_core::GatewayConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "admitgate")]
#[command(about = "Inspect and validate admitgate policy tables")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List policies in match order
    Policies {
        /// Policy file (defaults to ADMITGATE_POLICY_FILE, then the reference table)
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Print the table as JSON in policy file format
        #[arg(long)]
        json: bool,
    },
    /// Show which policy a request path would be limited by
    Match {
        /// Request path, e.g. /api/timeline/2024
        path: String,
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Check a policy file for errors
    Validate {
        #[arg(short, long)]
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = GatewayConfig::from_env();

    let result = match cli.command {
        Commands::Policies { file, json } => {
            commands::load_table(file.as_deref(), &config).and_then(|table| {
                if json {
                    commands::render_policies_json(&table)
                } else {
                    Ok(commands::render_policies(&table))
                }
            })
        }
        Commands::Match { path, file } => commands::load_table(file.as_deref(), &config)
            .map(|table| commands::explain_match(&table, &config.bypass_rules(), &path)),
        Commands::Validate { file } => commands::validate_file(&file),
    };

    match result {
        Ok(output) => {
            println!("{}", output.trim_end());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
