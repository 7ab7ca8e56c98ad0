//! Tariff control surface
//!
//! Builds, inspects and queries the tariff files consumed by the download
//! scheduler.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::CommandError;

const EXIT_OK: u8 = 0;
const EXIT_INVALID_OPTIONS: u8 = 1;
const EXIT_LOOKUP_FAILED: u8 = 2;
const EXIT_FAILED: u8 = 3;

#[derive(Parser)]
#[command(name = "mogwai-tariff")]
#[command(about = "Build and inspect download-scheduler tariff files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a tariff file from period definitions
    Build {
        /// Output tariff file
        out_file: PathBuf,
        /// Tariff name (hostname-like)
        name: String,
        /// IANA zone the period endpoints are stored in
        #[arg(long, default_value = "UTC")]
        zone: String,
        /// One or more period definitions, each as five arguments:
        /// <start ISO8601> <end ISO8601> <repeat-type> <repeat-period>
        /// <capacity-bytes|unlimited>
        #[arg(num_args = 1.., value_name = "PERIOD-FIELD")]
        periods: Vec<String>,
    },

    /// Print a tariff file in human-readable form
    Dump {
        /// Tariff file to read
        file: PathBuf,
    },

    /// Print the period governing an instant
    Lookup {
        /// Tariff file to read
        file: PathBuf,
        /// Instant to query, ISO 8601
        instant: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(EXIT_INVALID_OPTIONS);
        }
    };

    let result = match cli.command {
        Commands::Build {
            out_file,
            name,
            zone,
            periods,
        } => commands::build(&out_file, &name, &zone, &periods).map(|()| String::new()),
        Commands::Dump { file } => commands::dump(&file),
        Commands::Lookup { file, instant } => commands::lookup(&file, &instant),
    };

    match result {
        Ok(output) => {
            print!("{}", output);
            ExitCode::from(EXIT_OK)
        }
        Err(err) => {
            eprintln!("mogwai-tariff: {}", err);
            let code = match err {
                CommandError::InvalidOptions(_) => EXIT_INVALID_OPTIONS,
                CommandError::LookupFailed => EXIT_LOOKUP_FAILED,
                CommandError::Failed(_) => EXIT_FAILED,
            };
            ExitCode::from(code)
        }
    }
}
