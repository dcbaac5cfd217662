mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::bond::BondArgs;
use commands::irr::IrrArgs;

/// Bullet bond cash flows, effective cost/return rates and risk metrics
#[derive(Parser)]
#[command(
    name = "bondcalc",
    version,
    about = "Bullet bond cash flows, TCEA/TCREA and duration metrics",
    long_about = "Builds the period-by-period schedule of a bullet (American) bond with \
                  optional grace periods and issuance costs, solves the issuer's and \
                  investor's IRRs and reports price, Macaulay duration and convexity. \
                  All arithmetic is done in decimal."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Full calculation: schedule, cash-flow vectors, costs and metrics
    Schedule(BondArgs),
    /// Metrics and cost breakdown without the schedule rows
    Metrics(BondArgs),
    /// Check an input and list every violated constraint
    Validate(BondArgs),
    /// Solve the IRR of an arbitrary cash-flow vector
    Irr(IrrArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Schedule(args) => commands::bond::run_schedule(args),
        Commands::Metrics(args) => commands::bond::run_metrics(args),
        Commands::Validate(args) => commands::bond::run_validate(args),
        Commands::Irr(args) => commands::irr::run_irr(args),
        Commands::Version => {
            println!("bondcalc {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
