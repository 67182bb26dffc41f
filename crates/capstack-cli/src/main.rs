mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::call::CallArgs;
use commands::distribute::DistributeArgs;
use commands::draw::DrawArgs;

/// Capital waterfall and construction draw calculations
#[derive(Parser)]
#[command(
    name = "capstack",
    version,
    about = "Capital waterfall and construction draw calculations",
    long_about = "A CLI for real-estate capital stack calculations with exact \
                  integer-cent accounting. Allocates capital calls pro-rata to \
                  commitments, splits construction draws into retainage and net \
                  funding against a loan ceiling, and runs distribution \
                  waterfalls (return of capital, preferred return, sponsor \
                  catch-up, residual split). All amounts are integer cents."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate a capital call across investor commitments
    Call(CallArgs),
    /// Split a draw into retainage and net funding, checking loan headroom
    Draw(DrawArgs),
    /// Run a cash pool through the distribution waterfall
    Distribute(DistributeArgs),
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

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Call(args) => commands::call::run_call(args),
        Commands::Draw(args) => commands::draw::run_draw(args),
        Commands::Distribute(args) => commands::distribute::run_distribute(args),
        Commands::Version => {
            println!("capstack {}", env!("CARGO_PKG_VERSION"));
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
