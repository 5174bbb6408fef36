mod commands;

use clap::{Parser, Subcommand};
use anyhow::Result;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pyrun-cli")]
#[command(about = "pyrun CLI - Run Python code and test cases through the sandbox pipeline", long_about = None)]
struct Cli {
    /// Run directly on the host instead of in a container (no isolation)
    #[arg(long, global = true, default_value = "false")]
    host: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Python file and print its output
    Run {
        /// Python source file
        file: PathBuf,
    },

    /// Run a Python file against test cases
    Test {
        /// Python source file
        file: PathBuf,

        /// JSON file holding an array of test cases
        #[arg(short, long)]
        cases: PathBuf,

        /// Print the full response as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Print the program that would be executed
    Synth {
        /// Python source file
        file: PathBuf,

        /// JSON file holding an array of test cases
        #[arg(short, long)]
        cases: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file } => {
            commands::run_file(&file, cli.host).await?;
        }
        Commands::Test { file, cases, json } => {
            let all_passed = commands::test_file(&file, &cases, cli.host, json).await?;
            if !all_passed {
                std::process::exit(1);
            }
        }
        Commands::Synth { file, cases } => {
            commands::synth_file(&file, cases.as_deref())?;
        }
    }

    Ok(())
}
