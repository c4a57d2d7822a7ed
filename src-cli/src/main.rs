//! Faultline command line
//!
//! - `run` reproduces a crash, captures a snapshot and asks for a diagnosis
//! - `history` lists recorded runs

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use faultline_core::FaultMode;

#[derive(Parser)]
#[command(name = "faultline")]
#[command(version, about = "Reproduce and capture xv6 crashes")]
struct Cli {
    /// Configuration file (defaults to ./faultline.toml when present)
    #[arg(short, long, global = true, env = "FAULTLINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test program and capture the crash
    Run {
        /// Test program to invoke from the guest shell
        test: String,

        /// Where the fault is expected
        #[arg(short, long, value_enum, default_value_t = Mode::Kernel)]
        mode: Mode,

        /// Skip the diagnosis request
        #[arg(long)]
        no_diagnosis: bool,

        /// Where to write the suggested patch
        #[arg(long)]
        patch_out: Option<PathBuf>,
    },

    /// List recorded runs, newest first
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Kernel,
    User,
}

impl From<Mode> for FaultMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Kernel => FaultMode::Kernel,
            Mode::User => FaultMode::User,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    faultline_core::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            test,
            mode,
            no_diagnosis,
            patch_out,
        } => {
            let succeeded = commands::run::execute(
                cli.config.as_deref(),
                &test,
                mode.into(),
                !no_diagnosis,
                patch_out.as_deref(),
            )
            .await?;
            if !succeeded {
                std::process::exit(1);
            }
        }
        Commands::History { limit } => {
            commands::history::execute(cli.config.as_deref(), limit)?;
        }
    }

    Ok(())
}
