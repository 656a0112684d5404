//! Harvester binary
//!
//! `harvester --config harvester.toml run` loops until Ctrl-C.
//! `harvester --config harvester.toml harvest [PATH...]` runs one cycle now.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harvester::{CancellationToken, CycleReport, Harvester, HarvesterConfig, NegotiationState};
use harvester_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "harvester", about = "Instrument data harvester")]
struct Cli {
    /// Local configuration file (TOML)
    #[arg(short, long, env = "HARVESTER_CONFIG")]
    config: PathBuf,

    /// Enable debug logging on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Harvest continuously, sleeping between cycles
    Run,

    /// Run a single cycle immediately
    Harvest {
        /// Restrict the cycle to these files or directories (must lie inside a monitored path)
        paths: Vec<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(LogConfig {
        app_name: "harvester",
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", e);
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = HarvesterConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(dispatch(cli.command, config))
}

async fn dispatch(command: Commands, config: HarvesterConfig) -> Result<ExitCode> {
    let harvester = Harvester::connect(config).context("Failed to create harvester")?;
    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    match command {
        Commands::Run => {
            harvester.run_forever(cancel).await;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Harvest { paths } => {
            let report = harvester
                .harvest_now(&paths, &cancel)
                .await
                .context("Harvest failed")?;
            print_report(&report);
            Ok(exit_code(&report))
        }
    }
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received; finishing in-flight negotiations");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
}

fn print_report(report: &CycleReport) {
    println!("Files seen:   {}", report.files_seen);
    for (state, count) in &report.outcomes {
        println!("  {:<18} {}", state.as_str(), count);
    }
    if report.busy > 0 {
        println!("Busy:         {}", report.busy);
    }
    if report.scan_errors > 0 {
        println!("Scan errors:  {}", report.scan_errors);
    }
    if let Some(e) = &report.halted {
        println!("Halted:       {}", e);
    }
}

fn exit_code(report: &CycleReport) -> ExitCode {
    if report.is_halted() || report.count(NegotiationState::UploadFailed) > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
