mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::overlay::OverlayCommand;

/// Unattended AI coding orchestrator: drives ready beads across a fleet of
/// repos under a lifecycle-managed run, one controlled tick at a time.
#[derive(Debug, Parser)]
#[command(name = "orchestrator", version)]
struct Cli {
    /// Directory holding orchestrator.toml, repos.toml, and bead_contracts/.
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Advance (or mint) the current run by exactly one tick.
    Tick(commands::tick::TickArgs),
    /// Run one cycle across the selected repos under one active run.
    Run(commands::run::RunArgs),
    /// Run one cycle scoped to exactly one repo.
    ExecRepo(commands::exec_repo::ExecRepoArgs),
    /// Validate (or apply) a repo's bead contract overlay.
    #[command(subcommand)]
    Overlay(OverlayCommand),
    /// Register a new repo in repos.toml.
    InitRepo(commands::init_repo::InitRepoArgs),
    /// Build (or reuse) a repo's deck and dump it as a summary artifact.
    PlanningAudit(commands::planning_audit::PlanningAuditArgs),
    /// Inspect past and current runs.
    RunInfo(commands::run_info::RunInfoArgs),
    /// Record a human reviewer's signoff for an ended run.
    Signoff(commands::signoff::SignoffArgs),
    /// Run repeated cycles over a multi-hour window in one process.
    Roadtrip(commands::roadtrip::RoadtripArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging("info");

    let cli = Cli::parse();
    match cli.command {
        Command::Tick(args) => commands::tick::run(&cli.config_dir, args),
        Command::Run(args) => commands::run::run(&cli.config_dir, args).await,
        Command::ExecRepo(args) => commands::exec_repo::run(&cli.config_dir, args).await,
        Command::Overlay(command) => commands::overlay::run(&cli.config_dir, command).await,
        Command::InitRepo(args) => commands::init_repo::run(&cli.config_dir, args).await,
        Command::PlanningAudit(args) => commands::planning_audit::run(&cli.config_dir, args).await,
        Command::RunInfo(args) => commands::run_info::run(&cli.config_dir, args),
        Command::Signoff(args) => commands::signoff::run(&cli.config_dir, args),
        Command::Roadtrip(args) => commands::roadtrip::run(&cli.config_dir, args).await,
    }
}
