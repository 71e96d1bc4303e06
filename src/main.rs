//! kun - runs the `upgrade node` phase workflow on this host.
//!
//! - Lists the phase tree and the known feature gates
//! - Runs all phases, or a `--phases`/`--skip-phases` selection of them
//! - Honors `--dry-run` in every phase

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing::{debug, error, info};

use kun::config::{Args, Command, Config};
use kun::context::{NodeRunContext, RunData};
use kun::error::KunError;
use kun::features::FeatureGateRegistry;
use kun::phases::new_upgrade_node_workflow;
use kun::workflow::Workflow;
use kun::{logging, output};

fn main() {
    let args = Args::parse();
    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init(&config.log_format, &config.log_level) {
        eprintln!("Failed to initialize logging: {e:#}");
        std::process::exit(1);
    }

    debug!("Starting kun with {:?}", config.command);

    if let Err(e) = run(&config) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

/// Main application logic.
fn run(config: &Config) -> Result<()> {
    let mut features = FeatureGateRegistry::with_defaults()?;
    features.set_overrides(config.feature_gates.clone())?;

    let workflow = new_upgrade_node_workflow()?;

    match config.command {
        Command::Phases => {
            output::print_phases(workflow.name(), &workflow.list());
            Ok(())
        }
        Command::Features => {
            output::print_features(&features);
            Ok(())
        }
        Command::Run => run_upgrade(&workflow, config, features),
    }
}

fn run_upgrade(
    workflow: &Workflow<dyn RunData>,
    config: &Config,
    features: FeatureGateRegistry,
) -> Result<()> {
    let ctx = NodeRunContext::new(config.node.clone(), config.dry_run, features);
    info!(
        "Upgrading {} node (kubernetes dir: {}, dry run: {})",
        ctx.role(),
        config.node.kubernetes_dir.display(),
        config.dry_run
    );

    let report = workflow.run(&config.selection, &ctx, &config.flag_values())?;
    output::print_report(&report);

    if let Err(err) = report.into_result() {
        if let KunError::PhaseActionFailed {
            phase, completed, ..
        } = &err
        {
            output::print_failure(phase, completed);
        }
        return Err(err.into());
    }

    println!();
    if config.dry_run {
        println!("{}", "Dry run complete, no changes were made.".yellow());
    } else {
        println!("{}", "Node upgrade complete.".green().bold());
    }
    Ok(())
}
