mod checkpoint;
mod config;
mod launcher;
mod presets;
mod process;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::ExperimentConfig;
use launcher::{FailurePolicy, LaunchPlan, Launcher};
use presets::Preset;

#[derive(Debug, Parser)]
#[command(author, version, about = "Train-then-evaluate experiment launcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run training followed by evaluation
    Run(RunArgs),
    /// Run the trainer phase only
    Train(PhaseArgs),
    /// Run the evaluator phase only
    Eval(EvalArgs),
    /// List checkpoints in an experiment's run directory
    Checkpoints(CheckpointsArgs),
}

#[derive(Debug, Args)]
struct ExperimentArgs {
    /// Path to an experiment YAML file
    #[arg(long, conflicts_with = "preset")]
    config: Option<PathBuf>,
    /// Name of a built-in experiment (charades-i3d, thumos-i3d, ...)
    #[arg(long)]
    preset: Option<String>,
    /// Device index or comma-separated list for CUDA_VISIBLE_DEVICES
    devices: Option<String>,
}

impl ExperimentArgs {
    fn experiment(&self) -> Result<ExperimentConfig> {
        match (&self.config, &self.preset) {
            (Some(path), None) => ExperimentConfig::load(path),
            (None, Some(name)) => Ok(name.parse::<Preset>()?.experiment()),
            (None, None) => bail!("either --config or --preset is required"),
            (Some(_), Some(_)) => unreachable!("clap rejects --config with --preset"),
        }
    }

    fn plan(&self) -> Result<LaunchPlan> {
        let experiment = self.experiment()?;
        Ok(LaunchPlan::build(&experiment, self.devices.as_deref()))
    }
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    experiment: ExperimentArgs,
    /// Proceed to evaluation even if the trainer fails or the checkpoint
    /// is missing, as the original launch scripts did
    #[arg(long)]
    keep_going: bool,
    /// Print the planned invocations without spawning anything
    #[arg(long)]
    dry_run: bool,
    /// With --dry-run, emit the plan as JSON
    #[arg(long, requires = "dry_run")]
    json: bool,
}

#[derive(Debug, Args)]
struct PhaseArgs {
    #[command(flatten)]
    experiment: ExperimentArgs,
    #[arg(long)]
    keep_going: bool,
}

#[derive(Debug, Args)]
struct EvalArgs {
    #[command(flatten)]
    experiment: ExperimentArgs,
    /// Epoch to evaluate: a number, or "latest" to scan the run directory
    #[arg(long)]
    epoch: Option<config::EpochSelector>,
    #[arg(long)]
    keep_going: bool,
}

#[derive(Debug, Args)]
struct CheckpointsArgs {
    #[command(flatten)]
    experiment: ExperimentArgs,
}

#[derive(Debug, Serialize)]
struct PlanView {
    devices: Option<String>,
    trainer: String,
    run_dir: String,
    epoch: String,
    evaluator: Option<String>,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_command(args),
        Commands::Train(args) => {
            let launcher = Launcher::new(args.experiment.plan()?, policy(args.keep_going));
            launcher.train()
        }
        Commands::Eval(args) => eval_command(args),
        Commands::Checkpoints(args) => checkpoints_command(args),
    }
}

fn policy(keep_going: bool) -> FailurePolicy {
    if keep_going {
        FailurePolicy::KeepGoing
    } else {
        FailurePolicy::Strict
    }
}

fn run_command(args: RunArgs) -> Result<()> {
    let plan = args.experiment.plan()?;

    if args.dry_run {
        return print_plan(&plan, args.json);
    }

    info!("Launching experiment (run dir: {:?})", plan.run_dir);
    Launcher::new(plan, policy(args.keep_going)).run()?;
    info!("Experiment completed");
    Ok(())
}

fn eval_command(args: EvalArgs) -> Result<()> {
    let mut plan = args.experiment.plan()?;
    if let Some(epoch) = args.epoch {
        plan.epoch = epoch;
    }
    Launcher::new(plan, policy(args.keep_going)).evaluate()
}

fn checkpoints_command(args: CheckpointsArgs) -> Result<()> {
    let plan = args.experiment.plan()?;
    let epochs = checkpoint::list_epochs(&plan.run_dir)?;
    if epochs.is_empty() {
        println!("no checkpoints in {}", plan.run_dir.display());
        return Ok(());
    }
    for (path, epoch) in epochs {
        println!("epoch {:>3}  {}", epoch, path.display());
    }
    Ok(())
}

fn print_plan(plan: &LaunchPlan, json: bool) -> Result<()> {
    // "latest" only resolves against checkpoints on disk, which may not
    // exist yet during a dry run.
    let evaluator = plan
        .resolve_epoch()
        .ok()
        .map(|epoch| plan.evaluator(epoch).to_string());

    if json {
        let view = PlanView {
            devices: plan.devices.clone(),
            trainer: plan.trainer.to_string(),
            run_dir: plan.run_dir.display().to_string(),
            epoch: plan.epoch.to_string(),
            evaluator,
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("trainer:   {}", plan.trainer);
    match evaluator {
        Some(line) => println!("evaluator: {line}"),
        None => println!(
            "evaluator: (epoch resolves at run time from {})",
            plan.run_dir.display()
        ),
    }
    Ok(())
}
