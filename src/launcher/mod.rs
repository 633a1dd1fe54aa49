use anyhow::Result;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;
use tracing::{info, warn};

use crate::checkpoint;
use crate::config::{EpochSelector, ExperimentConfig};
use crate::process::{self, Invocation};

/// Environment variable restricting visible compute devices for both
/// phases.
pub const DEVICE_ENV: &str = "CUDA_VISIBLE_DEVICES";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("trainer exited with {status}")]
    TrainerFailed { status: ExitStatus },
    #[error("evaluator exited with {status}")]
    EvaluatorFailed { status: ExitStatus },
    #[error("checkpoint not found after training: {}", path.display())]
    CheckpointMissing { path: PathBuf },
    #[error("no checkpoints found in {}", dir.display())]
    NoCheckpoints { dir: PathBuf },
}

/// How a trainer failure or a missing checkpoint is treated.
///
/// The original launch scripts never inspected the trainer's exit code and
/// ran the evaluator unconditionally; `KeepGoing` reproduces that, `Strict`
/// is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Strict,
    KeepGoing,
}

/// The fully resolved pair of invocations for one experiment, built before
/// anything is spawned so the sequencing contract is testable in isolation.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    config_path: PathBuf,
    evaluator_program: String,
    evaluator_script: PathBuf,
    pub devices: Option<String>,
    pub run_dir: PathBuf,
    pub epoch: EpochSelector,
    pub trainer: Invocation,
}

impl LaunchPlan {
    /// Build the plan from an experiment config. `devices` is the CLI
    /// positional argument and overrides the config's `devices` field.
    pub fn build(config: &ExperimentConfig, devices: Option<&str>) -> Self {
        let devices = devices
            .map(str::to_string)
            .or_else(|| config.devices.clone());

        let config_path = config.config.to_string_lossy().into_owned();
        let mut trainer = Invocation::new(config.trainer.program.clone())
            .arg(config.trainer.script.to_string_lossy().into_owned())
            .arg(config_path)
            .arg("--ckpt-freq")
            .arg(config.trainer.ckpt_freq.to_string())
            .arg("--output")
            .arg(config.trainer.output.clone());
        if let Some(d) = &devices {
            trainer = trainer.env(DEVICE_ENV, d.clone());
        }

        Self {
            config_path: config.config.clone(),
            evaluator_program: config.evaluator.program.clone(),
            evaluator_script: config.evaluator.script.clone(),
            devices,
            run_dir: config.run_dir(),
            epoch: config.evaluator.epoch,
            trainer,
        }
    }

    /// Checkpoint path the evaluator is pointed at for a given epoch.
    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        checkpoint::epoch_file(&self.run_dir, epoch)
    }

    /// Evaluator invocation for a concrete epoch. Carries the identical
    /// config path the trainer received.
    pub fn evaluator(&self, epoch: usize) -> Invocation {
        let mut invocation = Invocation::new(self.evaluator_program.clone())
            .arg(self.evaluator_script.to_string_lossy().into_owned())
            .arg(self.config_path.to_string_lossy().into_owned())
            .arg(self.checkpoint_path(epoch).to_string_lossy().into_owned());
        if let Some(d) = &self.devices {
            invocation = invocation.env(DEVICE_ENV, d.clone());
        }
        invocation
    }

    /// Resolve the epoch selector against the run directory on disk.
    pub fn resolve_epoch(&self) -> Result<usize> {
        match self.epoch {
            EpochSelector::Fixed(n) => Ok(n),
            EpochSelector::Latest(_) => checkpoint::latest_epoch(&self.run_dir)?
                .ok_or_else(|| {
                    LaunchError::NoCheckpoints {
                        dir: self.run_dir.clone(),
                    }
                    .into()
                }),
        }
    }
}

pub struct Launcher {
    plan: LaunchPlan,
    policy: FailurePolicy,
}

impl Launcher {
    pub fn new(plan: LaunchPlan, policy: FailurePolicy) -> Self {
        Self { plan, policy }
    }

    pub fn plan(&self) -> &LaunchPlan {
        &self.plan
    }

    /// Train-then-evaluate, strictly sequential: the evaluator is only
    /// considered once the trainer's process has exited.
    pub fn run(&self) -> Result<()> {
        self.train()?;
        self.evaluate()
    }

    /// Trainer phase only.
    pub fn train(&self) -> Result<()> {
        let status = process::run(&self.plan.trainer)?;
        if !status.success() {
            match self.policy {
                FailurePolicy::Strict => {
                    return Err(LaunchError::TrainerFailed { status }.into());
                }
                FailurePolicy::KeepGoing => {
                    warn!("Trainer failed ({status}); continuing per --keep-going");
                }
            }
        }
        Ok(())
    }

    /// Evaluator phase only.
    pub fn evaluate(&self) -> Result<()> {
        let epoch = self.plan.resolve_epoch()?;
        let checkpoint_path = self.plan.checkpoint_path(epoch);

        if !checkpoint_path.exists() {
            match self.policy {
                FailurePolicy::Strict => {
                    return Err(LaunchError::CheckpointMissing {
                        path: checkpoint_path,
                    }
                    .into());
                }
                FailurePolicy::KeepGoing => {
                    warn!(
                        "Checkpoint missing at {:?}; evaluator will likely fail",
                        checkpoint_path
                    );
                }
            }
        }

        println!("start testing...");
        info!("Evaluating epoch {epoch} from {:?}", checkpoint_path);

        let status = process::run(&self.plan.evaluator(epoch))?;
        if !status.success() {
            return Err(LaunchError::EvaluatorFailed { status }.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EvaluatorConfig, TrainerConfig};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn charades_config() -> ExperimentConfig {
        ExperimentConfig {
            config: PathBuf::from("./configs/charades_i3d.yaml"),
            ckpt_root: PathBuf::from("ckpt"),
            devices: None,
            trainer: TrainerConfig {
                program: "python".into(),
                script: PathBuf::from("train.py"),
                ckpt_freq: 2,
                output: "pretrain".into(),
            },
            evaluator: EvaluatorConfig {
                program: "python".into(),
                script: PathBuf::from("eval.py"),
                epoch: EpochSelector::Fixed(8),
            },
        }
    }

    #[test]
    fn device_argument_reaches_both_invocations_verbatim() {
        let plan = LaunchPlan::build(&charades_config(), Some("0,1"));
        assert_eq!(plan.trainer.env_value(DEVICE_ENV), Some("0,1"));
        assert_eq!(plan.evaluator(8).env_value(DEVICE_ENV), Some("0,1"));
    }

    #[test]
    fn cli_devices_override_config_devices() {
        let mut config = charades_config();
        config.devices = Some("3".into());

        let plan = LaunchPlan::build(&config, Some("0"));
        assert_eq!(plan.trainer.env_value(DEVICE_ENV), Some("0"));

        let plan = LaunchPlan::build(&config, None);
        assert_eq!(plan.trainer.env_value(DEVICE_ENV), Some("3"));
    }

    #[test]
    fn evaluator_receives_same_config_path_as_trainer() {
        let plan = LaunchPlan::build(&charades_config(), Some("0"));
        let trainer_config_arg = plan.trainer.args[1].clone();
        let evaluator_config_arg = plan.evaluator(8).args[1].clone();
        assert_eq!(trainer_config_arg, evaluator_config_arg);
        assert_eq!(trainer_config_arg, "./configs/charades_i3d.yaml");
    }

    #[test]
    fn charades_preset_matches_original_script() {
        // Guards the built-in preset, not a hand-built config: the rendered
        // command lines must match the original Charades launch script
        // exactly.
        let experiment = crate::presets::Preset::CharadesI3d.experiment();
        let plan = LaunchPlan::build(&experiment, Some("0,1"));
        assert_eq!(
            plan.trainer.to_string(),
            "CUDA_VISIBLE_DEVICES=0,1 python train.py ./configs/charades_i3d.yaml \
             --ckpt-freq 2 --output pretrain"
        );
        assert_eq!(
            plan.evaluator(8).to_string(),
            format!(
                "CUDA_VISIBLE_DEVICES=0,1 python eval.py ./configs/charades_i3d.yaml {}",
                Path::new("ckpt")
                    .join("charades_i3d_pretrain")
                    .join("epoch_008.pth.tar")
                    .display()
            )
        );
    }

    #[test]
    fn checkpoint_path_follows_convention() {
        let plan = LaunchPlan::build(&charades_config(), None);
        assert_eq!(
            plan.checkpoint_path(8),
            Path::new("ckpt")
                .join("charades_i3d_pretrain")
                .join("epoch_008.pth.tar")
        );
    }

    #[test]
    fn resolve_latest_epoch_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = charades_config();
        config.ckpt_root = temp_dir.path().to_path_buf();
        config.evaluator.epoch = EpochSelector::LATEST;

        let plan = LaunchPlan::build(&config, None);
        // Nothing trained yet.
        assert!(plan.resolve_epoch().is_err());

        let run_dir = config.run_dir();
        fs::create_dir_all(&run_dir).unwrap();
        for epoch in [2, 4, 6] {
            fs::write(crate::checkpoint::epoch_file(&run_dir, epoch), b"").unwrap();
        }
        assert_eq!(plan.resolve_epoch().unwrap(), 6);
    }

    #[test]
    fn strict_policy_fails_trainer_and_skips_evaluator() {
        let mut config = charades_config();
        config.trainer.program = "false".into();
        config.trainer.script = PathBuf::from("--version");

        let plan = LaunchPlan::build(&config, None);
        let launcher = Launcher::new(plan, FailurePolicy::Strict);
        let err = launcher.run().unwrap_err();
        assert!(err.downcast_ref::<LaunchError>().is_some());
    }

    #[test]
    fn keep_going_runs_evaluator_after_trainer_failure() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = charades_config();
        config.ckpt_root = temp_dir.path().to_path_buf();
        // `false` fails regardless of its arguments, `true` succeeds.
        config.trainer.program = "false".into();
        config.evaluator.program = "true".into();

        let plan = LaunchPlan::build(&config, None);
        let launcher = Launcher::new(plan, FailurePolicy::KeepGoing);
        launcher.run().unwrap();
    }

    #[test]
    fn strict_policy_requires_checkpoint_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = charades_config();
        config.ckpt_root = temp_dir.path().to_path_buf();
        config.evaluator.program = "true".into();

        let plan = LaunchPlan::build(&config, None);
        let launcher = Launcher::new(plan.clone(), FailurePolicy::Strict);
        let err = launcher.evaluate().unwrap_err();
        match err.downcast_ref::<LaunchError>() {
            Some(LaunchError::CheckpointMissing { path }) => {
                assert_eq!(*path, plan.checkpoint_path(8));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let run_dir = config.run_dir();
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(crate::checkpoint::epoch_file(&run_dir, 8), b"").unwrap();
        Launcher::new(plan, FailurePolicy::Strict).evaluate().unwrap();
    }
}
