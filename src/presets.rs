use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::config::{EpochSelector, EvaluatorConfig, ExperimentConfig, TrainerConfig};

/// Built-in experiments, one per dataset/feature pair. Each carries the
/// literal checkpoint frequency and evaluation epoch of the corresponding
/// launch script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    CharadesI3d,
    ThumosI3d,
    AnetTsp,
    HacsSlowfast,
}

impl Preset {
    pub fn all() -> &'static [Preset] {
        &[
            Preset::CharadesI3d,
            Preset::ThumosI3d,
            Preset::AnetTsp,
            Preset::HacsSlowfast,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Preset::CharadesI3d => "charades-i3d",
            Preset::ThumosI3d => "thumos-i3d",
            Preset::AnetTsp => "anet-tsp",
            Preset::HacsSlowfast => "hacs-slowfast",
        }
    }

    pub fn experiment(&self) -> ExperimentConfig {
        let (config, ckpt_freq, epoch) = match self {
            Preset::CharadesI3d => ("./configs/charades_i3d.yaml", 2, 8),
            Preset::ThumosI3d => ("./configs/thumos_i3d.yaml", 5, 35),
            Preset::AnetTsp => ("./configs/anet_tsp.yaml", 1, 10),
            Preset::HacsSlowfast => ("./configs/hacs_slowfast.yaml", 1, 11),
        };
        ExperimentConfig {
            config: PathBuf::from(config),
            ckpt_root: PathBuf::from("ckpt"),
            devices: None,
            trainer: TrainerConfig {
                ckpt_freq,
                ..TrainerConfig::default()
            },
            evaluator: EvaluatorConfig {
                epoch: EpochSelector::Fixed(epoch),
                ..EvaluatorConfig::default()
            },
        }
    }
}

impl std::str::FromStr for Preset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        for preset in Preset::all() {
            if preset.name() == s {
                return Ok(*preset);
            }
        }
        let known: Vec<_> = Preset::all().iter().map(|p| p.name()).collect();
        bail!("unknown preset {s:?}; known presets: {}", known.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_presets_validate() {
        for preset in Preset::all() {
            preset.experiment().validate().unwrap();
        }
    }

    #[test]
    fn preset_names_round_trip() {
        for preset in Preset::all() {
            assert_eq!(preset.name().parse::<Preset>().unwrap(), *preset);
        }
        assert!("charades".parse::<Preset>().is_err());
    }

    #[test]
    fn charades_preset_carries_script_literals() {
        let experiment = Preset::CharadesI3d.experiment();
        assert_eq!(
            experiment.config,
            PathBuf::from("./configs/charades_i3d.yaml")
        );
        assert_eq!(experiment.trainer.script, PathBuf::from("train.py"));
        assert_eq!(experiment.evaluator.script, PathBuf::from("eval.py"));
        assert_eq!(experiment.trainer.ckpt_freq, 2);
        assert_eq!(experiment.trainer.output, "pretrain");
        assert_eq!(experiment.evaluator.epoch, EpochSelector::Fixed(8));
        assert_eq!(experiment.run_dir_name(), "charades_i3d_pretrain");
    }
}
