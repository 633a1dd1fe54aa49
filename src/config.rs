use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Trainer phase settings: which script to run and how it writes checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub program: String,
    pub script: PathBuf,
    pub ckpt_freq: usize,
    pub output: String,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            script: PathBuf::from("train.py"),
            ckpt_freq: 1,
            output: default_output_tag(),
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ckpt_freq == 0 {
            bail!("trainer.ckpt_freq must be > 0");
        }
        if self.output.is_empty() {
            bail!("trainer.output tag must not be empty");
        }
        Ok(())
    }
}

/// Which checkpoint the evaluator should be pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EpochSelector {
    /// A fixed epoch number, matching the hardcoded value of the original
    /// launch scripts.
    Fixed(usize),
    /// Scan the run directory and take the highest epoch present.
    Latest(LatestTag),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatestTag {
    Latest,
}

impl EpochSelector {
    pub const LATEST: EpochSelector = EpochSelector::Latest(LatestTag::Latest);
}

impl fmt::Display for EpochSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpochSelector::Fixed(n) => write!(f, "{n}"),
            EpochSelector::Latest(_) => write!(f, "latest"),
        }
    }
}

impl std::str::FromStr for EpochSelector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(EpochSelector::LATEST);
        }
        let n = s
            .parse::<usize>()
            .with_context(|| format!("invalid epoch selector: {s:?}"))?;
        Ok(EpochSelector::Fixed(n))
    }
}

/// Evaluator phase settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub program: String,
    pub script: PathBuf,
    pub epoch: EpochSelector,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            script: PathBuf::from("eval.py"),
            epoch: EpochSelector::LATEST,
        }
    }
}

impl EvaluatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epoch == EpochSelector::Fixed(0) {
            bail!("evaluator.epoch must be > 0 (epochs are 1-indexed)");
        }
        Ok(())
    }
}

/// One experiment: the dataset/model YAML handed to both collaborators,
/// plus the trainer and evaluator command surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Path to the dataset/model YAML consumed by train.py and eval.py.
    pub config: PathBuf,
    #[serde(default = "default_ckpt_root")]
    pub ckpt_root: PathBuf,
    /// Device list for CUDA_VISIBLE_DEVICES; the CLI positional argument
    /// overrides this when given.
    #[serde(default)]
    pub devices: Option<String>,
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read experiment config: {}", path.display()))?;
        let config: ExperimentConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse experiment YAML: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.config.as_os_str().is_empty() {
            bail!("config path must not be empty");
        }
        if config_stem(&self.config).is_none() {
            bail!(
                "config path {} has no usable file stem",
                self.config.display()
            );
        }
        self.trainer.validate()?;
        self.evaluator.validate()?;
        Ok(())
    }

    /// Run directory name, e.g. `charades_i3d` + `pretrain` ->
    /// `charades_i3d_pretrain`.
    pub fn run_dir_name(&self) -> String {
        let stem = config_stem(&self.config).unwrap_or_default();
        format!("{}_{}", stem, self.trainer.output)
    }

    pub fn run_dir(&self) -> PathBuf {
        self.ckpt_root.join(self.run_dir_name())
    }
}

impl fmt::Display for ExperimentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn config_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

fn default_program() -> String {
    "python".to_string()
}

fn default_output_tag() -> String {
    "pretrain".to_string()
}

fn default_ckpt_root() -> PathBuf {
    PathBuf::from("ckpt")
}
