use anyhow::{Context, Result};
use std::fmt;
use std::process::{Command, ExitStatus};
use tracing::info;

/// A fully resolved subprocess invocation: program, arguments, and the
/// environment assignments attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Look up an attached environment assignment by key.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.envs {
            write!(f, "{key}={value} ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Spawn the invocation with inherited stdio and wait for it to exit.
pub fn run(invocation: &Invocation) -> Result<ExitStatus> {
    info!("Running: {}", invocation);

    let mut command = Command::new(&invocation.program);
    command.args(&invocation.args);
    for (key, value) in &invocation.envs {
        command.env(key, value);
    }

    let status = command
        .status()
        .with_context(|| format!("Failed to spawn: {}", invocation))?;

    info!("Process exited with status: {}", status);

    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_shell_like_line() {
        let invocation = Invocation::new("python")
            .arg("./train.py")
            .arg("./configs/charades_i3d.yaml")
            .arg("--ckpt-freq")
            .arg("2")
            .env("CUDA_VISIBLE_DEVICES", "0,1");
        assert_eq!(
            invocation.to_string(),
            "CUDA_VISIBLE_DEVICES=0,1 python ./train.py ./configs/charades_i3d.yaml --ckpt-freq 2"
        );
    }

    #[test]
    fn env_value_lookup() {
        let invocation = Invocation::new("python").env("CUDA_VISIBLE_DEVICES", "0");
        assert_eq!(invocation.env_value("CUDA_VISIBLE_DEVICES"), Some("0"));
        assert_eq!(invocation.env_value("OMP_NUM_THREADS"), None);
    }

    #[test]
    fn run_reports_exit_status() {
        let ok = Invocation::new("true");
        assert!(run(&ok).unwrap().success());

        let failing = Invocation::new("false");
        assert!(!run(&failing).unwrap().success());
    }

    #[test]
    fn run_missing_program_is_an_error() {
        let invocation = Invocation::new("definitely-not-a-real-binary-1b2c3");
        assert!(run(&invocation).is_err());
    }
}
