// Library exports for use in scripts and other binaries

pub mod checkpoint;
pub mod config;
pub mod launcher;
pub mod presets;
pub mod process;

// Re-export commonly used types
pub use config::{EpochSelector, ExperimentConfig};
pub use launcher::{FailurePolicy, LaunchPlan, Launcher};
pub use presets::Preset;
pub use process::Invocation;
