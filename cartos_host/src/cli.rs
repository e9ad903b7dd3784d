// cartos_host/src/cli.rs

use clap::Parser;
use std::path::PathBuf;

/// Cartos: concurrent map building from simulated sensors.
///
/// Runs one scenario file: starts its sensors and mappers, lets them run,
/// then saves every map and shuts down.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The path to the scenario TOML file to run.
    #[arg(short, long, default_value = "assets/scenarios/two_mappers.toml")]
    pub scenario: PathBuf,

    /// Overrides `host.duration_seconds`.
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Overrides `host.save_path`.
    #[arg(long)]
    pub save_dir: Option<PathBuf>,

    /// Overrides `host.seed`.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Writes the run report as TOML to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Applies the command-line overrides to a loaded scenario.
    pub fn apply(&self, config: &mut crate::config::HostConfig) {
        if let Some(duration) = self.duration {
            config.host.duration_seconds = duration;
        }
        if let Some(dir) = &self.save_dir {
            config.host.save_path = dir.clone();
        }
        if self.seed.is_some() {
            config.host.seed = self.seed;
        }
    }
}
