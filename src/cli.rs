//! Command line interface for the hardstep driver

use std::fmt;
use std::path::PathBuf;

use clap::Parser;

use crate::config::SimulationConfig;
use crate::physics::integrators::SchemeRegistry;

#[derive(Debug)]
pub enum CliError {
    /// Configuration file could not be loaded or is invalid
    ConfigLoad(String),
    /// Unknown symplectic scheme name
    InvalidScheme(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::ConfigLoad(msg) => write!(f, "Failed to load configuration: {msg}"),
            CliError::InvalidScheme(msg) => write!(f, "Invalid scheme: {msg}"),
        }
    }
}

impl std::error::Error for CliError {}

/// hardstep - short-range integrator for dense star clusters
#[derive(Parser, Debug, Default)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of tree steps to run
    #[arg(short = 'n', long, value_name = "COUNT")]
    pub steps: Option<usize>,

    /// Random seed for the generated cluster
    #[arg(short = 's', long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Number of single stars
    #[arg(long, value_name = "COUNT")]
    pub singles: Option<usize>,

    /// Number of primordial binaries
    #[arg(long, value_name = "COUNT")]
    pub binaries: Option<usize>,

    /// Symplectic scheme of the regularized engine (e.g. leapfrog, pefrl)
    #[arg(long, value_name = "NAME")]
    pub scheme: Option<String>,

    /// Directory for energy-failure dumps
    #[arg(long, value_name = "PATH")]
    pub dump_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// List available symplectic schemes and exit
    #[arg(long)]
    pub list_schemes: bool,
}

/// Handles the --list-schemes flag by printing available schemes
pub fn handle_list_schemes() {
    let registry = SchemeRegistry::default();
    println!("Available schemes:");
    for name in registry.list_available() {
        println!("  - {name}");
    }

    let aliases = registry.list_aliases();
    if !aliases.is_empty() {
        println!("\nAliases:");
        for (alias, target) in aliases {
            println!("  - {alias} -> {target}");
        }
    }
}

/// Loads configuration from file or the user config, then applies command-line overrides
pub fn load_and_apply_config(args: &Args) -> Result<SimulationConfig, CliError> {
    let mut config = if let Some(config_path) = &args.config {
        println!("Loading configuration from: {}", config_path.display());
        SimulationConfig::load_or_default(config_path)
    } else {
        SimulationConfig::load_from_user_config()
    };

    if let Some(steps) = args.steps {
        config.scenario.steps = Some(steps);
    }
    if let Some(seed) = args.seed {
        println!("Using random seed: {seed}");
        config.scenario.seed = Some(seed);
    }
    if let Some(singles) = args.singles {
        config.scenario.n_singles = singles;
    }
    if let Some(binaries) = args.binaries {
        config.scenario.n_binaries = binaries;
    }
    if let Some(scheme) = &args.scheme {
        SchemeRegistry::default()
            .create(scheme)
            .map_err(|err| CliError::InvalidScheme(err.to_string()))?;
        println!("Using scheme: {scheme}");
        config.hard.regularized.scheme = scheme.clone();
    }
    if let Some(dir) = &args.dump_dir {
        config.output.dump_dir = dir.clone();
    }

    config
        .hard
        .check_params()
        .map_err(|err| CliError::ConfigLoad(err.to_string()))?;
    Ok(config)
}
