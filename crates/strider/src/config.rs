//! Run configuration with layered loading
//!
//! Configuration is loaded from multiple sources (lowest to highest priority):
//! 1. Compiled defaults
//! 2. `strider.ron` in the working directory (if exists), or the file given with `--config`
//! 3. Environment variables prefixed with `STRIDER_`
//! 4. Command-line overrides
//!
//! Example environment variable: `STRIDER_ARENA__DECISION_PERIOD=3`

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use strider_core::EnvConfig;

/// Configuration file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "strider";

pub const ENV_PREFIX: &str = "STRIDER";

/// Values given on the command line, applied after every other layer
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub arenas: Option<usize>,
    pub seed: Option<u64>,
    pub max_steps: Option<u64>,
}

impl Overrides {
    pub fn apply(&self, config: &mut EnvConfig) {
        if let Some(count) = self.arenas {
            config.arena.count = count;
        }
        if let Some(seed) = self.seed {
            config.arena.base_seed = seed;
        }
        if let Some(max_steps) = self.max_steps {
            config.arena.max_steps = max_steps;
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Load and validate the environment configuration
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<EnvConfig> {
    load_with(path, environment(), overrides)
}

fn load_with(path: Option<&Path>, env: Environment, overrides: &Overrides) -> Result<EnvConfig> {
    let file = match path {
        Some(path) => File::from(path).format(FileFormat::Ron).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE)
            .format(FileFormat::Ron)
            .required(false),
    };

    let layered = Config::builder()
        .add_source(file)
        .add_source(env)
        .build()
        .context("Failed to build configuration")?;

    let mut config: EnvConfig = layered
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    log::debug!(
        "Config: {} arenas, seed {}, dt {}, decision period {}",
        config.arena.count,
        config.arena.base_seed,
        config.arena.physics_dt,
        config.arena.decision_period
    );
    Ok(config)
}

/// Effective configuration as RON, for `--print-config`
pub fn to_ron(config: &EnvConfig) -> Result<String> {
    ron::ser::to_string_pretty(config, ron::ser::PrettyConfig::default())
        .context("Failed to serialize configuration")
}
