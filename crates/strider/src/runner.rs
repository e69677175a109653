//! Headless arena rollout
//!
//! Builds one arena per configured slot, steps all of them in lockstep with a
//! rayon parallel iterator and aggregates the episode statistics into a
//! [`RunSummary`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use strider_core::{
    ArenaDeps, ArenaId, ArenaRegistry, ConstantPolicy, EnvConfig, EpisodeRecord, Policy,
    RandomPolicy,
};
use strider_creature::PhysicsBackend;

/// Built-in policies the runner can drive arenas with
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyKind {
    /// Uniform random actions
    Random,
    /// All joints at mid range, half strength
    Zero,
}

impl PolicyKind {
    fn build(self, seed: u64) -> Box<dyn Policy> {
        match self {
            PolicyKind::Random => Box::new(RandomPolicy::new(seed)),
            PolicyKind::Zero => Box::new(ConstantPolicy::zero()),
        }
    }
}

/// Build and initialize every arena of `config`
pub fn build_registry<B, F>(
    config: &EnvConfig,
    policy: PolicyKind,
    mut backend: F,
) -> Result<ArenaRegistry<B>>
where
    B: PhysicsBackend,
    F: FnMut(&EnvConfig) -> B,
{
    ArenaRegistry::build(config, |id| {
        // Policy streams are offset from the arena streams
        let seed = config.arena.base_seed ^ 0x5eed_0000 ^ id.0 as u64;
        ArenaDeps::standard(config, id.0, backend(config), policy.build(seed))
    })
    .context("Failed to build arenas")
}

fn progress_style() -> Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("█▓░"))
}

/// Step every arena `steps` times
pub fn run<B>(registry: &mut ArenaRegistry<B>, steps: u64, show_progress: bool) -> Result<()>
where
    B: PhysicsBackend + Send,
{
    let pb = if show_progress {
        let pb = ProgressBar::new(steps);
        pb.set_style(progress_style()?);
        pb
    } else {
        ProgressBar::hidden()
    };

    for step in 0..steps {
        registry
            .controllers_mut()
            .par_iter_mut()
            .try_for_each(|arena| arena.step().map(|_| ()))
            .with_context(|| format!("Arena rollout failed at step {}", step + 1))?;

        pb.inc(1);
        if step % 100 == 0 {
            let completed: u64 = registry
                .controllers()
                .iter()
                .map(|arena| arena.stats().completed())
                .sum();
            pb.set_message(format!("{} episodes", completed));
        }
    }
    pb.finish_with_message("done");
    Ok(())
}

/// Statistics of one arena at the end of a run
#[derive(Debug, Clone, Serialize)]
pub struct ArenaSummary {
    pub arena: ArenaId,
    pub episodes_completed: u64,
    pub current_episode: u64,
    pub mean_return: Option<f32>,
    pub mean_length: Option<f32>,
    pub last_episode: Option<EpisodeRecord>,
}

/// Statistics of a whole run, written with `--summary`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub arena_count: usize,
    pub steps_per_arena: u64,
    pub episodes_completed: u64,
    /// Steps of completed episodes
    pub episode_steps: u64,
    pub mean_return: Option<f32>,
    pub mean_length: Option<f32>,
    pub terminations: BTreeMap<String, u64>,
    pub arenas: Vec<ArenaSummary>,
}

impl RunSummary {
    pub fn collect<B: PhysicsBackend>(registry: &ArenaRegistry<B>, steps_per_arena: u64) -> Self {
        let mut terminations = BTreeMap::new();
        let mut arenas = Vec::with_capacity(registry.len());
        let mut episodes_completed = 0;
        let mut episode_steps = 0;

        for controller in registry.controllers() {
            let stats = controller.stats();
            episodes_completed += stats.completed();
            episode_steps += stats.total_steps();
            for (kind, count) in stats.terminations() {
                *terminations.entry(kind.to_string()).or_default() += count;
            }
            arenas.push(ArenaSummary {
                arena: controller.id(),
                episodes_completed: stats.completed(),
                current_episode: controller.episode(),
                mean_return: stats.mean_return(),
                mean_length: stats.mean_length(),
                last_episode: stats.last().cloned(),
            });
        }

        let records: Vec<&EpisodeRecord> = registry
            .controllers()
            .iter()
            .flat_map(|c| c.stats().history())
            .collect();
        let (mean_return, mean_length) = if records.is_empty() {
            (None, None)
        } else {
            let n = records.len() as f32;
            (
                Some(records.iter().map(|r| r.total_reward).sum::<f32>() / n),
                Some(records.iter().map(|r| r.steps as f32).sum::<f32>() / n),
            )
        };

        Self {
            arena_count: registry.len(),
            steps_per_arena,
            episodes_completed,
            episode_steps,
            mean_return,
            mean_length,
            terminations,
            arenas,
        }
    }

    pub fn log(&self) {
        log::info!(
            "Run: {} arenas x {} steps, {} episodes completed",
            self.arena_count,
            self.steps_per_arena,
            self.episodes_completed
        );
        if let (Some(ret), Some(len)) = (self.mean_return, self.mean_length) {
            log::info!("Run: mean return {:.3}, mean length {:.1} steps", ret, len);
        }
        for (kind, count) in &self.terminations {
            log::info!("Run:   {}: {}", kind, count);
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).context("Failed to create summary directory")?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize summary")?;
        fs::write(path, json).context("Failed to write summary JSON")?;
        log::info!("Summary written: {}", path.display());
        Ok(())
    }
}
