use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use strider::config::{self, Overrides};
use strider::runner::{self, PolicyKind, RunSummary};
use strider_core::EnvConfig;
use strider_creature::SimplePhysics;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (RON); `strider.ron` is used when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of arenas to run in parallel
    #[arg(long)]
    arenas: Option<usize>,

    /// Base seed; arena i uses seed + i
    #[arg(long)]
    seed: Option<u64>,

    /// Steps after which an episode ends (0 for no limit)
    #[arg(long)]
    max_steps: Option<u64>,

    /// Physics steps to run per arena
    #[arg(long, default_value = "1000")]
    steps: u64,

    /// Policy driving the creatures
    #[arg(long, value_enum, default_value = "random")]
    policy: PolicyKind,

    /// Use the rapier3d physics backend
    #[arg(long)]
    #[cfg(feature = "rapier")]
    rapier: bool,

    /// Write a JSON run summary to this path
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Hide the progress bar
    #[arg(long)]
    quiet: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let overrides = Overrides {
        arenas: args.arenas,
        seed: args.seed,
        max_steps: args.max_steps,
    };
    let config = config::load(args.config.as_deref(), &overrides)?;

    if args.print_config {
        println!("{}", config::to_ron(&config)?);
        return Ok(());
    }

    log::info!("Starting Strider");
    log::info!("  Arenas: {}", config.arena.count);
    log::info!("  Seed: {}", config.arena.base_seed);
    log::info!("  Steps: {}", args.steps);
    log::info!("  Policy: {:?}", args.policy);

    #[cfg(feature = "rapier")]
    if args.rapier {
        log::info!("  Backend: rapier3d");
        let registry = runner::build_registry(&config, args.policy, |c: &EnvConfig| {
            strider_creature::physics::RapierPhysics::new(c.physics.gravity)
        })?;
        return rollout(registry, &args);
    }

    log::info!("  Backend: simple");
    let registry = runner::build_registry(&config, args.policy, |c: &EnvConfig| {
        SimplePhysics::new(c.physics.clone())
    })?;
    rollout(registry, &args)
}

fn rollout<B>(mut registry: strider_core::ArenaRegistry<B>, args: &Args) -> Result<()>
where
    B: strider_creature::PhysicsBackend + Send,
{
    runner::run(&mut registry, args.steps, !args.quiet)?;

    let summary = RunSummary::collect(&registry, args.steps);
    summary.log();
    if let Some(path) = &args.summary {
        summary.write(path)?;
    }
    Ok(())
}
