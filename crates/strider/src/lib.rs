//! Strider - headless runner for physics-driven locomotion arenas
//!
//! This crate implements:
//! - Layered configuration loading (defaults, RON file, environment, CLI)
//! - Parallel arena rollout with progress reporting
//! - Run summaries written as JSON

pub mod config;
pub mod runner;

// Re-export main types for convenience
pub use config::Overrides;
pub use runner::{ArenaSummary, PolicyKind, RunSummary};
