//! Episode statistics

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::arena::ArenaId;
use crate::episode::Termination;

/// Outcome of one finished episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub arena: ArenaId,
    pub episode: u64,
    pub steps: u64,
    pub total_reward: f32,
    pub termination: Termination,
}

/// Bounded history of finished episodes plus running totals
#[derive(Debug, Clone)]
pub struct EpisodeStats {
    capacity: usize,
    history: VecDeque<EpisodeRecord>,
    completed: u64,
    total_steps: u64,
    terminations: BTreeMap<&'static str, u64>,
}

impl EpisodeStats {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            history: VecDeque::new(),
            completed: 0,
            total_steps: 0,
            terminations: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, record: EpisodeRecord) {
        self.completed += 1;
        self.total_steps += record.steps;
        *self.terminations.entry(record.termination.kind()).or_default() += 1;
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    /// Episodes finished so far, including those dropped from the history
    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn history(&self) -> impl Iterator<Item = &EpisodeRecord> {
        self.history.iter()
    }

    pub fn last(&self) -> Option<&EpisodeRecord> {
        self.history.back()
    }

    /// Count per termination kind over all finished episodes
    pub fn terminations(&self) -> &BTreeMap<&'static str, u64> {
        &self.terminations
    }

    /// Mean return over the kept history
    pub fn mean_return(&self) -> Option<f32> {
        if self.history.is_empty() {
            return None;
        }
        let sum: f32 = self.history.iter().map(|r| r.total_reward).sum();
        Some(sum / self.history.len() as f32)
    }

    /// Mean length in steps over the kept history
    pub fn mean_length(&self) -> Option<f32> {
        if self.history.is_empty() {
            return None;
        }
        let sum: u64 = self.history.iter().map(|r| r.steps).sum();
        Some(sum as f32 / self.history.len() as f32)
    }
}
