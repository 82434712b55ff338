//! Backend selection strategies
//!
//! This module provides the per-path strategies for choosing a backend from
//! the configured pool. Every strategy consults the shared quarantine table
//! and skips banned backends.

mod random;
mod round_robin;
mod weighted;

pub use random::RandomSelector;
pub use round_robin::RoundRobinSelector;
pub use weighted::WeightedSelector;

use std::sync::Arc;

use crate::ban::BanTable;
use crate::config::Backend;
use crate::error::Result;

/// Strategy tags accepted in endpoint configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    Weighted,
    Random,
}

impl Strategy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "round-robin" => Some(Self::RoundRobin),
            "weighted" => Some(Self::Weighted),
            "random" => Some(Self::Random),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::Weighted => "weighted",
            Self::Random => "random",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for backend selection strategies
///
/// Selection is pure computation over the pool and the quarantine table,
/// so implementations are synchronous. They must be safe under concurrent
/// calls; selection is a hint, not a reservation.
pub trait BackendSelector: Send + Sync {
    /// Select a backend from the pool, skipping quarantined entries
    ///
    /// Returns an error when no eligible backend remains
    fn select(&self) -> Result<Arc<Backend>>;

    /// Size of the configured pool, quarantined entries included
    fn pool_size(&self) -> usize;

    /// Get the strategy name
    fn strategy_name(&self) -> &'static str;
}

/// Create a selector for one path's pool
pub fn create_selector(
    strategy: Strategy,
    pool: Vec<Backend>,
    bans: Arc<BanTable>,
) -> Arc<dyn BackendSelector> {
    match strategy {
        Strategy::RoundRobin => Arc::new(RoundRobinSelector::new(pool, bans)),
        Strategy::Weighted => Arc::new(WeightedSelector::new(pool, bans)),
        Strategy::Random => Arc::new(RandomSelector::new(pool, bans)),
    }
}
