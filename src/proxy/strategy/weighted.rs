//! Weighted random backend selection strategy

use std::sync::Arc;

use rand::Rng;

use super::BackendSelector;
use crate::ban::BanTable;
use crate::config::Backend;
use crate::error::{Result, ShuntError};

/// Selects backends with probability proportional to their weight
///
/// Zero-weight entries never participate, quarantined or not. The draw is
/// taken from the thread-local generator, so concurrent callers need no
/// shared lock.
pub struct WeightedSelector {
    pool: Vec<Arc<Backend>>,
    bans: Arc<BanTable>,
}

impl WeightedSelector {
    pub fn new(pool: Vec<Backend>, bans: Arc<BanTable>) -> Self {
        Self {
            pool: pool.into_iter().map(Arc::new).collect(),
            bans,
        }
    }
}

impl BackendSelector for WeightedSelector {
    fn select(&self) -> Result<Arc<Backend>> {
        let mut candidates: Vec<&Arc<Backend>> = Vec::with_capacity(self.pool.len());
        let mut total: u64 = 0;

        for backend in &self.pool {
            if backend.weight == 0 || self.bans.is_banned(&backend.url) {
                continue;
            }
            candidates.push(backend);
            total += u64::from(backend.weight);
        }

        if candidates.is_empty() || total == 0 {
            return Err(ShuntError::NoBackendAvailable);
        }

        // Draw in [1, total]; the >= test below always lands on a candidate.
        let target = rand::thread_rng().gen_range(1..=total);
        let mut cumulative: u64 = 0;
        for backend in candidates {
            cumulative += u64::from(backend.weight);
            if cumulative >= target {
                return Ok(Arc::clone(backend));
            }
        }

        Err(ShuntError::NoBackendAvailable)
    }

    fn pool_size(&self) -> usize {
        self.pool.len()
    }

    fn strategy_name(&self) -> &'static str {
        "weighted"
    }
}
