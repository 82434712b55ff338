//! Random backend selection strategy

use std::sync::Arc;

use rand::seq::SliceRandom;

use super::BackendSelector;
use crate::ban::BanTable;
use crate::config::Backend;
use crate::error::{Result, ShuntError};

/// Selects a uniformly random backend among the non-quarantined entries.
/// Weights are not consulted.
pub struct RandomSelector {
    pool: Vec<Arc<Backend>>,
    bans: Arc<BanTable>,
}

impl RandomSelector {
    pub fn new(pool: Vec<Backend>, bans: Arc<BanTable>) -> Self {
        Self {
            pool: pool.into_iter().map(Arc::new).collect(),
            bans,
        }
    }
}

impl BackendSelector for RandomSelector {
    fn select(&self) -> Result<Arc<Backend>> {
        let candidates: Vec<&Arc<Backend>> = self
            .pool
            .iter()
            .filter(|backend| !self.bans.is_banned(&backend.url))
            .collect();

        let mut rng = rand::thread_rng();
        candidates
            .choose(&mut rng)
            .map(|backend| Arc::clone(backend))
            .ok_or(ShuntError::NoBackendAvailable)
    }

    fn pool_size(&self) -> usize {
        self.pool.len()
    }

    fn strategy_name(&self) -> &'static str {
        "random"
    }
}
