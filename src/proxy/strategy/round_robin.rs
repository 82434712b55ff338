//! Round-robin backend selection strategy

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::BackendSelector;
use crate::ban::BanTable;
use crate::config::Backend;
use crate::error::{Result, ShuntError};

/// Selects backends in pool order with an atomic cursor
///
/// The cursor advances on every attempt, including attempts that skip a
/// quarantined backend, so the next request resumes past the skipped
/// positions instead of hot-spotting the first healthy entry. Wraparound
/// is benign: the index is taken modulo the pool size.
pub struct RoundRobinSelector {
    pool: Vec<Arc<Backend>>,
    cursor: AtomicU32,
    bans: Arc<BanTable>,
}

impl RoundRobinSelector {
    pub fn new(pool: Vec<Backend>, bans: Arc<BanTable>) -> Self {
        Self {
            pool: pool.into_iter().map(Arc::new).collect(),
            cursor: AtomicU32::new(0),
            bans,
        }
    }
}

impl BackendSelector for RoundRobinSelector {
    fn select(&self) -> Result<Arc<Backend>> {
        let len = self.pool.len();
        if len == 0 {
            return Err(ShuntError::NoBackendAvailable);
        }

        // At most one full lap; fetch_add wraps at u32::MAX.
        for _ in 0..len {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) as usize % len;
            let backend = &self.pool[idx];
            if !self.bans.is_banned(&backend.url) {
                return Ok(Arc::clone(backend));
            }
        }

        Err(ShuntError::NoBackendAvailable)
    }

    fn pool_size(&self) -> usize {
        self.pool.len()
    }

    fn strategy_name(&self) -> &'static str {
        "round-robin"
    }
}
