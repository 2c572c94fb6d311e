//! Orphan reclaim
//!
//! A job left in `running` past the orphan timeout is presumed to belong to a
//! crashed process and goes back to `pending` with its identity, priority and
//! attempt count intact.

use crate::error::Result;
use crate::state::AppState;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Orphan sweep
pub struct Sweeper;

impl Sweeper {
    /// Reclaim jobs whose claim is older than the configured timeout
    pub fn reclaim_orphans(state: &AppState, now: &DateTime<Utc>) -> Result<Vec<i64>> {
        let cutoff = *now - state.config.scheduler.orphan_timeout();
        let reclaimed = state.db.reclaim_orphans(&cutoff)?;

        if reclaimed.is_empty() {
            debug!("Orphan sweep: nothing to reclaim");
        } else {
            warn!(count = reclaimed.len(), jobs = ?reclaimed, "Reclaimed orphaned jobs");
        }
        Ok(reclaimed)
    }
}
