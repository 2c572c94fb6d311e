//! Background cadence loops
//!
//! Drives the periodic work when the process hosts its own scheduler:
//! - Scheduler tick every `run_interval_secs`
//! - Orphan sweep every `orphan_timeout_secs` (also runs at tick start)
//! - Latest-price view refresh every `view_refresh_interval_secs`
//!
//! An interval of zero disables that loop, leaving it to an external invoker
//! calling the API.

use super::sweeper::Sweeper;
use super::tick::Scheduler;
use crate::services::MarketDataService;
use crate::state::AppState;
use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Handles for the spawned loops; dropping does not stop them
pub struct CadenceHandle {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl CadenceHandle {
    /// Names of the loops that were started
    pub fn running(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    /// Abort every loop
    pub fn stop(self) {
        for (name, task) in self.tasks {
            task.abort();
            info!("Stopped {} loop", name);
        }
    }
}

/// Spawner for the periodic loops
pub struct Cadence;

impl Cadence {
    /// Spawn the configured loops on the current runtime
    pub fn start(state: AppState) -> CadenceHandle {
        let scheduler = &state.config.scheduler;
        let mut tasks = Vec::new();

        if scheduler.run_interval_secs > 0 {
            let period = Duration::from_secs(scheduler.run_interval_secs);
            tasks.push(("tick", Self::spawn_loop(state.clone(), period, run_tick)));
        }
        if scheduler.orphan_timeout_secs > 0 {
            let period = Duration::from_secs(scheduler.orphan_timeout_secs);
            tasks.push(("sweep", Self::spawn_loop(state.clone(), period, run_sweep)));
        }
        if scheduler.view_refresh_interval_secs > 0 {
            let period = Duration::from_secs(scheduler.view_refresh_interval_secs);
            tasks.push(("view refresh", Self::spawn_loop(state.clone(), period, run_refresh)));
        }

        for (name, _) in &tasks {
            info!("Started {} loop", name);
        }
        CadenceHandle { tasks }
    }

    fn spawn_loop<F, Fut>(state: AppState, period: Duration, step: F) -> JoinHandle<()>
    where
        F: Fn(AppState) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            // A slow tick must not be followed by a burst of catch-up ticks
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                step(state.clone()).await;
            }
        })
    }
}

async fn run_tick(state: AppState) {
    if let Err(e) = Scheduler::tick(&state).await {
        error!("Scheduler tick failed: {}", e);
    }
}

async fn run_sweep(state: AppState) {
    if let Err(e) = Sweeper::reclaim_orphans(&state, &Utc::now()) {
        error!("Orphan sweep failed: {}", e);
    }
}

async fn run_refresh(state: AppState) {
    if let Err(e) = MarketDataService::refresh_latest(&state) {
        error!("Latest-price view refresh failed: {}", e);
    }
}
