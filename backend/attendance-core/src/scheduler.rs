// src/scheduler.rs
//! Periodic drivers for the pollers.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// In-progress flag for one periodic task.
#[derive(Clone, Default)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

/// Held for the duration of a cycle; dropping it releases the guard.
pub struct RunPermit {
    running: Arc<AtomicBool>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another cycle still holds the permit.
    pub fn try_start(&self) -> Option<RunPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                running: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Runs `task` every `every`, starting immediately. A tick that arrives while
/// the previous cycle is still running is skipped, not queued. Never returns.
pub async fn run_periodic<F, Fut>(name: &'static str, every: Duration, task: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    info!("Starting {} poller every {:?}", name, every);
    let guard = RunGuard::new();
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(permit) = guard.try_start() else {
            warn!("{} cycle still running, skipping this tick", name);
            continue;
        };
        debug!("{} cycle starting", name);
        let cycle = task();
        tokio::spawn(async move {
            let _permit = permit;
            cycle.await;
        });
    }
}
