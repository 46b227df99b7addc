//! Background jobs.
//!
//! A single-instance scheduler drives the periodic sweeps: expiration
//! handling, reminder dispatch and retention cleanup. Every job processes a
//! bounded chunk per tick and is idempotent, so a missed or repeated tick is
//! harmless. Closure recalculation is event-driven and lives on the leave
//! service; the config layer calls it when a closure changes.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::approvals::ApprovalService;

/// Max items a sweep touches per tick.
const CHUNK_SIZE: usize = 100;

/// Default retention for resolved approval requests, in days.
const RETENTION_DAYS: i64 = 730;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub expiration_interval: Duration,
    pub reminder_interval: Duration,
    pub cleanup_interval: Duration,
    pub retention_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            expiration_interval: Duration::from_secs(15 * 60),
            reminder_interval: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(7 * 24 * 60 * 60),
            retention_days: RETENTION_DAYS,
        }
    }
}

/// Supervises the periodic sweeps. Inject it where needed; it is the only
/// process-wide singleton.
pub struct Scheduler {
    approvals: Arc<ApprovalService>,
    config: SchedulerConfig,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(approvals: Arc<ApprovalService>, config: SchedulerConfig) -> Self {
        Self {
            approvals,
            config,
            handles: Vec::new(),
        }
    }

    /// Spawns the periodic tasks. The first tick fires after one full
    /// interval, not at startup.
    pub fn start(&mut self) {
        let approvals = self.approvals.clone();
        let interval = self.config.expiration_interval;
        self.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let processed = approvals.run_expiration_sweep(CHUNK_SIZE).await;
                if processed > 0 {
                    info!(processed, "expiration sweep done");
                } else {
                    debug!("expiration sweep: nothing due");
                }
            }
        }));

        let approvals = self.approvals.clone();
        let interval = self.config.reminder_interval;
        self.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let sent = approvals.run_reminder_sweep(CHUNK_SIZE).await;
                if sent > 0 {
                    info!(sent, "reminders dispatched");
                } else {
                    debug!("reminder sweep: nothing due");
                }
            }
        }));

        let approvals = self.approvals.clone();
        let interval = self.config.cleanup_interval;
        let retention_days = self.config.retention_days;
        self.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = approvals.cleanup_old_requests(retention_days);
                if purged > 0 {
                    info!(purged, "retention cleanup done");
                }
            }
        }));

        info!("scheduler started");
    }

    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
