//! The reconciliation scheduler.
//!
//! Every service instance runs one of these; there is no leader election.
//! Correctness under N identical loops comes from the claim discipline in
//! the passes, so the scheduler's only jobs are cadence, failure isolation,
//! and a clean lifecycle: `stopped -> running -> stopped`, with a manual
//! trigger valid in either state.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use wallcat_core::config::ScheduleSettings;

use crate::reconciler::Reconciler;

struct RunningLoop {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Drives the reconciliation passes on their cadences.
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    settings: ScheduleSettings,
    running: Mutex<Option<RunningLoop>>,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, settings: ScheduleSettings) -> Self {
        Self {
            reconciler,
            settings,
            running: Mutex::new(None),
        }
    }

    /// Start the background loop. Idempotent: a second call while running
    /// is a no-op signaled by the `false` return.
    pub fn start(&self) -> bool {
        let mut guard = self.running.lock().expect("scheduler lock poisoned");
        if guard.is_some() {
            tracing::warn!("Reconciliation scheduler already running, start ignored");
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let reconciler = self.reconciler.clone();
        let settings = self.settings.clone();

        let handle = tokio::spawn(async move {
            tracing::info!(
                reconcile_interval = ?settings.reconcile_interval,
                orphan_sweep_interval = ?settings.orphan_sweep_interval,
                "Reconciliation scheduler started"
            );

            let mut reconcile_tick = tokio::time::interval(settings.reconcile_interval);
            let mut orphan_tick = tokio::time::interval(settings.orphan_sweep_interval);
            reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            orphan_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                    _ = reconcile_tick.tick() => {
                        reconciler.run_cycle().await;
                    }
                    _ = orphan_tick.tick() => {
                        reconciler.run_orphan_sweep().await;
                    }
                }
            }

            tracing::info!("Reconciliation scheduler stopped");
        });

        *guard = Some(RunningLoop {
            shutdown_tx,
            handle,
        });
        true
    }

    /// Stop the background loop. An in-flight cycle finishes before the
    /// loop exits; no cycle fires after this returns. Stopping a stopped
    /// scheduler is a no-op.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .expect("scheduler lock poisoned")
            .take();

        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown_tx.send(()).await;
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "Scheduler loop panicked during shutdown");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .expect("scheduler lock poisoned")
            .is_some()
    }

    /// Run all four passes once, synchronously, regardless of the
    /// scheduler's running state.
    ///
    /// The sweep always completes; the first pass error (if any) is
    /// surfaced to the caller afterwards for synchronous ops/test use.
    pub async fn trigger_now(&self) -> Result<()> {
        let mut first_error: Option<anyhow::Error> = None;
        let mut note = |result: Result<crate::reconciler::PassSummary>| {
            if let Err(e) = result {
                tracing::error!(error = %e, "Manually triggered pass failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        };

        note(self.reconciler.reconcile_stuck_uploads().await);
        note(self.reconciler.reconcile_missing_events().await);
        note(self.reconciler.reconcile_orphaned_intents().await);
        note(self.reconciler.reconcile_orphaned_blobs().await);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
