//! One cancellable periodic job per server over a bounded worker pool.
//!
//! The registry is the single owner of all running jobs and is mutated only
//! through `schedule` / `unschedule` / `reconfigure`. Jobs are mutually
//! exclusive with themselves (a server's tick runs inline in its own task)
//! and fully concurrent across servers, bounded by the shared pool. Ticks
//! that cannot get a worker within the grace window are dropped and
//! counted, never queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{poll, EngineContext};
use crate::alerts::ConnectivityWindow;
use crate::config::types::{ConfigError, ServerTarget};

struct JobHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct JobScheduler {
    ctx: Arc<EngineContext>,
    workers: Arc<Semaphore>,
    jobs: Mutex<HashMap<i64, JobHandle>>,
    dropped_ticks: Arc<AtomicU64>,
}

impl JobScheduler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let workers = Arc::new(Semaphore::new(ctx.settings.worker_pool_size));
        Self {
            ctx,
            workers,
            jobs: Mutex::new(HashMap::new()),
            dropped_ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a periodic job for this server, replacing any existing
    /// registration for the same id. Validation failures (unsupported
    /// vendor, bad curve, out-of-range interval) mean the job is never
    /// scheduled.
    pub async fn schedule(&self, server: ServerTarget) -> Result<(), ConfigError> {
        server.validate()?;
        let interval = server.poll_interval(&self.ctx.settings);
        let id = server.id;
        let name = server.name.clone();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run_job(
            Arc::clone(&self.ctx),
            Arc::clone(&self.workers),
            Arc::clone(&self.dropped_ticks),
            server,
            interval,
            cancel_rx,
        ));

        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.insert(
            id,
            JobHandle {
                cancel: cancel_tx,
                task,
            },
        ) {
            let _ = previous.cancel.send(true);
            debug!("Replaced running poll job for server {id}");
        }
        info!("Scheduled poll job for {name} every {interval}s");
        Ok(())
    }

    /// Swap a job's configuration in place. Replacement semantics: the old
    /// task stops at its next step boundary while the new one starts with a
    /// fresh tick, so at most one natural tick is disturbed.
    pub async fn reconfigure(&self, server: ServerTarget) -> Result<(), ConfigError> {
        self.schedule(server).await
    }

    /// Cancel a server's job. Idempotent; returns whether a job existed.
    /// The pending tick is abandoned immediately and an in-flight tick
    /// stops after its current BMC call returns, recording no JobRun.
    pub async fn unschedule(&self, server_id: i64) -> bool {
        let handle = self.jobs.lock().await.remove(&server_id);
        match handle {
            Some(handle) => {
                let _ = handle.cancel.send(true);
                info!("Unscheduled poll job for server {server_id}");
                true
            }
            None => false,
        }
    }

    /// Stop every job and wait for the tasks to wind down.
    pub async fn shutdown(&self) {
        let handles: Vec<(i64, JobHandle)> =
            self.jobs.lock().await.drain().collect();
        for (_, handle) in &handles {
            let _ = handle.cancel.send(true);
        }
        for (id, handle) in handles {
            if let Err(e) = handle.task.await {
                if !e.is_cancelled() {
                    error!("Poll job for server {id} ended abnormally: {e}");
                }
            }
        }
        info!("All poll jobs stopped");
    }

    /// Ticks dropped because no worker freed up within the grace window.
    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks.load(Ordering::Relaxed)
    }

    pub async fn active_jobs(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

async fn run_job(
    ctx: Arc<EngineContext>,
    workers: Arc<Semaphore>,
    dropped: Arc<AtomicU64>,
    server: ServerTarget,
    interval_secs: u64,
    mut cancel: watch::Receiver<bool>,
) {
    // Connectivity state is owned by this task alone.
    let mut window = ConnectivityWindow::default();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    // A slow BMC must not cause a burst of make-up ticks afterwards.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            _ = ticker.tick() => {}
        }
        if *cancel.borrow() {
            break;
        }

        let grace = Duration::from_millis(ctx.settings.worker_grace_ms);
        let permit =
            match tokio::time::timeout(grace, Arc::clone(&workers).acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => break,
                Err(_) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Dropped tick for {}: no worker available within {:?}",
                        server.name, grace
                    );
                    continue;
                }
            };

        let run = poll::run_tick(&ctx, &server, &mut window, &cancel).await;
        drop(permit);

        match run {
            Some(run) => debug!("Tick for {} finished: {:?}", server.name, run.status),
            None => {
                debug!("Tick for {} cancelled mid-flight", server.name);
                break;
            }
        }
    }
    debug!("Poll job for {} stopped", server.name);
}
