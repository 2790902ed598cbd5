//! Polling loop
//!
//! Periodically walks the active, scheduled rules and executes every rule
//! whose schedule gate says it is due.

use chrono::{DateTime, Utc};
use crm_automation::SharedRuleStore;
use crm_core::{Context, SharedClock};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::orchestrator::{ExecutionSummary, Orchestrator};
use crate::{EngineResult, ScheduleZone};

/// Outcome of one poll
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
    /// Active rules with a schedule
    pub checked: usize,

    /// Rules whose schedule gate fired and still held under the rule lock
    pub fired: usize,

    /// Fired rules that failed
    pub failed: usize,

    /// True when another poll was still running and this one did nothing
    pub overlapped: bool,

    pub summaries: Vec<ExecutionSummary>,
}

/// Clears the in-progress flag when a poll ends or is cancelled
struct PollGuard<'a>(&'a AtomicBool);

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Scheduled rule poller
pub struct Poller {
    rules: SharedRuleStore,
    orchestrator: Arc<Orchestrator>,
    clock: SharedClock,
    zone: ScheduleZone,
    /// Bounds concurrent rule executions within a poll
    workers: Arc<Semaphore>,
    /// Set while a poll is in progress
    polling: AtomicBool,
    /// Running flag for the background loop
    running: Arc<AtomicBool>,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    /// Create a new poller
    pub fn new(
        rules: SharedRuleStore,
        orchestrator: Arc<Orchestrator>,
        clock: SharedClock,
        zone: ScheduleZone,
        max_concurrent_rules: usize,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            rules,
            orchestrator,
            clock,
            zone,
            workers: Arc::new(Semaphore::new(max_concurrent_rules.max(1))),
            polling: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Poll once at the clock's current time
    pub async fn poll_once(&self) -> EngineResult<PollReport> {
        self.poll_at(self.clock.now()).await
    }

    /// Poll once as if the time were `now`
    pub async fn poll_at(&self, now: DateTime<Utc>) -> EngineResult<PollReport> {
        if self.polling.swap(true, Ordering::SeqCst) {
            warn!("Previous poll still running, skipping");
            return Ok(PollReport {
                overlapped: true,
                ..Default::default()
            });
        }

        let _guard = PollGuard(&self.polling);
        self.poll_rules(now).await
    }

    async fn poll_rules(&self, now: DateTime<Utc>) -> EngineResult<PollReport> {
        let rules: Vec<_> = self
            .rules
            .list()
            .await?
            .into_iter()
            .filter(|r| r.is_pollable())
            .collect();

        let due: Vec<_> = rules
            .iter()
            .filter(|rule| {
                let fire = rule
                    .schedule
                    .as_ref()
                    .is_some_and(|s| self.zone.should_fire(s, rule.last_executed_at, now));
                debug!(rule_id = %rule.id, schedule = ?rule.schedule, fire, "Schedule gate");
                fire
            })
            .collect();

        let mut report = PollReport {
            checked: rules.len(),
            ..Default::default()
        };

        let runs = due.iter().map(|rule| {
            let workers = self.workers.clone();
            let orchestrator = self.orchestrator.clone();
            let zone = self.zone;
            async move {
                let _permit = workers.acquire_owned().await.ok();
                let outcome = orchestrator
                    .execute_scheduled(&rule.id, &zone, now, Context::scheduled())
                    .await;
                (rule.id.clone(), outcome)
            }
        });

        for (rule_id, outcome) in join_all(runs).await {
            match outcome {
                Ok(Some(summary)) => {
                    report.fired += 1;
                    if !summary.success {
                        report.failed += 1;
                    }
                    report.summaries.push(summary);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(rule_id = %rule_id, error = %e, "Scheduled execution failed");
                    report.fired += 1;
                    report.failed += 1;
                }
            }
        }

        debug!(
            checked = report.checked,
            fired = report.fired,
            failed = report.failed,
            "Poll complete"
        );
        Ok(report)
    }

    /// Start the background loop
    pub fn start(self: &Arc<Self>, interval: Duration) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Automation poller already running");
            return;
        }

        info!(interval_secs = interval.as_secs(), "Starting automation poller");

        let poller = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = poller.poll_once().await {
                            error!(error = %e, "Poll failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Received shutdown signal");
                        break;
                    }
                }
            }

            poller.running.store(false, Ordering::SeqCst);
            info!("Automation poller stopped");
        });

        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Stop the background loop, waiting for an in-flight poll to finish
    pub async fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        info!("Stopping automation poller");
        let _ = self.shutdown_tx.send(());

        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Poller task ended abnormally");
            }
        }
    }

    /// Check if the background loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
