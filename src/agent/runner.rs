//! Task Runner
//!
//! Executes one behavior invocation and always produces a [`TaskExecution`]:
//! - Single-flight per task id via a per-task atomic marker
//! - Hard timeout, after which the behavior is abandoned (best-effort abort)
//! - Errors and panics are captured as `failure(reason)`, never propagated
//! - On shutdown, in-flight runs get a grace period before being abandoned
//!
//! Overlap skips are recorded too: they tell the analyzer a cadence is too tight.

use parking_lot::RwLock;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::task::{FailureReason, Metric, Outcome, TaskExecution, TaskId};
use crate::clock::Clock;
use crate::engagement::EngagementStore;

/// Runner statistics
#[derive(Debug, Default)]
pub struct RunnerStats {
    pub runs: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub overlaps: AtomicU64,
    pub abandoned: AtomicU64,
}

/// Point-in-time copy of [`RunnerStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerSnapshot {
    pub runs: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub overlaps: u64,
    pub abandoned: u64,
}

impl RunnerStats {
    pub fn snapshot(&self) -> RunnerSnapshot {
        RunnerSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            overlaps: self.overlaps.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Clears the in-flight marker when dropped
struct InFlightGuard {
    marker: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.marker.store(false, Ordering::Release);
    }
}

/// Executes behaviors with single-flight, timeout and failure capture
pub struct TaskRunner {
    store: Arc<dyn EngagementStore>,
    clock: Arc<dyn Clock>,
    markers: RwLock<HashMap<TaskId, Arc<AtomicBool>>>,
    shutdown: watch::Receiver<bool>,
    shutdown_grace: Duration,
    stats: RunnerStats,
}

impl TaskRunner {
    /// Create a runner that records into `store` and honours `shutdown`
    pub fn new(
        store: Arc<dyn EngagementStore>,
        clock: Arc<dyn Clock>,
        shutdown: watch::Receiver<bool>,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            markers: RwLock::new(HashMap::new()),
            shutdown,
            shutdown_grace,
            stats: RunnerStats::default(),
        }
    }

    /// Run `behavior` for `task_id`, bounded by `timeout`
    pub async fn run<F, Fut>(&self, task_id: &TaskId, behavior: F, timeout: Duration) -> TaskExecution
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Metric>> + Send + 'static,
    {
        let started_at = self.clock.now();

        let Some(guard) = self.try_claim(task_id) else {
            warn!("Task {} still running, skipping overlapping run", task_id);
            self.stats.overlaps.fetch_add(1, Ordering::Relaxed);
            let execution =
                TaskExecution::new(task_id.clone(), started_at, started_at, Outcome::SkippedOverlap);
            self.record(&execution);
            return execution;
        };

        self.stats.runs.fetch_add(1, Ordering::Relaxed);
        let outcome = if self.is_shutting_down() {
            Outcome::Failure {
                reason: FailureReason::Shutdown,
            }
        } else {
            debug!("Running task {} (timeout {:?})", task_id, timeout);
            self.execute(behavior, timeout).await
        };

        match &outcome {
            Outcome::Success { .. } => {
                self.stats.successes.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Failure { reason } => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                match reason {
                    FailureReason::Timeout => {
                        self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    FailureReason::Shutdown => {
                        self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
                    }
                    FailureReason::Behavior(_) => {}
                }
                warn!("Task {} failed: {}", task_id, reason);
            }
            Outcome::SkippedOverlap => {}
        }

        let execution = TaskExecution::new(task_id.clone(), started_at, self.clock.now(), outcome);
        self.record(&execution);
        // marker is released only once the record is written
        drop(guard);

        info!(
            "Task {} finished: {} in {}ms",
            task_id,
            execution.outcome.as_str(),
            execution.latency_ms()
        );
        execution
    }

    async fn execute<F, Fut>(&self, behavior: F, timeout: Duration) -> Outcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Metric>> + Send + 'static,
    {
        let mut handle = tokio::spawn(async move { behavior().await });

        let mut shutdown = self.shutdown.clone();
        let grace = self.shutdown_grace;
        let abandon_after_grace = async move {
            wait_for_shutdown(&mut shutdown).await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(Ok(metric)) => Outcome::Success { metric: Some(metric) },
                Ok(Err(e)) => Outcome::Failure {
                    reason: FailureReason::Behavior(format!("{:#}", e)),
                },
                Err(e) if e.is_panic() => Outcome::Failure {
                    reason: FailureReason::Behavior(panic_message(e.into_panic())),
                },
                Err(e) => Outcome::Failure {
                    reason: FailureReason::Behavior(e.to_string()),
                },
            },
            _ = tokio::time::sleep(timeout) => {
                handle.abort();
                Outcome::Failure { reason: FailureReason::Timeout }
            }
            _ = abandon_after_grace => {
                handle.abort();
                Outcome::Failure { reason: FailureReason::Shutdown }
            }
        }
    }

    fn record(&self, execution: &TaskExecution) {
        if let Err(e) = self.store.append(execution) {
            error!("Failed to record execution of {}: {}", execution.task_id, e);
        }
    }

    fn marker(&self, task_id: &TaskId) -> Arc<AtomicBool> {
        if let Some(marker) = self.markers.read().get(task_id) {
            return Arc::clone(marker);
        }
        let mut markers = self.markers.write();
        Arc::clone(
            markers
                .entry(task_id.clone())
                .or_insert_with(|| Arc::new(AtomicBool::new(false))),
        )
    }

    fn try_claim(&self, task_id: &TaskId) -> Option<InFlightGuard> {
        let marker = self.marker(task_id);
        marker
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { marker })
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Whether an invocation of `task_id` is running right now
    pub fn is_in_flight(&self, task_id: &TaskId) -> bool {
        self.markers
            .read()
            .get(task_id)
            .map(|m| m.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Number of tasks currently running
    pub fn in_flight_count(&self) -> usize {
        self.markers
            .read()
            .values()
            .filter(|m| m.load(Ordering::Acquire))
            .count()
    }

    pub fn stats(&self) -> &RunnerStats {
        &self.stats
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // sender gone: shutdown can no longer be requested
            std::future::pending::<()>().await;
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panic: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panic: {}", msg)
    } else {
        "panic: <non-string payload>".to_string()
    }
}
