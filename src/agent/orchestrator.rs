//! Orchestrator
//!
//! Owns the scheduler and drives the tick loop:
//! - Drains pending strategy adjustments before each planning pass
//! - Dispatches due tasks concurrently, gated by weight and daily caps
//! - Reaps finished runs and drains in-flight work on shutdown
//!
//! The scheduler is only ever touched from the loop, so decisions are
//! serialized while behaviors run in parallel.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::runner::{RunnerSnapshot, TaskRunner};
use super::scheduler::{DuplicatePolicy, SchedulerCore, StrategyAdjustment};
use super::task::{Metric, ScheduledTask, TaskExecution, TaskId};
use crate::autonomous::{AnalyzerStats, EngagementAnalyzer};
use crate::behaviors::{ContentBehavior, InteractionBehavior};
use crate::clock::Clock;
use crate::config::TaskSettings;
use crate::engagement::EngagementStore;
use crate::error::OrchestratorError;

/// A recurring unit of work the orchestrator can dispatch
#[async_trait]
pub trait TaskBehavior: Send + Sync {
    async fn execute(&self) -> anyhow::Result<Metric>;
}

/// Dispatches the interaction check
pub struct InteractionTask(pub Arc<dyn InteractionBehavior>);

#[async_trait]
impl TaskBehavior for InteractionTask {
    async fn execute(&self) -> anyhow::Result<Metric> {
        self.0.monitor_and_respond().await
    }
}

/// Dispatches content generation
pub struct ContentTask(pub Arc<dyn ContentBehavior>);

#[async_trait]
impl TaskBehavior for ContentTask {
    async fn execute(&self) -> anyhow::Result<Metric> {
        self.0.generate_and_post().await
    }
}

/// Runs the analyzer and hands its adjustment back to the loop
pub struct AnalysisTask {
    analyzer: Arc<EngagementAnalyzer>,
    store: Arc<dyn EngagementStore>,
    clock: Arc<dyn Clock>,
    tasks: watch::Receiver<Vec<ScheduledTask>>,
    adjustments: mpsc::UnboundedSender<StrategyAdjustment>,
}

#[async_trait]
impl TaskBehavior for AnalysisTask {
    async fn execute(&self) -> anyhow::Result<Metric> {
        let tasks = self.tasks.borrow().clone();
        let adjustment = self
            .analyzer
            .collect(self.store.as_ref(), &tasks, self.clock.now())
            .context("Failed to read engagement window")?;

        let count = adjustment.len();
        if count > 0 {
            self.adjustments
                .send(adjustment)
                .map_err(|_| anyhow::anyhow!("orchestrator is no longer accepting adjustments"))?;
        }
        Ok(Metric::adjustments(count))
    }
}

struct TaskSlot {
    behavior: Arc<dyn TaskBehavior>,
    timeout: Duration,
    max_daily_runs: Option<u32>,
}

/// Loop-level options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Planning pass interval
    pub tick_interval: Duration,
    /// How long in-flight runs may continue after shutdown
    pub shutdown_grace: Duration,
    pub duplicate_policy: DuplicatePolicy,
    /// Fixed seed for weight gating, for reproducible runs
    pub rng_seed: Option<u64>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(30),
            duplicate_policy: DuplicatePolicy::default(),
            rng_seed: None,
        }
    }
}

/// Signals the orchestrator to stop
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }
}

/// Monitoring view of one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub id: TaskId,
    pub cadence: String,
    pub enabled: bool,
    pub weight: f64,
    /// `None` when due on the next tick
    pub next_fire: Option<DateTime<Utc>>,
    pub in_flight: bool,
}

/// Monitoring view of the orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub tasks: Vec<TaskStatus>,
    pub in_flight: usize,
    pub shutting_down: bool,
    pub ticks: u64,
    pub fired: u64,
    pub runner: RunnerSnapshot,
    /// Present once an analysis task is registered
    pub analyzer: Option<AnalyzerStats>,
}

/// Wires scheduler, runner, behaviors and store together
pub struct Orchestrator {
    scheduler: SchedulerCore,
    runner: Arc<TaskRunner>,
    slots: HashMap<TaskId, TaskSlot>,
    store: Arc<dyn EngagementStore>,
    clock: Arc<dyn Clock>,
    adjust_tx: mpsc::UnboundedSender<StrategyAdjustment>,
    adjust_rx: mpsc::UnboundedReceiver<StrategyAdjustment>,
    tasks_tx: watch::Sender<Vec<ScheduledTask>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    in_flight: JoinSet<TaskExecution>,
    rng: StdRng,
    tick_interval: Duration,
    analyzer: Option<Arc<EngagementAnalyzer>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn EngagementStore>,
        clock: Arc<dyn Clock>,
        options: OrchestratorOptions,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (adjust_tx, adjust_rx) = mpsc::unbounded_channel();
        let (tasks_tx, _) = watch::channel(Vec::new());
        let runner = TaskRunner::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            shutdown_rx,
            options.shutdown_grace,
        );
        let rng = match options.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            scheduler: SchedulerCore::with_policy(options.duplicate_policy),
            runner: Arc::new(runner),
            slots: HashMap::new(),
            store,
            clock,
            adjust_tx,
            adjust_rx,
            tasks_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            in_flight: JoinSet::new(),
            rng,
            tick_interval: options.tick_interval,
            analyzer: None,
        }
    }

    /// Register a task with its behavior and timeout
    pub fn register(
        &mut self,
        task: ScheduledTask,
        timeout: Duration,
        behavior: Arc<dyn TaskBehavior>,
    ) -> Result<(), OrchestratorError> {
        self.register_slot(
            task,
            TaskSlot {
                behavior,
                timeout,
                max_daily_runs: None,
            },
        )
    }

    /// Register `id` using configured settings
    pub fn register_with(
        &mut self,
        id: TaskId,
        settings: &TaskSettings,
        behavior: Arc<dyn TaskBehavior>,
    ) -> Result<(), OrchestratorError> {
        self.register_slot(
            settings.scheduled(id),
            TaskSlot {
                behavior,
                timeout: settings.timeout,
                max_daily_runs: settings.max_daily_runs,
            },
        )
    }

    pub fn register_interaction(
        &mut self,
        settings: &TaskSettings,
        behavior: Arc<dyn InteractionBehavior>,
    ) -> Result<(), OrchestratorError> {
        self.register_with(
            TaskId::InteractionCheck,
            settings,
            Arc::new(InteractionTask(behavior)),
        )
    }

    pub fn register_content(
        &mut self,
        settings: &TaskSettings,
        behavior: Arc<dyn ContentBehavior>,
    ) -> Result<(), OrchestratorError> {
        self.register_with(
            TaskId::ContentGeneration,
            settings,
            Arc::new(ContentTask(behavior)),
        )
    }

    /// Register the engagement analysis task, fed by this orchestrator's store
    pub fn register_analysis(
        &mut self,
        settings: &TaskSettings,
        analyzer: Arc<EngagementAnalyzer>,
    ) -> Result<(), OrchestratorError> {
        let behavior = AnalysisTask {
            analyzer: Arc::clone(&analyzer),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            tasks: self.tasks_tx.subscribe(),
            adjustments: self.adjust_tx.clone(),
        };
        self.register_with(TaskId::EngagementAnalysis, settings, Arc::new(behavior))?;
        self.analyzer = Some(analyzer);
        Ok(())
    }

    fn register_slot(&mut self, task: ScheduledTask, slot: TaskSlot) -> Result<(), OrchestratorError> {
        let id = task.id.clone();
        self.scheduler.register_task(task, self.clock.now())?;
        self.slots.insert(id, slot);
        self.publish_tasks();
        Ok(())
    }

    /// Remove a task; runs already in flight finish normally
    pub fn unregister(&mut self, id: &TaskId) -> Result<ScheduledTask, OrchestratorError> {
        let task = self
            .scheduler
            .unregister(id)
            .ok_or_else(|| OrchestratorError::UnknownTask(id.clone()))?;
        self.slots.remove(id);
        self.publish_tasks();
        Ok(task)
    }

    /// Queue an adjustment for the next planning pass
    pub fn adjustment_sender(&self) -> mpsc::UnboundedSender<StrategyAdjustment> {
        self.adjust_tx.clone()
    }

    /// Latest task definitions, updated after every planning pass
    pub fn subscribe_tasks(&self) -> watch::Receiver<Vec<ScheduledTask>> {
        self.tasks_tx.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    pub fn scheduler(&self) -> &SchedulerCore {
        &self.scheduler
    }

    pub fn runner(&self) -> &Arc<TaskRunner> {
        &self.runner
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn publish_tasks(&self) {
        self.tasks_tx.send_replace(self.scheduler.tasks());
    }

    /// One planning pass. Returns the ids dispatched.
    pub fn tick_once(&mut self) -> Vec<TaskId> {
        if self.is_shutting_down() {
            return Vec::new();
        }

        while let Ok(adjustment) = self.adjust_rx.try_recv() {
            let applied = self.scheduler.apply_adjustment(adjustment);
            debug!("Applied adjustment to {} tasks", applied);
        }

        let now = self.clock.now();
        let due = self.scheduler.tick(now);
        self.publish_tasks();

        let mut dispatched = Vec::new();
        for task in due {
            let Some(slot) = self.slots.get(&task.id) else {
                warn!("Task {} is due but has no behavior", task.id);
                continue;
            };

            if task.weight < 1.0 && self.rng.gen::<f64>() >= task.weight {
                debug!("Task {} skipped by weight {:.2}", task.id, task.weight);
                continue;
            }

            if let Some(cap) = slot.max_daily_runs {
                match self.store.count_successes_since(&task.id, start_of_day(now)) {
                    Ok(done) if done >= cap as usize => {
                        info!("Task {} reached its daily cap of {}", task.id, cap);
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Daily cap check for {} failed: {}", task.id, e),
                }
            }

            let runner = Arc::clone(&self.runner);
            let behavior = Arc::clone(&slot.behavior);
            let timeout = slot.timeout;
            let id = task.id.clone();
            self.in_flight.spawn(async move {
                runner
                    .run(&id, move || async move { behavior.execute().await }, timeout)
                    .await
            });
            dispatched.push(task.id);
        }

        dispatched
    }

    /// Tick until shutdown, then drain in-flight runs
    pub async fn run(&mut self) {
        info!(
            "Orchestrator started with {} tasks (tick every {:?})",
            self.scheduler.len(),
            self.tick_interval
        );
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            if self.is_shutting_down() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let dispatched = self.tick_once();
                    if !dispatched.is_empty() {
                        debug!("Dispatched {:?}", dispatched);
                    }
                }
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    reap(joined);
                }
                _ = shutdown.changed() => {}
            }
        }

        info!("Orchestrator shutting down, {} runs in flight", self.in_flight.len());
        let drained = self.drain().await;
        info!("Orchestrator stopped ({} runs drained)", drained.len());
    }

    /// Wait for every in-flight run to produce its record
    pub async fn drain(&mut self) -> Vec<TaskExecution> {
        let mut finished = Vec::new();
        while let Some(joined) = self.in_flight.join_next().await {
            if let Some(execution) = reap(joined) {
                finished.push(execution);
            }
        }
        finished
    }

    pub fn status(&self) -> OrchestratorStatus {
        let stats = self.scheduler.stats();
        let tasks = self
            .scheduler
            .tasks()
            .into_iter()
            .map(|task| TaskStatus {
                next_fire: self.scheduler.next_fire(&task.id).flatten(),
                in_flight: self.runner.is_in_flight(&task.id),
                cadence: task.cadence.to_string(),
                enabled: task.enabled,
                weight: task.weight,
                id: task.id,
            })
            .collect();

        OrchestratorStatus {
            tasks,
            in_flight: self.runner.in_flight_count(),
            shutting_down: self.is_shutting_down(),
            ticks: stats.ticks,
            fired: stats.fired,
            runner: self.runner.stats().snapshot(),
            analyzer: self.analyzer.as_ref().map(|a| a.stats()),
        }
    }
}

fn reap(joined: Result<TaskExecution, JoinError>) -> Option<TaskExecution> {
    match joined {
        Ok(execution) => {
            debug!("Task {} run {} reaped", execution.task_id, execution.id);
            Some(execution)
        }
        Err(e) => {
            error!("Dispatch task failed: {}", e);
            None
        }
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Cadence, Outcome, TaskAdjustment};
    use crate::clock::ManualClock;
    use crate::engagement::MemoryEngagementStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl TaskBehavior for Counting {
        async fn execute(&self) -> anyhow::Result<Metric> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Metric::posts(1))
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn setup() -> (Orchestrator, Arc<ManualClock>, Arc<MemoryEngagementStore>) {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(MemoryEngagementStore::new());
        let orch = Orchestrator::new(
            store.clone(),
            clock.clone(),
            OrchestratorOptions {
                rng_seed: Some(7),
                ..Default::default()
            },
        );
        (orch, clock, store)
    }

    fn every_minute(id: TaskId) -> ScheduledTask {
        ScheduledTask::new(id, Cadence::every(chrono::Duration::minutes(1)))
    }

    #[tokio::test]
    async fn test_due_task_dispatched_and_recorded() {
        let (mut orch, clock, store) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        orch.register(
            every_minute(TaskId::ContentGeneration),
            Duration::from_secs(5),
            Arc::new(Counting(calls.clone())),
        )
        .unwrap();

        assert!(orch.tick_once().is_empty());
        clock.advance(chrono::Duration::minutes(1));
        assert_eq!(orch.tick_once(), vec![TaskId::ContentGeneration]);

        let done = orch.drain().await;
        assert_eq!(done.len(), 1);
        assert!(done[0].outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_zero_weight_never_dispatched() {
        let (mut orch, clock, _store) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        orch.register(
            every_minute(TaskId::ContentGeneration).with_weight(0.0),
            Duration::from_secs(5),
            Arc::new(Counting(calls.clone())),
        )
        .unwrap();

        for _ in 0..20 {
            clock.advance(chrono::Duration::minutes(1));
            assert!(orch.tick_once().is_empty());
        }
        orch.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_weight_dispatches_some() {
        let (mut orch, clock, _store) = setup();
        orch.register(
            every_minute(TaskId::ContentGeneration).with_weight(0.5),
            Duration::from_secs(5),
            Arc::new(Counting(Arc::new(AtomicUsize::new(0)))),
        )
        .unwrap();

        let mut fired = 0;
        for _ in 0..200 {
            clock.advance(chrono::Duration::minutes(1));
            fired += orch.tick_once().len();
            orch.drain().await;
        }
        assert!(fired > 50 && fired < 150, "fired {}", fired);
    }

    #[tokio::test]
    async fn test_daily_cap_stops_dispatch() {
        let (mut orch, clock, store) = setup();
        let settings = TaskSettings::new(Cadence::every(chrono::Duration::minutes(1)))
            .with_timeout(Duration::from_secs(5))
            .with_max_daily_runs(Some(2));
        orch.register_with(
            TaskId::ContentGeneration,
            &settings,
            Arc::new(Counting(Arc::new(AtomicUsize::new(0)))),
        )
        .unwrap();

        let mut fired = 0;
        for _ in 0..5 {
            clock.advance(chrono::Duration::minutes(1));
            fired += orch.tick_once().len();
            orch.drain().await;
        }
        assert_eq!(fired, 2);
        assert_eq!(store.len().unwrap(), 2);

        // a new UTC day resets the cap
        clock.set(Utc.with_ymd_and_hms(2024, 3, 2, 0, 30, 0).unwrap());
        assert_eq!(orch.tick_once(), vec![TaskId::ContentGeneration]);
        orch.drain().await;
    }

    #[tokio::test]
    async fn test_adjustment_applied_on_next_tick() {
        let (mut orch, clock, _store) = setup();
        orch.register(
            every_minute(TaskId::InteractionCheck),
            Duration::from_secs(5),
            Arc::new(Counting(Arc::new(AtomicUsize::new(0)))),
        )
        .unwrap();

        let mut adjustment = StrategyAdjustment::new(clock.now());
        adjustment.insert(
            TaskId::InteractionCheck,
            TaskAdjustment {
                enabled: Some(false),
                ..Default::default()
            },
        );
        orch.adjustment_sender().send(adjustment).unwrap();
        assert!(orch.scheduler().task(&TaskId::InteractionCheck).unwrap().enabled);

        clock.advance(chrono::Duration::minutes(1));
        assert!(orch.tick_once().is_empty());
        assert!(!orch.scheduler().task(&TaskId::InteractionCheck).unwrap().enabled);

        let published = orch.subscribe_tasks().borrow().clone();
        assert!(!published[0].enabled);
    }

    #[tokio::test]
    async fn test_shutdown_stops_dispatch() {
        let (mut orch, clock, store) = setup();
        orch.register(
            every_minute(TaskId::ContentGeneration),
            Duration::from_secs(5),
            Arc::new(Counting(Arc::new(AtomicUsize::new(0)))),
        )
        .unwrap();

        let handle = orch.shutdown_handle();
        handle.shutdown();
        assert!(handle.is_shutdown());

        clock.advance(chrono::Duration::minutes(5));
        assert!(orch.tick_once().is_empty());
        orch.run().await;
        assert_eq!(store.len().unwrap(), 0);
        assert!(orch.status().shutting_down);
    }

    #[tokio::test]
    async fn test_status_reports_tasks() {
        let (mut orch, _clock, _store) = setup();
        orch.register(
            every_minute(TaskId::InteractionCheck).with_weight(0.4),
            Duration::from_secs(5),
            Arc::new(Counting(Arc::new(AtomicUsize::new(0)))),
        )
        .unwrap();

        let status = orch.status();
        assert_eq!(status.tasks.len(), 1);
        let task = &status.tasks[0];
        assert_eq!(task.id, TaskId::InteractionCheck);
        assert_eq!(task.cadence, "every 1 minutes");
        assert_eq!(task.weight, 0.4);
        assert_eq!(task.next_fire, Some(start() + chrono::Duration::minutes(1)));
        assert!(!task.in_flight);
        assert_eq!(status.runner, RunnerSnapshot::default());
        assert!(status.analyzer.is_none());
    }

    #[tokio::test]
    async fn test_unregister_unknown_task() {
        let (mut orch, _clock, _store) = setup();
        let err = orch.unregister(&TaskId::ContentGeneration).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTask(_)));
    }

    #[tokio::test]
    async fn test_analysis_task_feeds_adjustments() {
        let (mut orch, clock, store) = setup();
        let analysis = TaskSettings::new(Cadence::every(chrono::Duration::hours(1)));
        orch.register_analysis(&analysis, Arc::new(EngagementAnalyzer::new()))
            .unwrap();

        for i in 0..8 {
            let at = start() - chrono::Duration::minutes(30) + chrono::Duration::minutes(i);
            let outcome = Outcome::Failure {
                reason: crate::agent::FailureReason::Behavior("timeout from api".into()),
            };
            store
                .append(&TaskExecution::new(TaskId::ContentGeneration, at, at, outcome))
                .unwrap();
        }

        clock.advance(chrono::Duration::hours(1));
        orch.register(
            every_minute(TaskId::ContentGeneration).with_weight(0.8),
            Duration::from_secs(5),
            Arc::new(Counting(Arc::new(AtomicUsize::new(0)))),
        )
        .unwrap();

        // content was registered just now, so only the analysis is due
        assert_eq!(orch.tick_once(), vec![TaskId::EngagementAnalysis]);
        let done = orch.drain().await;
        assert_eq!(done[0].outcome.metric(), Some(&Metric::adjustments(1)));

        orch.tick_once();
        let task = orch.scheduler().task(&TaskId::ContentGeneration).unwrap();
        assert!(!task.enabled);

        let status = orch.status();
        assert_eq!(status.runner.runs, 1);
        assert_eq!(status.runner.successes, 1);
        let analyzer = status.analyzer.unwrap();
        assert_eq!(analyzer.cycles, 1);
        assert_eq!(analyzer.suspended, 1);
    }
}
