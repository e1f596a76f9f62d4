//! Scheduling core
//!
//! Decides when each persona behavior runs and executes it safely:
//! - Cadences (fixed intervals, cron expressions, macros)
//! - Scheduler Core (pure planning, tick, strategy adjustments)
//! - Task Runner (single-flight, timeouts, failure capture)
//! - Orchestrator (tick loop, dispatch, graceful shutdown)
//!
//! Scheduling follows a plan/commit split: `plan` is pure and `tick` applies it.

pub mod cadence;
pub mod orchestrator;
pub mod runner;
pub mod scheduler;
pub mod task;

pub use cadence::{Cadence, CadenceError, CronExpr, NextFire};
pub use orchestrator::{
    AnalysisTask, ContentTask, InteractionTask, Orchestrator, OrchestratorOptions,
    OrchestratorStatus, ShutdownHandle, TaskBehavior, TaskStatus,
};
pub use runner::{RunnerSnapshot, RunnerStats, TaskRunner};
pub use scheduler::{
    DueTask, DuplicatePolicy, SchedulerCore, SchedulerStats, StrategyAdjustment, TaskAdjustment,
    TickPlan,
};
pub use task::{FailureReason, Metric, Outcome, ScheduledTask, TaskExecution, TaskId};
