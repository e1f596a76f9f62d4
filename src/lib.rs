//! Persona Orchestrator
//!
//! Scheduling and engagement feedback engine for autonomous social personas.
//!
//! # Features
//!
//! - **Cadences**: fixed intervals, five-field cron expressions and `@daily`-style macros
//! - **Scheduler Core**: pure planning pass, no burst catch-up, weighted dispatch
//! - **Task Runner**: single-flight per task, hard timeouts, panic capture
//! - **Engagement Store**: append-only execution history (SQLite or in-memory)
//! - **Engagement Analyzer**: adjusts weight, cadence and suspension from recent results
//! - **Character Model**: validated persona shared by every behavior
//!
//! # Architecture
//!
//! ```text
//! Orchestrator ──► Scheduler Core ──► Task Runner ──► Behaviors
//!   (tick loop)      (plan/tick)          │          (interaction, content)
//!       ▲                                 ▼
//!       │                          Engagement Store
//!       │                          (SQLite + memory)
//!       │                                 │
//!       └──── StrategyAdjustment ◄── Engagement Analyzer
//!                                    (scheduled task)
//! ```

pub mod agent;
pub mod autonomous;
pub mod behaviors;
pub mod character;
pub mod clock;
pub mod config;
pub mod engagement;
pub mod error;

pub use agent::{
    Cadence, Metric, Orchestrator, OrchestratorOptions, Outcome, ScheduledTask, SchedulerCore,
    StrategyAdjustment, TaskAdjustment, TaskExecution, TaskId, TaskRunner,
};
pub use autonomous::{AnalyzerConfig, EngagementAnalyzer, EngagementMetric};
pub use behaviors::{ContentBehavior, DryRunContent, DryRunInteraction, InteractionBehavior};
pub use character::{Character, CharacterRegistry, SchemaError, SharedCharacter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, TaskSettings};
pub use engagement::{EngagementStore, MemoryEngagementStore, SqliteEngagementStore, StoreError};
pub use error::OrchestratorError;
