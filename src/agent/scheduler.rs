//! Scheduler Core
//!
//! Owns the authoritative set of recurring tasks and their next-fire times.
//! Deciding what is due is kept apart from executing it:
//! - [`SchedulerCore::plan`] is pure: it reports due tasks and the schedule
//!   that would result, without touching state
//! - [`SchedulerCore::tick`] commits a plan
//! - dispatch happens elsewhere (see the orchestrator)
//!
//! Exactly one owner evaluates ticks, so next-fire computation never races.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::cadence::{Cadence, NextFire};
use super::task::{clamp_weight, ScheduledTask, TaskId};
use crate::error::OrchestratorError;

/// What to do when a task id is registered twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Silently replace the existing entry
    #[default]
    Replace,
    /// Fail with `DuplicateTask`
    Reject,
}

/// A task reported due by a tick
#[derive(Debug, Clone, PartialEq)]
pub struct DueTask {
    pub id: TaskId,
    pub weight: f64,
    /// The fire time that became due (`None` when rescheduled to fire immediately)
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Result of planning a tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickPlan {
    /// Due tasks, highest weight first
    pub due: Vec<DueTask>,
    /// New next-fire times for every task that fired or was skipped while disabled
    pub next_fires: Vec<(TaskId, DateTime<Utc>)>,
}

/// Requested change to one task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskAdjustment {
    pub cadence: Option<Cadence>,
    pub weight: Option<f64>,
    pub enabled: Option<bool>,
    /// Make the task due on the next tick instead of keeping its next-fire time
    #[serde(default)]
    pub reschedule_now: bool,
}

impl TaskAdjustment {
    pub fn is_empty(&self) -> bool {
        self.cadence.is_none() && self.weight.is_none() && self.enabled.is_none() && !self.reschedule_now
    }
}

/// Batch of task changes produced by the analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAdjustment {
    pub produced_at: DateTime<Utc>,
    pub changes: BTreeMap<TaskId, TaskAdjustment>,
}

impl StrategyAdjustment {
    pub fn new(produced_at: DateTime<Utc>) -> Self {
        Self {
            produced_at,
            changes: BTreeMap::new(),
        }
    }

    /// Add a change for a task (empty changes are dropped)
    pub fn insert(&mut self, id: TaskId, change: TaskAdjustment) {
        if !change.is_empty() {
            self.changes.insert(id, change);
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskAdjustment> {
        self.changes.get(id)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    task: ScheduledTask,
    /// `None` means due on the next tick
    next_fire: Option<DateTime<Utc>>,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub registered: usize,
    pub enabled: usize,
    pub ticks: u64,
    pub fired: u64,
}

/// The scheduling decision layer
#[derive(Debug, Default)]
pub struct SchedulerCore {
    entries: BTreeMap<TaskId, Entry>,
    policy: DuplicatePolicy,
    ticks: u64,
    fired: u64,
}

impl SchedulerCore {
    /// Create an empty scheduler that replaces duplicates
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with an explicit duplicate policy
    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Register (or replace) a task; its first fire is the cadence's next fire after `now`
    pub fn register_task(
        &mut self,
        mut task: ScheduledTask,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        task.cadence
            .validate()
            .map_err(|e| OrchestratorError::invalid_cadence(&task.id, e))?;
        let next_fire = task.cadence.next_after(now).ok_or_else(|| {
            OrchestratorError::invalid_cadence(&task.id, format!("'{}' never fires", task.cadence))
        })?;

        if self.policy == DuplicatePolicy::Reject && self.entries.contains_key(&task.id) {
            return Err(OrchestratorError::DuplicateTask(task.id));
        }

        task.weight = clamp_weight(task.weight);
        info!(
            "Registered task {} ({}), first fire at {}",
            task.id,
            task.cadence,
            next_fire.format("%Y-%m-%d %H:%M:%S")
        );

        self.entries.insert(
            task.id.clone(),
            Entry {
                task,
                next_fire: Some(next_fire),
            },
        );
        Ok(())
    }

    /// Remove a task entirely
    pub fn unregister(&mut self, id: &TaskId) -> Option<ScheduledTask> {
        self.entries.remove(id).map(|e| e.task)
    }

    /// Decide what is due at `now` without changing anything
    pub fn plan(&self, now: DateTime<Utc>) -> TickPlan {
        let mut due = Vec::new();
        let mut next_fires = Vec::new();

        for (id, entry) in &self.entries {
            let is_due = entry.next_fire.map(|t| t <= now).unwrap_or(true);
            if !is_due {
                continue;
            }

            // Keep interval alignment when on time; never queue a burst of missed fires
            let base = entry.next_fire.unwrap_or(now);
            let next = match entry.task.cadence.next_after(base) {
                Some(next) if next > now => Some(next),
                _ => entry.task.cadence.next_after(now),
            };
            next_fires.push((id.clone(), next.unwrap_or(DateTime::<Utc>::MAX_UTC)));

            if entry.task.enabled {
                due.push(DueTask {
                    id: id.clone(),
                    weight: entry.task.weight,
                    scheduled_for: entry.next_fire,
                });
            }
        }

        due.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.id.cmp(&b.id)));

        TickPlan { due, next_fires }
    }

    /// Commit the plan for `now` and return the due task ids
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<DueTask> {
        let plan = self.plan(now);
        self.ticks += 1;

        for (id, next) in plan.next_fires {
            if let Some(entry) = self.entries.get_mut(&id) {
                if next == DateTime::<Utc>::MAX_UTC {
                    warn!("Task {} cadence '{}' will not fire again", id, entry.task.cadence);
                }
                entry.next_fire = Some(next);
            }
        }

        self.fired += plan.due.len() as u64;
        if !plan.due.is_empty() {
            debug!(
                "Tick {}: due {:?}",
                now.format("%H:%M:%S"),
                plan.due.iter().map(|d| d.id.as_str()).collect::<Vec<_>>()
            );
        }
        plan.due
    }

    /// Apply an analyzer adjustment. Returns the number of tasks changed.
    pub fn apply_adjustment(&mut self, adjustment: StrategyAdjustment) -> usize {
        let mut applied = 0;

        for (id, change) in adjustment.changes {
            let Some(entry) = self.entries.get_mut(&id) else {
                warn!("Adjustment for unknown task {} ignored", id);
                continue;
            };

            match change.cadence.map(|c| c.validate().map(|()| c)) {
                Some(Ok(cadence)) => {
                    if cadence != entry.task.cadence {
                        info!("Task {} cadence: {} -> {}", id, entry.task.cadence, cadence);
                    }
                    entry.task.cadence = cadence;
                }
                Some(Err(e)) => warn!("Task {} cadence change dropped: {}", id, e),
                None => {}
            }
            if let Some(weight) = change.weight {
                let weight = clamp_weight(weight);
                info!("Task {} weight: {:.2} -> {:.2}", id, entry.task.weight, weight);
                entry.task.weight = weight;
            }
            if let Some(enabled) = change.enabled {
                if enabled != entry.task.enabled {
                    info!("Task {} {}", id, if enabled { "enabled" } else { "disabled" });
                }
                entry.task.enabled = enabled;
            }
            if change.reschedule_now {
                entry.next_fire = None;
            }
            applied += 1;
        }

        applied
    }

    /// Current task definitions
    pub fn tasks(&self) -> Vec<ScheduledTask> {
        self.entries.values().map(|e| e.task.clone()).collect()
    }

    pub fn task(&self, id: &TaskId) -> Option<&ScheduledTask> {
        self.entries.get(id).map(|e| &e.task)
    }

    /// Next fire time; `None` when unknown, `Some(None)` when due on the next tick
    pub fn next_fire(&self, id: &TaskId) -> Option<Option<DateTime<Utc>>> {
        self.entries.get(id).map(|e| e.next_fire)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            registered: self.entries.len(),
            enabled: self.entries.values().filter(|e| e.task.enabled).count(),
            ticks: self.ticks,
            fired: self.fired,
        }
    }
}
