//! Engagement Analyzer
//!
//! Turns recent execution history into strategy adjustments:
//! - Poor success ratio lowers weight and loosens interval cadences
//! - Very poor success ratio suspends the task for a cooldown
//! - Consistent success raises weight and tightens content cadences
//! - Frequent overlaps loosen a cadence that is too tight
//! - Content moves to the UTC hours where it has performed best
//!
//! The analyzer is stateless apart from the suspension book-keeping, so a
//! cycle can be replayed against any window of executions.

use chrono::{DateTime, Duration, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::agent::{
    Cadence, ScheduledTask, StrategyAdjustment, TaskAdjustment, TaskExecution, TaskId,
};
use crate::engagement::{EngagementStore, StoreError};

const WEIGHT_EPSILON: f64 = 1e-9;

/// Thresholds and step sizes for the analyzer
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// How far back to read executions
    pub window: Duration,
    /// Most recent executions considered per task
    pub max_samples_per_task: usize,
    /// Attempted runs required before any adjustment
    pub min_samples: usize,
    /// Success ratio below which a task is penalized
    pub low_threshold: f64,
    /// Success ratio above which a task is boosted
    pub high_threshold: f64,
    /// Success ratio below which a task is suspended
    pub disable_threshold: f64,
    pub weight_step_down: f64,
    pub weight_step_up: f64,
    /// Weight floor before a penalized task is suspended instead
    pub min_weight: f64,
    /// Interval multiplier for well-performing content tasks (< 1)
    pub tighten_factor: f64,
    /// Interval multiplier for struggling tasks (> 1)
    pub loosen_factor: f64,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// How long a suspended task stays disabled
    pub suspend_cooldown: Duration,
    /// Attempted runs inspected for recent failures when boosting
    pub recent_failure_lookback: usize,
    /// Overlap ratio at which a cadence is loosened
    pub overlap_threshold: f64,
    /// Hours kept in a proposed posting schedule; 0 disables hour targeting
    pub posting_hours: usize,
    /// Distinct qualifying hours needed before proposing a schedule
    pub min_active_hours: usize,
    /// Attempted runs an hour needs to qualify
    pub min_hour_samples: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            window: Duration::hours(24),
            max_samples_per_task: 50,
            min_samples: 5,
            low_threshold: 0.5,
            high_threshold: 0.9,
            disable_threshold: 0.2,
            weight_step_down: 0.2,
            weight_step_up: 0.1,
            min_weight: 0.1,
            tighten_factor: 0.75,
            loosen_factor: 1.5,
            min_interval: Duration::minutes(5),
            max_interval: Duration::days(1),
            suspend_cooldown: Duration::hours(6),
            recent_failure_lookback: 3,
            overlap_threshold: 0.5,
            posting_hours: 5,
            min_active_hours: 3,
            min_hour_samples: 2,
        }
    }
}

/// Outcomes of runs started within one UTC hour of the day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourStats {
    pub samples: usize,
    pub successes: usize,
    pub success_ratio: f64,
    /// Mean metric value over successful runs that reported one
    pub avg_metric: Option<f64>,
}

impl HourStats {
    /// Success ratio weighted by the average metric, if any was reported
    pub fn score(&self) -> f64 {
        self.success_ratio * self.avg_metric.unwrap_or(1.0)
    }
}

/// Per-task aggregate over the analysis window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetric {
    pub task_id: TaskId,
    /// Attempted runs (successes + failures)
    pub samples: usize,
    pub successes: usize,
    pub failures: usize,
    pub overlaps: usize,
    pub success_ratio: f64,
    /// Overlaps over all firings
    pub overlap_ratio: f64,
    /// Mean metric value over successful runs that reported one
    pub avg_metric: Option<f64>,
    pub avg_latency_ms: f64,
    /// Failures among the most recent attempted runs
    pub recent_failures: usize,
    /// Success ratio discounted by overlap ratio
    pub effectiveness: f64,
    /// Attempted runs keyed by the UTC hour they started in
    pub by_hour: BTreeMap<u32, HourStats>,
}

impl EngagementMetric {
    /// Aggregate executions of one task (any order)
    pub fn from_executions(task_id: TaskId, executions: &[&TaskExecution], lookback: usize) -> Self {
        let mut successes = 0;
        let mut failures = 0;
        let mut overlaps = 0;
        let mut metric_sum = 0.0;
        let mut metric_count = 0usize;
        let mut latency_sum = 0i64;
        // hour -> (samples, successes, metric sum, metric count)
        let mut hours: BTreeMap<u32, (usize, usize, f64, usize)> = BTreeMap::new();

        for exec in executions {
            if exec.outcome.is_overlap() {
                overlaps += 1;
                continue;
            }
            let hour = hours.entry(exec.started_at.hour()).or_default();
            hour.0 += 1;
            if exec.outcome.is_success() {
                successes += 1;
                hour.1 += 1;
            } else {
                failures += 1;
            }
            if let Some(metric) = exec.outcome.metric() {
                metric_sum += metric.value;
                metric_count += 1;
                hour.2 += metric.value;
                hour.3 += 1;
            }
            latency_sum += exec.latency_ms();
        }

        let by_hour = hours
            .into_iter()
            .map(|(hour, (samples, successes, sum, count))| {
                let stats = HourStats {
                    samples,
                    successes,
                    success_ratio: successes as f64 / samples as f64,
                    avg_metric: (count > 0).then(|| sum / count as f64),
                };
                (hour, stats)
            })
            .collect();

        let mut attempts: Vec<&&TaskExecution> =
            executions.iter().filter(|e| !e.outcome.is_overlap()).collect();
        attempts.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let recent_failures = attempts
            .iter()
            .take(lookback)
            .filter(|e| e.outcome.is_failure())
            .count();

        let samples = successes + failures;
        let firings = samples + overlaps;
        let success_ratio = if samples == 0 {
            0.0
        } else {
            successes as f64 / samples as f64
        };
        let overlap_ratio = if firings == 0 {
            0.0
        } else {
            overlaps as f64 / firings as f64
        };

        Self {
            task_id,
            samples,
            successes,
            failures,
            overlaps,
            success_ratio,
            overlap_ratio,
            avg_metric: (metric_count > 0).then(|| metric_sum / metric_count as f64),
            avg_latency_ms: if samples == 0 {
                0.0
            } else {
                latency_sum as f64 / samples as f64
            },
            recent_failures,
            effectiveness: success_ratio * (1.0 - overlap_ratio),
            by_hour,
        }
    }
}

/// Analyzer statistics
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerStats {
    pub cycles: u64,
    pub boosted: u64,
    pub penalized: u64,
    pub suspended: u64,
    pub resumed: u64,
    pub retimed: u64,
}

#[derive(Debug, Default)]
struct AnalyzerState {
    /// Tasks this analyzer disabled, with the time of suspension
    suspended: HashMap<TaskId, DateTime<Utc>>,
    /// Executions before a resume are not held against the task again
    resumed_at: HashMap<TaskId, DateTime<Utc>>,
    stats: AnalyzerStats,
}

/// Derives strategy adjustments from engagement history
pub struct EngagementAnalyzer {
    config: AnalyzerConfig,
    state: Mutex<AnalyzerState>,
}

impl Default for EngagementAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl EngagementAnalyzer {
    pub fn new() -> Self {
        Self::with_config(AnalyzerConfig::default())
    }

    pub fn with_config(config: AnalyzerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AnalyzerState::default()),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Read the configured window from `store` and analyze it
    pub fn collect(
        &self,
        store: &dyn EngagementStore,
        tasks: &[ScheduledTask],
        now: DateTime<Utc>,
    ) -> Result<StrategyAdjustment, StoreError> {
        let executions = store.window(now - self.config.window, self.config.max_samples_per_task)?;
        debug!("Analyzing {} executions", executions.len());
        Ok(self.analyze(&executions, tasks, now))
    }

    /// Aggregate executions per task
    pub fn summarize(&self, executions: &[TaskExecution]) -> BTreeMap<TaskId, EngagementMetric> {
        let state = self.state.lock();
        let mut grouped: BTreeMap<TaskId, Vec<&TaskExecution>> = BTreeMap::new();
        for exec in executions {
            if let Some(resumed) = state.resumed_at.get(&exec.task_id) {
                if exec.started_at < *resumed {
                    continue;
                }
            }
            grouped.entry(exec.task_id.clone()).or_default().push(exec);
        }
        drop(state);

        grouped
            .into_iter()
            .map(|(id, execs)| {
                let metric = EngagementMetric::from_executions(
                    id.clone(),
                    &execs,
                    self.config.recent_failure_lookback,
                );
                (id, metric)
            })
            .collect()
    }

    /// Produce adjustments for `tasks` from `executions`
    pub fn analyze(
        &self,
        executions: &[TaskExecution],
        tasks: &[ScheduledTask],
        now: DateTime<Utc>,
    ) -> StrategyAdjustment {
        let metrics = self.summarize(executions);
        let mut adjustment = StrategyAdjustment::new(now);
        let mut state = self.state.lock();
        state.stats.cycles += 1;

        for task in tasks {
            if task.id == TaskId::EngagementAnalysis {
                continue;
            }

            if !task.enabled {
                let Some(since) = state.suspended.get(&task.id).copied() else {
                    continue;
                };
                if now - since >= self.config.suspend_cooldown {
                    info!("Resuming task {} after suspension", task.id);
                    state.suspended.remove(&task.id);
                    state.resumed_at.insert(task.id.clone(), now);
                    state.stats.resumed += 1;
                    adjustment.insert(
                        task.id.clone(),
                        TaskAdjustment {
                            enabled: Some(true),
                            weight: Some(self.config.min_weight),
                            ..Default::default()
                        },
                    );
                }
                continue;
            }

            let Some(metric) = metrics.get(&task.id) else {
                continue;
            };
            if metric.samples < self.config.min_samples {
                debug!(
                    "Task {} has {} samples, need {}",
                    task.id, metric.samples, self.config.min_samples
                );
                continue;
            }

            let change = self.evaluate(task, metric, &mut state, now);
            adjustment.insert(task.id.clone(), change);
        }

        if !adjustment.is_empty() {
            info!("Analyzer produced {} adjustments", adjustment.len());
        }
        adjustment
    }

    fn evaluate(
        &self,
        task: &ScheduledTask,
        metric: &EngagementMetric,
        state: &mut AnalyzerState,
        now: DateTime<Utc>,
    ) -> TaskAdjustment {
        let cfg = &self.config;
        let ratio = metric.success_ratio;
        let mut change = TaskAdjustment::default();

        if ratio < cfg.disable_threshold {
            info!("Suspending task {} (success ratio {:.2})", task.id, ratio);
            change.enabled = Some(false);
            change.weight = Some((task.weight - cfg.weight_step_down).max(0.0));
            state.suspended.insert(task.id.clone(), now);
            state.stats.suspended += 1;
            return change;
        }

        if ratio < cfg.low_threshold {
            if task.weight <= cfg.min_weight + WEIGHT_EPSILON {
                info!("Task {} at weight floor, suspending", task.id);
                change.enabled = Some(false);
                state.suspended.insert(task.id.clone(), now);
                state.stats.suspended += 1;
                return change;
            }
            change.weight = Some((task.weight - cfg.weight_step_down).max(cfg.min_weight));
            change.cadence = self.rescale(&task.cadence, cfg.loosen_factor);
            state.stats.penalized += 1;
        } else if ratio > cfg.high_threshold {
            // a recent failure halves the boost and holds the cadence
            let step = if metric.recent_failures == 0 {
                cfg.weight_step_up
            } else {
                cfg.weight_step_up / 2.0
            };
            let weight = (task.weight + step).min(1.0);
            if weight > task.weight + WEIGHT_EPSILON {
                change.weight = Some(weight);
            }
            if task.id.is_content_class() && metric.recent_failures == 0 {
                change.cadence = self.rescale(&task.cadence, cfg.tighten_factor);
            }
            if !change.is_empty() {
                state.stats.boosted += 1;
            }
        }

        if change.cadence.is_none() && metric.overlap_ratio >= cfg.overlap_threshold {
            debug!(
                "Task {} overlaps {:.0}% of firings",
                task.id,
                metric.overlap_ratio * 100.0
            );
            change.cadence = self.rescale(&task.cadence, cfg.loosen_factor);
        }

        if task.id.is_content_class() && change.enabled != Some(false) {
            if let Some(cadence) = self.posting_schedule(metric).filter(|c| *c != task.cadence) {
                info!("Task {} moves to {}", task.id, cadence);
                change.cadence = Some(cadence);
                state.stats.retimed += 1;
            }
        }

        change
    }

    /// Daily cron firing at the best-scoring hours, once enough hours have history
    pub fn posting_schedule(&self, metric: &EngagementMetric) -> Option<Cadence> {
        let cfg = &self.config;
        if cfg.posting_hours == 0 || metric.samples < cfg.min_samples {
            return None;
        }

        let mut ranked: Vec<(u32, f64)> = metric
            .by_hour
            .iter()
            .filter(|(_, stats)| stats.samples >= cfg.min_hour_samples)
            .map(|(hour, stats)| (*hour, stats.score()))
            .collect();
        if ranked.len() < cfg.min_active_hours {
            return None;
        }

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let mut best: Vec<u32> = ranked
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .take(cfg.posting_hours)
            .map(|(hour, _)| hour)
            .collect();
        if best.is_empty() {
            return None;
        }
        best.sort_unstable();

        let hours = best.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        format!("0 {} * * *", hours).parse().ok()
    }

    /// Scaled interval cadence, or `None` if unchanged or cron
    fn rescale(&self, cadence: &Cadence, factor: f64) -> Option<Cadence> {
        cadence
            .scaled(factor, self.config.min_interval, self.config.max_interval)
            .filter(|scaled| scaled != cadence)
    }

    /// Whether the analyzer currently holds `task` suspended
    pub fn is_suspended(&self, task: &TaskId) -> bool {
        self.state.lock().suspended.contains_key(task)
    }

    pub fn stats(&self) -> AnalyzerStats {
        self.state.lock().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{FailureReason, Metric, Outcome};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn exec(task: TaskId, minute: i64, outcome: Outcome) -> TaskExecution {
        let start = t0() - Duration::hours(2) + Duration::minutes(minute);
        TaskExecution::new(task, start, start + Duration::seconds(2), outcome)
    }

    fn success() -> Outcome {
        Outcome::Success {
            metric: Some(Metric::posts(1)),
        }
    }

    fn failure() -> Outcome {
        Outcome::Failure {
            reason: FailureReason::Behavior("api error".into()),
        }
    }

    /// `ok` successes followed by `bad` failures
    fn history(task: TaskId, ok: usize, bad: usize) -> Vec<TaskExecution> {
        let mut out = Vec::new();
        for i in 0..ok {
            out.push(exec(task.clone(), i as i64, success()));
        }
        for i in 0..bad {
            out.push(exec(task.clone(), (ok + i) as i64, failure()));
        }
        out
    }

    fn content_task(weight: f64) -> ScheduledTask {
        ScheduledTask::new(TaskId::ContentGeneration, Cadence::every(Duration::hours(4))).with_weight(weight)
    }

    #[test]
    fn test_metric_aggregation() {
        let mut execs = history(TaskId::ContentGeneration, 3, 1);
        execs.push(exec(TaskId::ContentGeneration, 10, Outcome::SkippedOverlap));
        let refs: Vec<&TaskExecution> = execs.iter().collect();

        let metric = EngagementMetric::from_executions(TaskId::ContentGeneration, &refs, 3);
        assert_eq!(metric.samples, 4);
        assert_eq!(metric.overlaps, 1);
        assert!((metric.success_ratio - 0.75).abs() < 1e-9);
        assert!((metric.overlap_ratio - 0.2).abs() < 1e-9);
        assert_eq!(metric.avg_metric, Some(1.0));
        assert_eq!(metric.avg_latency_ms, 2000.0);
        assert_eq!(metric.recent_failures, 1);
        assert!((metric.effectiveness - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_below_min_samples_no_adjustment() {
        let analyzer = EngagementAnalyzer::new();
        let execs = history(TaskId::ContentGeneration, 0, 4);
        let adj = analyzer.analyze(&execs, &[content_task(1.0)], t0());
        assert!(adj.is_empty());
    }

    #[test]
    fn test_low_ratio_decreases_weight_and_loosens() {
        let analyzer = EngagementAnalyzer::new();
        let execs = history(TaskId::ContentGeneration, 3, 5);
        let adj = analyzer.analyze(&execs, &[content_task(0.8)], t0());

        let change = adj.get(&TaskId::ContentGeneration).unwrap();
        assert!(change.weight.unwrap() < 0.8);
        assert_eq!(change.cadence, Some(Cadence::every(Duration::hours(6))));
        assert_eq!(change.enabled, None);
        assert_eq!(analyzer.stats().penalized, 1);
    }

    #[test]
    fn test_low_ratio_at_floor_disables() {
        let analyzer = EngagementAnalyzer::new();
        let execs = history(TaskId::ContentGeneration, 3, 5);
        let adj = analyzer.analyze(&execs, &[content_task(0.1)], t0());

        let change = adj.get(&TaskId::ContentGeneration).unwrap();
        assert_eq!(change.enabled, Some(false));
        assert!(analyzer.is_suspended(&TaskId::ContentGeneration));
    }

    #[test]
    fn test_very_low_ratio_suspends() {
        let analyzer = EngagementAnalyzer::new();
        let execs = history(TaskId::ContentGeneration, 1, 9);
        let adj = analyzer.analyze(&execs, &[content_task(1.0)], t0());

        let change = adj.get(&TaskId::ContentGeneration).unwrap();
        assert_eq!(change.enabled, Some(false));
        assert!(change.weight.unwrap() < 1.0);
        assert_eq!(analyzer.stats().suspended, 1);
    }

    #[test]
    fn test_high_ratio_boosts_and_tightens_content() {
        let analyzer = EngagementAnalyzer::new();
        let execs = history(TaskId::ContentGeneration, 10, 0);
        let adj = analyzer.analyze(&execs, &[content_task(0.5)], t0());

        let change = adj.get(&TaskId::ContentGeneration).unwrap();
        assert!((change.weight.unwrap() - 0.6).abs() < 1e-9);
        assert_eq!(change.cadence, Some(Cadence::every(Duration::hours(3))));
    }

    #[test]
    fn test_high_ratio_weight_capped_and_interaction_not_tightened() {
        let analyzer = EngagementAnalyzer::new();
        let execs = history(TaskId::InteractionCheck, 10, 0);
        let task = ScheduledTask::new(TaskId::InteractionCheck, Cadence::every(Duration::minutes(5)));
        let adj = analyzer.analyze(&execs, &[task], t0());
        assert!(adj.get(&TaskId::InteractionCheck).is_none());
    }

    #[test]
    fn test_recent_failure_shrinks_boost() {
        let analyzer = EngagementAnalyzer::new();
        // 19 successes then one failure: ratio 0.95 but the latest run failed
        let execs = history(TaskId::ContentGeneration, 19, 1);
        let adj = analyzer.analyze(&execs, &[content_task(0.5)], t0());

        let change = adj.get(&TaskId::ContentGeneration).unwrap();
        assert!((change.weight.unwrap() - 0.55).abs() < 1e-9);
        assert_eq!(change.cadence, None);
    }

    #[test]
    fn test_overlaps_loosen_cadence() {
        let analyzer = EngagementAnalyzer::new();
        let mut execs = history(TaskId::InteractionCheck, 6, 1);
        for i in 0..8 {
            execs.push(exec(TaskId::InteractionCheck, 20 + i, Outcome::SkippedOverlap));
        }
        let task = ScheduledTask::new(TaskId::InteractionCheck, Cadence::every(Duration::minutes(10)));
        let adj = analyzer.analyze(&execs, &[task], t0());

        let change = adj.get(&TaskId::InteractionCheck).unwrap();
        assert_eq!(change.cadence, Some(Cadence::every(Duration::minutes(15))));
        assert_eq!(change.weight, None);
    }

    #[test]
    fn test_cron_cadence_never_rescaled() {
        let analyzer = EngagementAnalyzer::new();
        let execs = history(TaskId::ContentGeneration, 10, 0);
        let task = ScheduledTask::parse(TaskId::ContentGeneration, "0 */4 * * *")
            .unwrap()
            .with_weight(0.5);
        let adj = analyzer.analyze(&execs, &[task], t0());

        let change = adj.get(&TaskId::ContentGeneration).unwrap();
        assert_eq!(change.cadence, None);
        assert!(change.weight.is_some());
    }

    #[test]
    fn test_own_task_excluded() {
        let analyzer = EngagementAnalyzer::new();
        let execs = history(TaskId::EngagementAnalysis, 0, 10);
        let task = ScheduledTask::new(TaskId::EngagementAnalysis, Cadence::every(Duration::days(1)));
        let adj = analyzer.analyze(&execs, &[task], t0());
        assert!(adj.is_empty());
    }

    #[test]
    fn test_suspended_task_resumes_after_cooldown() {
        let analyzer = EngagementAnalyzer::new();
        let execs = history(TaskId::ContentGeneration, 0, 10);
        analyzer.analyze(&execs, &[content_task(1.0)], t0());

        let disabled = content_task(0.8).with_enabled(false);
        let early = analyzer.analyze(&execs, &[disabled.clone()], t0() + Duration::hours(1));
        assert!(early.is_empty());

        let later = t0() + Duration::hours(7);
        let adj = analyzer.analyze(&execs, &[disabled], later);
        let change = adj.get(&TaskId::ContentGeneration).unwrap();
        assert_eq!(change.enabled, Some(true));
        assert_eq!(change.weight, Some(0.1));
        assert!(!analyzer.is_suspended(&TaskId::ContentGeneration));

        // history from before the resume no longer counts
        let adj = analyzer.analyze(&execs, &[content_task(0.1)], later + Duration::minutes(1));
        assert!(adj.is_empty());
        assert_eq!(analyzer.stats().resumed, 1);
    }

    /// `ok` successes and `bad` failures started at `hour` UTC
    fn at_hour(hour: u32, ok: usize, bad: usize) -> Vec<TaskExecution> {
        let base = Utc.with_ymd_and_hms(2024, 2, 29, hour, 0, 0).unwrap();
        (0..ok + bad)
            .map(|i| {
                let start = base + Duration::minutes(i as i64);
                let outcome = if i < ok { success() } else { failure() };
                TaskExecution::new(TaskId::ContentGeneration, start, start, outcome)
            })
            .collect()
    }

    #[test]
    fn test_metric_groups_by_hour() {
        let mut execs = at_hour(9, 3, 1);
        execs.extend(at_hour(21, 0, 2));
        let refs: Vec<&TaskExecution> = execs.iter().collect();

        let metric = EngagementMetric::from_executions(TaskId::ContentGeneration, &refs, 3);
        assert_eq!(metric.by_hour.len(), 2);
        assert_eq!(metric.by_hour[&9].samples, 4);
        assert!((metric.by_hour[&9].success_ratio - 0.75).abs() < 1e-9);
        assert_eq!(metric.by_hour[&9].avg_metric, Some(1.0));
        assert_eq!(metric.by_hour[&21].success_ratio, 0.0);
        assert_eq!(metric.by_hour[&21].avg_metric, None);
    }

    #[test]
    fn test_posting_hours_follow_outcomes() {
        let config = AnalyzerConfig {
            posting_hours: 2,
            window: Duration::days(2),
            ..Default::default()
        };
        let analyzer = EngagementAnalyzer::with_config(config);

        let mut execs = at_hour(9, 4, 0);
        execs.extend(at_hour(14, 2, 2));
        execs.extend(at_hour(18, 3, 0));
        execs.extend(at_hour(23, 0, 3));

        let adj = analyzer.analyze(&execs, &[content_task(0.8)], t0());
        let change = adj.get(&TaskId::ContentGeneration).unwrap();
        assert_eq!(change.cadence, Some("0 9,18 * * *".parse::<Cadence>().unwrap()));
        assert_eq!(analyzer.stats().retimed, 1);

        // the same schedule is not proposed twice
        let mut retimed = content_task(0.8);
        retimed.cadence = "0 9,18 * * *".parse().unwrap();
        let adj = analyzer.analyze(&execs, &[retimed], t0());
        assert!(adj.get(&TaskId::ContentGeneration).is_none());
    }

    #[test]
    fn test_posting_hours_need_enough_history() {
        let analyzer = EngagementAnalyzer::new();

        // two qualifying hours is not enough
        let mut execs = at_hour(9, 3, 0);
        execs.extend(at_hour(18, 3, 0));
        execs.extend(at_hour(20, 1, 0));
        let metric = analyzer.summarize(&execs).remove(&TaskId::ContentGeneration).unwrap();
        assert_eq!(analyzer.posting_schedule(&metric), None);

        // below min_samples overall
        let execs = [at_hour(9, 1, 0), at_hour(12, 1, 0), at_hour(18, 1, 0)].concat();
        let config = AnalyzerConfig {
            min_hour_samples: 1,
            ..Default::default()
        };
        let analyzer = EngagementAnalyzer::with_config(config);
        let metric = analyzer.summarize(&execs).remove(&TaskId::ContentGeneration).unwrap();
        assert_eq!(analyzer.posting_schedule(&metric), None);

        // interaction tasks keep their cadence
        let execs: Vec<TaskExecution> = [at_hour(9, 3, 0), at_hour(12, 3, 0), at_hour(18, 3, 0)]
            .concat()
            .into_iter()
            .map(|mut e| {
                e.task_id = TaskId::InteractionCheck;
                e
            })
            .collect();
        let task = ScheduledTask::new(TaskId::InteractionCheck, Cadence::every(Duration::minutes(5)));
        let adj = EngagementAnalyzer::new().analyze(&execs, &[task], t0());
        assert!(adj.is_empty());
    }

    #[test]
    fn test_externally_disabled_task_left_alone() {
        let analyzer = EngagementAnalyzer::new();
        let execs = history(TaskId::ContentGeneration, 10, 0);
        let adj = analyzer.analyze(
            &execs,
            &[content_task(1.0).with_enabled(false)],
            t0() + Duration::days(2),
        );
        assert!(adj.is_empty());
    }
}
