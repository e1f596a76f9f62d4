//! Autonomous strategy
//!
//! Closes the loop between what the persona does and how often it does it:
//! 1. **Observe**: read recent executions from the engagement store
//! 2. **Orient**: aggregate them into per-task engagement metrics
//! 3. **Decide**: derive weight, cadence and suspension changes
//! 4. **Act**: hand the strategy adjustment to the scheduler

mod analyzer;

pub use analyzer::{AnalyzerConfig, AnalyzerStats, EngagementAnalyzer, EngagementMetric, HourStats};
