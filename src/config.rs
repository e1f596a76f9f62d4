//! Configuration management

use anyhow::{bail, Context, Result};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::agent::{Cadence, DuplicatePolicy, OrchestratorOptions, ScheduledTask, TaskId};
use crate::autonomous::AnalyzerConfig;

/// Per-task scheduling settings
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSettings {
    pub cadence: Cadence,
    /// Hard limit on one run
    pub timeout: Duration,
    pub enabled: bool,
    pub weight: f64,
    /// Successful runs allowed per UTC day
    pub max_daily_runs: Option<u32>,
}

impl TaskSettings {
    pub fn new(cadence: Cadence) -> Self {
        Self {
            cadence,
            timeout: Duration::from_secs(120),
            enabled: true,
            weight: 1.0,
            max_daily_runs: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_daily_runs(mut self, cap: Option<u32>) -> Self {
        self.max_daily_runs = cap;
        self
    }

    /// Task definition for the scheduler
    pub fn scheduled(&self, id: TaskId) -> ScheduledTask {
        ScheduledTask::new(id, self.cadence.clone())
            .with_weight(self.weight)
            .with_enabled(self.enabled)
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Persona definition file
    pub character_path: PathBuf,

    /// SQLite database path for the engagement store
    pub db_path: PathBuf,

    /// Planning pass interval
    pub tick_interval: Duration,

    /// Grace period for in-flight runs on shutdown
    pub shutdown_grace: Duration,

    /// Reject re-registration of an existing task id
    pub duplicate_policy: DuplicatePolicy,

    /// Seed for weight gating (random when unset)
    pub rng_seed: Option<u64>,

    pub interaction: TaskSettings,
    pub content: TaskSettings,
    pub analysis: TaskSettings,

    pub analyzer: AnalyzerConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let character_path = env
            .get("ORCH_CHARACTER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("character.json"));

        let db_path = env.get("ORCH_DB_PATH").map(PathBuf::from).unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("persona-orchestrator")
                .join("engagement.db")
        });

        let tick_secs: u64 = env.parse("ORCH_TICK_SECS", 60)?;
        if tick_secs == 0 {
            bail!("ORCH_TICK_SECS must be greater than zero");
        }
        let grace_secs: u64 = env.parse("ORCH_SHUTDOWN_GRACE_SECS", 30)?;

        let duplicate_policy = if env.flag("ORCH_REJECT_DUPLICATE_TASKS", false)? {
            DuplicatePolicy::Reject
        } else {
            DuplicatePolicy::Replace
        };

        let rng_seed = match env.get("ORCH_RNG_SEED") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("Invalid ORCH_RNG_SEED: {}", raw))?,
            ),
            None => None,
        };

        let interaction = env.task("INTERACTION", "*/5 * * * *", 120)?;
        let mut content = env.task("CONTENT", "0 */4 * * *", 600)?;
        let analysis = env.task("ANALYSIS", "0 0 * * *", 300)?;

        let max_daily: u32 = env.parse("ORCH_CONTENT_MAX_DAILY", 12)?;
        content.max_daily_runs = (max_daily > 0).then_some(max_daily);

        let analyzer = env.analyzer()?;

        Ok(Self {
            character_path,
            db_path,
            tick_interval: Duration::from_secs(tick_secs),
            shutdown_grace: Duration::from_secs(grace_secs),
            duplicate_policy,
            rng_seed,
            interaction,
            content,
            analysis,
            analyzer,
        })
    }

    /// Loop options derived from this configuration
    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            tick_interval: self.tick_interval,
            shutdown_grace: self.shutdown_grace,
            duplicate_policy: self.duplicate_policy,
            rng_seed: self.rng_seed,
        }
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid {}={}: {}", key, raw, e)),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => bail!("Invalid {}={}: expected true or false", key, v),
            },
        }
    }

    fn ratio(&self, key: &str, default: f64) -> Result<f64> {
        let value: f64 = self.parse(key, default)?;
        if !(0.0..=1.0).contains(&value) {
            bail!("{} must be between 0 and 1, got {}", key, value);
        }
        Ok(value)
    }

    fn task(&self, name: &str, cadence: &str, timeout_secs: u64) -> Result<TaskSettings> {
        let cadence_key = format!("ORCH_{}_CADENCE", name);
        let raw = self.get(&cadence_key).unwrap_or_else(|| cadence.to_string());
        let cadence = raw
            .parse::<Cadence>()
            .with_context(|| format!("Invalid {}: {}", cadence_key, raw))?;

        let timeout_secs: u64 = self.parse(&format!("ORCH_{}_TIMEOUT_SECS", name), timeout_secs)?;
        if timeout_secs == 0 {
            bail!("ORCH_{}_TIMEOUT_SECS must be greater than zero", name);
        }

        Ok(TaskSettings {
            cadence,
            timeout: Duration::from_secs(timeout_secs),
            enabled: self.flag(&format!("ORCH_{}_ENABLED", name), true)?,
            weight: self.ratio(&format!("ORCH_{}_WEIGHT", name), 1.0)?,
            max_daily_runs: None,
        })
    }

    fn analyzer(&self) -> Result<AnalyzerConfig> {
        let defaults = AnalyzerConfig::default();

        let window_hours: i64 = self.parse("ORCH_ANALYZER_WINDOW_HOURS", 24)?;
        if window_hours <= 0 {
            bail!("ORCH_ANALYZER_WINDOW_HOURS must be greater than zero");
        }
        let max_samples: usize = self.parse("ORCH_ANALYZER_MAX_SAMPLES", defaults.max_samples_per_task)?;
        if max_samples == 0 {
            bail!("ORCH_ANALYZER_MAX_SAMPLES must be greater than zero");
        }

        let low = self.ratio("ORCH_ANALYZER_LOW_THRESHOLD", defaults.low_threshold)?;
        let high = self.ratio("ORCH_ANALYZER_HIGH_THRESHOLD", defaults.high_threshold)?;
        let disable = self.ratio("ORCH_ANALYZER_DISABLE_THRESHOLD", defaults.disable_threshold)?;
        if !(disable <= low && low <= high) {
            bail!(
                "Analyzer thresholds must satisfy disable <= low <= high (got {} / {} / {})",
                disable,
                low,
                high
            );
        }

        let posting_hours: usize = self.parse("ORCH_ANALYZER_POSTING_HOURS", defaults.posting_hours)?;
        if posting_hours > 24 {
            bail!("ORCH_ANALYZER_POSTING_HOURS must be between 0 and 24");
        }

        Ok(AnalyzerConfig {
            window: chrono::Duration::hours(window_hours),
            posting_hours,
            max_samples_per_task: max_samples,
            min_samples: self.parse("ORCH_ANALYZER_MIN_SAMPLES", defaults.min_samples)?,
            low_threshold: low,
            high_threshold: high,
            disable_threshold: disable,
            ..defaults
        })
    }
}
