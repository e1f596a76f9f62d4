//! Persona Orchestrator - Entry Point
//!
//! Runs the persona with dry-run behaviors until Ctrl-C.
//! - --character / -c PATH: persona file (overrides ORCH_CHARACTER_PATH)
//! - --json: JSON logs on stderr
//! - --once: run a single planning pass, wait for its runs, then exit
//!
//! SIGHUP reloads the persona file; an invalid file keeps the current persona.

use anyhow::Context;
use persona_orchestrator::{
    Character, CharacterRegistry, Config, DryRunContent, DryRunInteraction, EngagementAnalyzer,
    Orchestrator, SharedCharacter, SqliteEngagementStore, StrategyAdjustment, SystemClock,
    TaskAdjustment,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");
    let json_logs = args.iter().any(|a| a == "--json");
    let once = args.iter().any(|a| a == "--once");
    let character_arg = args
        .iter()
        .position(|a| a == "--character" || a == "-c")
        .map(|i| {
            args.get(i + 1)
                .map(PathBuf::from)
                .context("--character requires a path")
        })
        .transpose()?;

    if help_mode {
        println!("Persona Orchestrator v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: persona-orchestrator [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --character, -c PATH  Persona file (default: character.json)");
        println!("  --json                Log as JSON to stderr");
        println!("  --once                Run one planning pass and exit");
        println!("  --help, -h            Show this help");
        println!();
        println!("Environment variables:");
        println!("  ORCH_CHARACTER_PATH        Persona file");
        println!("  ORCH_DB_PATH               Engagement database");
        println!("  ORCH_TICK_SECS             Planning interval (default: 60)");
        println!("  ORCH_SHUTDOWN_GRACE_SECS   Grace for in-flight runs (default: 30)");
        println!("  ORCH_<TASK>_CADENCE        Cadence for INTERACTION, CONTENT, ANALYSIS");
        println!("  ORCH_CONTENT_MAX_DAILY     Daily post cap (default: 12, 0 = none)");
        println!("  RUST_LOG                   Log level (default: info)");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Persona Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(path) = character_arg {
        config.character_path = path;
    }

    let registry = Arc::new(CharacterRegistry::new());
    let character = Character::load(&config.character_path)?;
    let persona = SharedCharacter::new(registry.register(character)?);

    let store = SqliteEngagementStore::open(&config.db_path)
        .with_context(|| format!("Failed to open engagement store at {:?}", config.db_path))?;
    info!("Engagement store: {:?}", config.db_path);

    let mut orchestrator = Orchestrator::new(
        Arc::new(store),
        Arc::new(SystemClock),
        config.orchestrator_options(),
    );
    orchestrator.register_interaction(
        &config.interaction,
        Arc::new(DryRunInteraction::new(persona.clone())),
    )?;
    orchestrator.register_content(&config.content, Arc::new(DryRunContent::new(persona.clone())))?;
    orchestrator.register_analysis(
        &config.analysis,
        Arc::new(EngagementAnalyzer::with_config(config.analyzer.clone())),
    )?;

    for task in orchestrator.status().tasks {
        info!(
            "Task {} [{}] enabled={} weight={:.2} next={:?}",
            task.id, task.cadence, task.enabled, task.weight, task.next_fire
        );
    }

    if once {
        // make every task due on this pass; weights and daily caps still apply
        let mut adjustment = StrategyAdjustment::new(chrono::Utc::now());
        for task in orchestrator.scheduler().tasks() {
            adjustment.insert(
                task.id,
                TaskAdjustment {
                    reschedule_now: true,
                    ..Default::default()
                },
            );
        }
        orchestrator.adjustment_sender().send(adjustment)?;

        let dispatched = orchestrator.tick_once();
        info!("Dispatched {} tasks", dispatched.len());
        for execution in orchestrator.drain().await {
            info!("{} -> {}", execution.task_id, execution.outcome.as_str());
        }
        log_stats(&orchestrator);
        return Ok(());
    }

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let registry = Arc::clone(&registry);
        let persona = persona.clone();
        let path = config.character_path.clone();
        tokio::spawn(async move {
            let mut hangup = match signal(SignalKind::hangup()) {
                Ok(hangup) => hangup,
                Err(e) => {
                    warn!("Failed to listen for SIGHUP: {}", e);
                    return;
                }
            };
            while hangup.recv().await.is_some() {
                if let Err(e) = registry.reload(&persona, &path) {
                    warn!("Persona reload failed, keeping {}: {}", persona.current().handle, e);
                }
            }
        });
    }

    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                shutdown.shutdown();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    orchestrator.run().await;
    log_stats(&orchestrator);
    Ok(())
}

fn log_stats(orchestrator: &Orchestrator) {
    let status = orchestrator.status();
    let runner = &status.runner;
    info!(
        "Runs: {} ({} ok, {} failed, {} timed out, {} abandoned, {} overlaps skipped)",
        runner.runs, runner.successes, runner.failures, runner.timeouts, runner.abandoned, runner.overlaps
    );
    if let Some(analyzer) = status.analyzer {
        info!(
            "Analyzer: {} cycles, {} boosted, {} penalized, {} suspended, {} resumed, {} retimed",
            analyzer.cycles,
            analyzer.boosted,
            analyzer.penalized,
            analyzer.suspended,
            analyzer.resumed,
            analyzer.retimed
        );
    }
}
