use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use swarm_core::{
    EvolutionEngine, GenerationReport, ReasoningBridge, RuntimeEvaluator, SwarmManager, SwarmMode,
    SwarmStore,
};
use swarm_hub::{GatewayClient, HubClient};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "swarm")]
#[command(version)]
#[command(about = "Niche-routed agent swarm with Hub-coordinated team evolution")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config and create the data directory
    Init,

    /// Print the loaded configuration (secrets masked)
    Config,

    /// Register with the Hub and create the workspace and per-niche problems
    Bootstrap,

    /// Run evolution generations until stopped
    Evolve {
        /// Stop after this many generations
        #[arg(short, long)]
        generations: Option<u64>,

        /// Seconds between generations (overrides config)
        #[arg(short, long)]
        interval_secs: Option<u64>,
    },

    /// Show routing counters, agents and the elite archive
    Stats {
        /// Print the raw registry as JSON
        #[arg(long)]
        json: bool,
    },

    /// Switch between single-agent and niche routing
    Mode {
        /// single or swarm
        mode: SwarmMode,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config),
        Commands::Bootstrap => cmd_bootstrap(&cli.config).await,
        Commands::Evolve {
            generations,
            interval_secs,
        } => cmd_evolve(&cli.config, generations, interval_secs).await,
        Commands::Stats { json } => cmd_stats(&cli.config, json),
        Commands::Mode { mode } => cmd_mode(&cli.config, mode).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        tokio::fs::write(&config_path, config::DEFAULT_CONFIG).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))?;
        }
        info!("Created default config at {}", config_path.display());
    }

    let cfg = CliConfig::parse(config::DEFAULT_CONFIG)?;
    let store = open_store(&cfg)?;

    println!("Swarm initialized at {}", config_dir.display());
    println!("Registry: {}", store.path().display());
    println!("Edit {} to point at your Hub and runtime.", config_path.display());
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = CliConfig::load(config_path)?;
    println!("{}", cfg.to_masked_toml()?);
    Ok(())
}

fn open_store(cfg: &CliConfig) -> Result<Arc<SwarmStore>> {
    let data_dir = cfg.storage.data_path();
    let store = SwarmStore::open(&data_dir)
        .with_context(|| format!("Failed to open swarm registry in {}", data_dir.display()))?;
    Ok(Arc::new(store))
}

fn build_engine(cfg: &CliConfig, store: Arc<SwarmStore>) -> Result<EvolutionEngine> {
    let hub = HubClient::new(cfg.hub.clone()).context("Failed to create Hub client")?;
    let evaluator =
        RuntimeEvaluator::new(cfg.runtime.clone()).context("Failed to create runtime evaluator")?;

    let mut engine = EvolutionEngine::new(
        store.clone(),
        Arc::new(hub),
        Arc::new(evaluator),
        cfg.evolution.clone(),
    );

    if let Some(gateway_cfg) = &cfg.gateway {
        let gateway =
            GatewayClient::new(gateway_cfg.clone()).context("Failed to create Gateway client")?;
        engine = engine.with_bridge(ReasoningBridge::new(Arc::new(gateway), store));
        info!("Generation traces enabled via {}", gateway_cfg.url);
    }

    Ok(engine)
}

async fn cmd_bootstrap(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = CliConfig::load(config_path)?;
    let store = open_store(&cfg)?;
    let engine = build_engine(&cfg, store.clone())?;
    let niches = cfg.scheduler.niches();

    engine
        .initialize_archive(&niches)
        .await
        .context("Failed to initialize archive on the Hub")?;

    println!(
        "Hub agent:     {}",
        store.hub_agent_id().unwrap_or_else(|| "-".to_string())
    );
    println!(
        "Hub workspace: {}",
        store.hub_workspace_id().unwrap_or_else(|| "-".to_string())
    );
    for niche in &niches {
        println!(
            "  {:<28} problem {}",
            niche.key,
            store.niche_problem(&niche.key).unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

async fn cmd_evolve(
    config_path: &Option<PathBuf>,
    generations: Option<u64>,
    interval_secs: Option<u64>,
) -> Result<()> {
    let cfg = CliConfig::load(config_path)?;
    let store = open_store(&cfg)?;
    let engine = build_engine(&cfg, store.clone())?;
    let manager = SwarmManager::new(store.clone(), cfg.queue.clone());
    let niches = cfg.scheduler.niches();
    let interval = Duration::from_secs(interval_secs.unwrap_or(cfg.scheduler.interval_secs));

    engine
        .initialize_archive(&niches)
        .await
        .context("Failed to initialize archive on the Hub")?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping after the current generation...");
            signal_token.cancel();
        }
    });

    info!(
        "Evolving {} niches every {}s{}",
        niches.len(),
        interval.as_secs(),
        generations
            .map(|n| format!(" for {} generations", n))
            .unwrap_or_default()
    );

    let mut completed = 0u64;
    loop {
        match engine.run_generation(&niches).await {
            Ok(report) => staff_promotions(&manager, &report).await,
            Err(e) => error!("Generation failed: {}", e),
        }
        completed += 1;

        if generations.is_some_and(|n| completed >= n) || cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Evolution stopped after {} generations", completed);
    Ok(())
}

/// Point every promoted niche's worker at its new elite, creating workers as needed
async fn staff_promotions(manager: &SwarmManager, report: &GenerationReport) {
    for (niche, blueprint_id) in report.promotions() {
        if let Err(e) = manager.staff_niche(niche, blueprint_id).await {
            error!("Failed to staff niche {}: {}", niche.key, e);
        }
    }
}

fn cmd_stats(config_path: &Option<PathBuf>, json: bool) -> Result<()> {
    let cfg = CliConfig::load(config_path)?;
    let store = open_store(&cfg)?;
    let registry = store.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&registry)?);
        return Ok(());
    }

    println!("Mode:        {}", registry.mode);
    println!("Generation:  {}", registry.generation);
    println!(
        "Routing:     {} served, {} fallback",
        registry.route_stats.success, registry.route_stats.fallback
    );

    println!("\nAgents ({}):", registry.agents.len());
    for agent in &registry.agents {
        println!(
            "  {:<28} {} (blueprint {})",
            agent.niche_key, agent.agent_id, agent.blueprint_id
        );
    }

    println!("\nArchive ({} cells):", registry.archive.len());
    for (key, elite) in &registry.archive {
        println!(
            "  {:<28} gen {:<4} composite {:.3}  {} agents, {}",
            key,
            elite.generation,
            elite.fitness.composite,
            elite.agents.len(),
            elite.coordination_strategy
        );
    }

    let unserved: Vec<_> = registry
        .route_stats
        .niches
        .iter()
        .filter(|(_, s)| s.unserved > 0)
        .collect();
    if !unserved.is_empty() {
        println!("\nUnserved niches:");
        for (key, stats) in unserved {
            let last = stats
                .last_unserved_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            println!("  {:<28} {} misses, last {}", key, stats.unserved, last);
        }
    }
    Ok(())
}

async fn cmd_mode(config_path: &Option<PathBuf>, mode: SwarmMode) -> Result<()> {
    let cfg = CliConfig::load(config_path)?;
    let store = open_store(&cfg)?;
    store.set_mode(mode).await?;
    println!("Mode set to {}", mode);
    Ok(())
}
