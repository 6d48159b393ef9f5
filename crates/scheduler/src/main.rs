//! # harvestd
//!
//! Runs the space harvest engine in one process: node registry,
//! optimization ledger and ingestion scheduler.
//!
//! ## Usage
//! ```text
//! harvestd [config.toml]
//! ```
//!
//! Environment:
//! - `HARVEST_CONFIG`: config path when no argument is given
//! - `HARVEST_REPLAY`: JSON replay file (seed nodes, targets, canned reports)
//! - `HARVEST_MAX_CONCURRENT`: overrides `scheduler.max_concurrent`
//! - `HARVEST_HARVESTER`: overrides `scheduler.harvester_address`
//!
//! ## Replay File
//! ```json
//! {
//!   "nodes":   [{ "node_type": "storage", "capacity": 1000, "tags": ["commercial"] }],
//!   "targets": [{ "target": "https://a.example", "priority": "high", "category": "commercial" }],
//!   "reports": { "https://a.example": { "bytes_saved": 20480, "category_tags": ["ai"] } }
//! }
//! ```
//!
//! ## Startup Flow
//! 1. Load and validate configuration
//! 2. Build registry, ledger, scheduler
//! 3. Seed nodes and enqueue targets from the replay file
//! 4. Run the scheduler loop until Ctrl+C

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Notify;
use tracing::{error, info, warn, Level};

use harvest_common::{load_from_file, EngineConfig, NodeType, Priority};
use harvest_ledger::OptimizationLedger;
use harvest_node::NodeRegistry;
use harvest_scheduler::{AnalysisReport, Analyzer, AnalyzerError, IngestionScheduler};

// ════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ════════════════════════════════════════════════════════════════════════════

fn load_config() -> Result<EngineConfig> {
    let path = env::args()
        .nth(1)
        .or_else(|| env::var("HARVEST_CONFIG").ok());
    let mut config = match path {
        Some(p) => {
            info!("loading config from {}", p);
            load_from_file(&p).with_context(|| format!("failed to load {}", p))?
        }
        None => {
            info!("no config given, using defaults");
            EngineConfig::default()
        }
    };
    apply_env_overrides(&mut config, |key| env::var(key).ok())?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn apply_env_overrides(
    config: &mut EngineConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(v) = lookup("HARVEST_MAX_CONCURRENT") {
        config.scheduler.max_concurrent = v
            .trim()
            .parse()
            .with_context(|| format!("HARVEST_MAX_CONCURRENT is not a number: {}", v))?;
    }
    if let Some(v) = lookup("HARVEST_HARVESTER") {
        if v.trim().is_empty() {
            bail!("HARVEST_HARVESTER is empty");
        }
        config.scheduler.harvester_address = v;
    }
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════
// REPLAY ANALYZER
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplayFile {
    nodes: Vec<SeedNode>,
    targets: Vec<SeedTarget>,
    reports: HashMap<String, AnalysisReport>,
}

#[derive(Debug, Deserialize)]
struct SeedNode {
    node_type: NodeType,
    capacity: u64,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SeedTarget {
    target: String,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    category: Option<String>,
}

impl ReplayFile {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse replay file {}", path.display()))
    }
}

/// Serves canned reports keyed by target.
struct ReplayAnalyzer {
    reports: HashMap<String, AnalysisReport>,
}

#[async_trait]
impl Analyzer for ReplayAnalyzer {
    async fn analyze(&self, target: &str) -> Result<AnalysisReport, AnalyzerError> {
        self.reports
            .get(target)
            .cloned()
            .ok_or_else(|| AnalyzerError(format!("no recorded report for {}", target)))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MAIN
// ════════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    let replay = match env::var("HARVEST_REPLAY") {
        Ok(p) => ReplayFile::load(Path::new(&p))?,
        Err(_) => {
            warn!("HARVEST_REPLAY not set; every analysis will fail");
            ReplayFile::default()
        }
    };

    let registry = Arc::new(NodeRegistry::new(config.node_types.clone()));
    for seed in &replay.nodes {
        registry
            .create_node(seed.node_type, seed.capacity, seed.tags.clone())
            .with_context(|| format!("failed to seed {} node", seed.node_type))?;
    }
    let ledger = Arc::new(OptimizationLedger::new(
        config.rewards.clone(),
        Arc::clone(&registry),
    ));
    let analyzer = Arc::new(ReplayAnalyzer {
        reports: replay.reports,
    });
    let scheduler = Arc::new(IngestionScheduler::new(
        config.scheduler.clone(),
        analyzer,
        Arc::clone(&ledger),
    ));
    for seed in replay.targets {
        scheduler.enqueue(seed.target, seed.priority, seed.category);
    }
    info!(
        "harvestd ready: {} nodes, {} queued targets",
        registry.node_count(),
        scheduler.queue_status().pending
    );

    let shutdown = Arc::new(Notify::new());
    let handle = scheduler.start(Arc::clone(&shutdown));

    info!("running. Press Ctrl+C to shut down.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl+C: {}", e);
    }
    info!("shutdown requested");
    shutdown.notify_waiters();
    if let Err(e) = handle.await {
        error!("scheduler loop ended abnormally: {}", e);
    }

    let report = scheduler.report();
    info!(
        "final report: {}",
        serde_json::to_string(&report).context("failed to encode final report")?
    );
    let totals = ledger.totals();
    info!(
        "ledger: {} events, {} bytes, reward {:.6}, {} harvesters",
        totals.event_count, totals.total_bytes, totals.total_reward, totals.harvester_count
    );
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════
