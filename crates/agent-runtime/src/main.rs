//! # Agent Runtime
//!
//! Runs the lifecycle engine for the configured agent vaults.
//!
//! ## Startup Sequence
//!
//! 1. Load and validate configuration (from env)
//! 2. Install the log subscriber
//! 3. Wire the devnet collaborators into an engine context
//! 4. Load the store from `AGENT_BOT_STORE_PATH` if set
//! 5. Load persisted agents, register configured ones
//! 6. Tick until Ctrl+C, then stop between ticks and save the store
//!
//! The devnet mines one block on both chains every
//! `AGENT_BOT_DEVNET_BLOCK_INTERVAL_MS`. The store is saved after every poll
//! interval while running.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use agent_bot_core::adapters::{
    FanoutNotifier, InMemoryAgentStore, SimulatedAttestationClient, SimulatedLedger,
    SimulatedLedgerConfig, SimulatedUnderlyingChain, TracingNotifier,
};
use agent_bot_core::{AgentBotConfig, AgentBotContext, AgentBotRunner, VERSION};

use crate::config::RuntimeConfig;

/// Owner address on the devnet underlying chain.
const DEVNET_OWNER_UNDERLYING: &str = "rDevnetOwner";

struct Devnet {
    chain: Arc<SimulatedUnderlyingChain>,
    ledger: Arc<SimulatedLedger>,
}

impl Devnet {
    fn new(config: &RuntimeConfig) -> Self {
        let chain = Arc::new(SimulatedUnderlyingChain::default());
        let ledger = Arc::new(SimulatedLedger::new(
            SimulatedLedgerConfig::default(),
            chain.clone(),
        ));
        chain.fund(
            DEVNET_OWNER_UNDERLYING,
            config.devnet_initial_underlying_balance,
        );
        for agent in &config.agents {
            let underlying = format!("r{}", agent.trim_start_matches("0x"));
            ledger.create_agent(agent, &config.owner_address, &underlying);
            chain.fund(&underlying, config.devnet_initial_underlying_balance);
            info!("[devnet] created agent {} with underlying {}", agent, underlying);
        }
        Self { chain, ledger }
    }

    async fn mine(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let tip = self.chain.mine(1);
                    self.ledger.mine(1);
                    tracing::debug!("[devnet] mined underlying block {}", tip.number);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

fn open_store(config: &RuntimeConfig) -> Result<Arc<InMemoryAgentStore>> {
    let Some(path) = &config.store_path else {
        warn!("AGENT_BOT_STORE_PATH not set, state is lost on exit");
        return Ok(Arc::new(InMemoryAgentStore::new()));
    };
    let store = InMemoryAgentStore::load_or_new(path)
        .with_context(|| format!("failed to load store from {}", path.display()))?;
    info!("[store] loaded from {}", path.display());
    Ok(Arc::new(store))
}

/// Save `store` every `interval` until shutdown.
async fn persist(
    store: Arc<InMemoryAgentStore>,
    path: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = store.save_to(&path) {
                    error!("[store] save failed: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn init_logging(config: &RuntimeConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install log subscriber")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env();
    init_logging(&config)?;
    config.validate().context("invalid runtime configuration")?;

    info!("===========================================");
    info!("  FAsset Agent Runtime v{}", VERSION);
    info!("  Agents: {}", config.agents.join(", "));
    info!("===========================================");

    let mut engine_config = AgentBotConfig::from_env();
    if engine_config.owner_underlying_address.is_empty() {
        warn!(
            "AGENT_BOT_OWNER_UNDERLYING_ADDRESS not set, using devnet owner {}",
            DEVNET_OWNER_UNDERLYING
        );
        engine_config.owner_underlying_address = DEVNET_OWNER_UNDERLYING.to_string();
    }
    engine_config
        .validate()
        .context("invalid engine configuration")?;

    let devnet = Devnet::new(&config);
    let store = open_store(&config)?;
    let ctx = Arc::new(AgentBotContext::new(
        engine_config,
        devnet.ledger.clone(),
        Arc::new(SimulatedAttestationClient::new(devnet.chain.clone())),
        devnet.chain.clone(),
        store.clone(),
        Arc::new(FanoutNotifier::new(vec![Arc::new(TracingNotifier)])),
    ));

    let mut runner = AgentBotRunner::new(ctx, config.poll_interval());
    runner
        .load_active_agents()
        .await
        .context("failed to load agents from store")?;
    for agent in &config.agents {
        runner
            .add_agent(agent)
            .await
            .with_context(|| format!("failed to register agent {agent}"))?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let miner = tokio::spawn(devnet.mine(config.devnet_block_interval(), shutdown_rx.clone()));
    let saver = config.store_path.clone().map(|path| {
        tokio::spawn(persist(
            store.clone(),
            path,
            config.poll_interval(),
            shutdown_rx.clone(),
        ))
    });
    let engines = tokio::spawn(async move { runner.run(shutdown_rx).await });

    info!("Agent runtime is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Shutting down after the current tick");
    shutdown_tx.send(true).context("shutdown channel closed")?;

    if let Err(e) = engines.await {
        error!("[runner] task failed: {}", e);
    }
    if let Err(e) = miner.await {
        error!("[devnet] task failed: {}", e);
    }
    if let Some(saver) = saver {
        if let Err(e) = saver.await {
            error!("[store] task failed: {}", e);
        }
    }
    // engines have stopped between ticks, nothing writes after this
    if let Some(path) = &config.store_path {
        store
            .save_to(path)
            .with_context(|| format!("failed to save store to {}", path.display()))?;
        info!("[store] saved to {}", path.display());
    }
    info!("Agent runtime stopped");
    Ok(())
}
