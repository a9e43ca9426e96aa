//! # Agent Bot Runner
//!
//! Steps every registered engine concurrently, once per poll interval,
//! until shutdown is signalled. Shutdown is only observed between ticks.

use crate::domain::AgentBotResult;
use crate::service::{AgentBotContext, AgentBotEngine};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Drives all agent engines of one owner.
pub struct AgentBotRunner {
    ctx: Arc<AgentBotContext>,
    engines: Vec<Arc<AgentBotEngine>>,
    poll_interval: Duration,
}

impl AgentBotRunner {
    /// Runner without engines.
    pub fn new(ctx: Arc<AgentBotContext>, poll_interval: Duration) -> Self {
        Self {
            ctx,
            engines: Vec::new(),
            poll_interval,
        }
    }

    /// Register `agent` and start stepping it.
    pub async fn add_agent(&mut self, agent: &str) -> AgentBotResult<Arc<AgentBotEngine>> {
        if let Some(engine) = self.engine(agent) {
            return Ok(engine);
        }
        let engine = Arc::new(AgentBotEngine::register(self.ctx.clone(), agent).await?);
        self.engines.push(engine.clone());
        Ok(engine)
    }

    /// Load every active agent from the store. Returns how many were added.
    pub async fn load_active_agents(&mut self) -> AgentBotResult<usize> {
        let mut added = 0;
        for agent in self.ctx.store.active_agents().await? {
            if self.engine(&agent).is_some() {
                continue;
            }
            let engine = AgentBotEngine::load(self.ctx.clone(), &agent).await?;
            self.engines.push(Arc::new(engine));
            added += 1;
        }
        info!("[runner] loaded {} active agents", added);
        Ok(added)
    }

    /// Engine of `agent`, if tracked.
    pub fn engine(&self, agent: &str) -> Option<Arc<AgentBotEngine>> {
        self.engines.iter().find(|e| e.agent() == agent).cloned()
    }

    /// Number of tracked engines.
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// True when no engine is tracked.
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// One tick of every engine. Per-agent failures are logged.
    pub async fn run_step(&self) {
        let results = join_all(self.engines.iter().map(|engine| engine.run_step())).await;
        for (engine, result) in self.engines.iter().zip(results) {
            if let Err(e) = result {
                error!("[runner] agent={} tick failed: {}", engine.agent(), e);
            }
        }
    }

    /// Tick until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[runner] running {} agents every {:?}",
            self.engines.len(),
            self.poll_interval
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.run_step().await;
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("[runner] stopped");
    }
}
