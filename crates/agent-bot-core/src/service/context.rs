//! Collaborators and configuration shared by every agent engine.

use crate::config::AgentBotConfig;
use crate::domain::{AgentBotError, AgentBotResult, AgentSchedule, UnderlyingBlock};
use crate::ports::{
    AttestationClient, LedgerClient, Notification, Notifier, PersistentStore, UnderlyingChainClient,
    UnitOfWork,
};
use std::sync::Arc;

/// Explicit dependency bundle passed into the engine.
#[derive(Clone)]
pub struct AgentBotContext {
    /// Engine configuration.
    pub config: AgentBotConfig,
    /// Smart-contract ledger.
    pub ledger: Arc<dyn LedgerClient>,
    /// Attestation client.
    pub attestation: Arc<dyn AttestationClient>,
    /// Underlying chain wallet and indexer.
    pub underlying: Arc<dyn UnderlyingChainClient>,
    /// Persistent store.
    pub store: Arc<dyn PersistentStore>,
    /// Operator notifier.
    pub notifier: Arc<dyn Notifier>,
}

impl AgentBotContext {
    /// Bundle the collaborators.
    pub fn new(
        config: AgentBotConfig,
        ledger: Arc<dyn LedgerClient>,
        attestation: Arc<dyn AttestationClient>,
        underlying: Arc<dyn UnderlyingChainClient>,
        store: Arc<dyn PersistentStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            ledger,
            attestation,
            underlying,
            store,
            notifier,
        }
    }

    /// Latest block of the underlying chain.
    pub async fn latest_underlying_block(&self) -> AgentBotResult<UnderlyingBlock> {
        let height = self.underlying.block_height().await?;
        self.underlying
            .block_at(height)
            .await?
            .ok_or_else(|| AgentBotError::Underlying(format!("block {height} not available")))
    }

    /// Schedule of a registered agent.
    pub async fn schedule(&self, agent: &str) -> AgentBotResult<AgentSchedule> {
        self.store
            .agent_schedule(agent)
            .await?
            .ok_or_else(|| AgentBotError::AgentNotFound {
                agent: agent.to_string(),
            })
    }

    /// Persist a schedule on its own.
    pub async fn commit_schedule(&self, schedule: &AgentSchedule) -> AgentBotResult<()> {
        let mut work = UnitOfWork::new();
        work.put_schedule(schedule.clone());
        self.store.commit(work).await
    }

    pub(crate) fn notify(&self, agent: &str, notification: Notification) {
        self.notifier.notify(agent, notification);
    }
}
