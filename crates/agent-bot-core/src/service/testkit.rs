//! Simulated collaborators wired into a context, for unit tests.

use super::context::AgentBotContext;
use crate::adapters::{
    InMemoryAgentStore, RecordingNotifier, SimulatedAttestationClient, SimulatedLedger,
    SimulatedLedgerConfig, SimulatedUnderlyingChain,
};
use crate::config::AgentBotConfig;
use crate::domain::AgentSchedule;
use crate::ports::{LedgerClient, PersistentStore, UnitOfWork};
use std::sync::Arc;

pub(crate) struct TestBed {
    pub chain: Arc<SimulatedUnderlyingChain>,
    pub ledger: Arc<SimulatedLedger>,
    pub attestation: Arc<SimulatedAttestationClient>,
    pub store: Arc<InMemoryAgentStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub ctx: AgentBotContext,
}

impl TestBed {
    pub const AGENT: &'static str = "0xa9e470";
    pub const OWNER: &'static str = "0x0a11ce";
    pub const AGENT_UNDERLYING: &'static str = "rAgentVault";
    pub const OWNER_UNDERLYING: &'static str = "rOwner";

    pub async fn new() -> Self {
        Self::with_config(AgentBotConfig {
            owner_underlying_address: Self::OWNER_UNDERLYING.to_string(),
            ..AgentBotConfig::default()
        })
        .await
    }

    pub async fn with_config(config: AgentBotConfig) -> Self {
        let chain = Arc::new(SimulatedUnderlyingChain::default());
        let ledger = Arc::new(SimulatedLedger::new(
            SimulatedLedgerConfig::default(),
            chain.clone(),
        ));
        let attestation = Arc::new(SimulatedAttestationClient::new(chain.clone()));
        let store = Arc::new(InMemoryAgentStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        ledger.create_agent(Self::AGENT, Self::OWNER, Self::AGENT_UNDERLYING);

        let next_block = ledger.block_height().await.unwrap() + 1;
        let mut work = UnitOfWork::new();
        work.put_schedule(AgentSchedule::new(
            Self::AGENT,
            Self::AGENT_UNDERLYING,
            next_block,
        ));
        store.commit(work).await.unwrap();
        ledger.mine(1);

        let ctx = AgentBotContext::new(
            config,
            ledger.clone(),
            attestation.clone(),
            chain.clone(),
            store.clone(),
            notifier.clone(),
        );
        Self {
            chain,
            ledger,
            attestation,
            store,
            notifier,
            ctx,
        }
    }

    /// Mine enough native blocks for everything emitted so far to be final.
    pub fn settle_ledger(&self) {
        self.ledger.mine(self.ctx.config.native_finalization_blocks);
    }

    pub async fn schedule(&self) -> AgentSchedule {
        self.ctx.schedule(Self::AGENT).await.unwrap()
    }
}
