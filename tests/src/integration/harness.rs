//! Devnet fixture: simulated collaborators, a store and an engine context.

use std::sync::Arc;

use agent_bot_core::adapters::{
    InMemoryAgentStore, RecordingNotifier, SimulatedAttestationClient, SimulatedLedger,
    SimulatedLedgerConfig, SimulatedUnderlyingChain,
};
use agent_bot_core::domain::{Amount, EventWatermark, RequestId, TxId};
use agent_bot_core::{
    AgentBotConfig, AgentBotContext, AgentBotEngine, LedgerClient, MintingRecord,
    PersistentStore, RedemptionRecord, UnderlyingChainClient,
};

/// Agent vault used by single-agent scenarios.
pub const AGENT: &str = "0xa9e470";
/// Native owner of every devnet agent.
pub const OWNER: &str = "0x0a11ce";
/// Underlying address of [`AGENT`].
pub const AGENT_UNDERLYING: &str = "rAgentVault";
/// Owner's underlying address, source of top-ups.
pub const OWNER_UNDERLYING: &str = "rOwner";
/// Minter paying for reservations.
pub const MINTER_UNDERLYING: &str = "rMinter";
/// Lot size used when reserving or redeeming.
pub const LOT: Amount = 500;

pub struct Devnet {
    pub chain: Arc<SimulatedUnderlyingChain>,
    pub ledger: Arc<SimulatedLedger>,
    pub attestation: Arc<SimulatedAttestationClient>,
    pub store: Arc<InMemoryAgentStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub ctx: Arc<AgentBotContext>,
}

impl Devnet {
    pub fn new() -> Self {
        Self::with_config(AgentBotConfig {
            owner_underlying_address: OWNER_UNDERLYING.to_string(),
            ..AgentBotConfig::default()
        })
    }

    /// Devnet with [`AGENT`] created and every wallet funded.
    pub fn with_config(config: AgentBotConfig) -> Self {
        let chain = Arc::new(SimulatedUnderlyingChain::default());
        let ledger = Arc::new(SimulatedLedger::new(
            SimulatedLedgerConfig::default(),
            chain.clone(),
        ));
        let attestation = Arc::new(SimulatedAttestationClient::new(chain.clone()));
        ledger.create_agent(AGENT, OWNER, AGENT_UNDERLYING);
        chain.fund(AGENT_UNDERLYING, 1_000_000);
        chain.fund(OWNER_UNDERLYING, 1_000_000);
        chain.fund(MINTER_UNDERLYING, 1_000_000);

        let store = Arc::new(InMemoryAgentStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let ctx = Arc::new(AgentBotContext::new(
            config,
            ledger.clone(),
            attestation.clone(),
            chain.clone(),
            store.clone(),
            notifier.clone(),
        ));
        Self {
            chain,
            ledger,
            attestation,
            store,
            notifier,
            ctx,
        }
    }

    /// Register `agent` and move the ledger past the registration block.
    pub async fn register(&self, agent: &str) -> AgentBotEngine {
        let engine = AgentBotEngine::register(self.ctx.clone(), agent)
            .await
            .unwrap();
        self.ledger.mine(1);
        engine
    }

    pub async fn engine(&self) -> AgentBotEngine {
        self.register(AGENT).await
    }

    /// [`AGENT`]'s engine after its first daily scan, with a block-height
    /// proof cached. Mintings only move once one is known.
    pub async fn engine_with_block_height_proof(&self) -> AgentBotEngine {
        let engine = self.engine().await;
        engine.run_step().await.unwrap();
        self.attestation.finalize_rounds();
        engine.run_step().await.unwrap();
        assert!(engine.cached_block_height_proof().is_some());
        engine
    }

    /// Same chains, a store rebuilt from this one's persisted contents.
    pub fn restart(&self) -> Self {
        let json = self.store.to_json().unwrap();
        self.with_store(Arc::new(InMemoryAgentStore::from_json(&json).unwrap()))
    }

    pub fn with_store(&self, store: Arc<InMemoryAgentStore>) -> Self {
        let ctx = Arc::new(AgentBotContext::new(
            self.ctx.config.clone(),
            self.ledger.clone(),
            self.attestation.clone(),
            self.chain.clone(),
            store.clone(),
            self.notifier.clone(),
        ));
        Self {
            chain: self.chain.clone(),
            ledger: self.ledger.clone(),
            attestation: self.attestation.clone(),
            store,
            notifier: self.notifier.clone(),
            ctx,
        }
    }

    /// Mine enough native blocks for everything emitted so far to be final.
    pub fn settle(&self) {
        self.ledger.mine(self.ctx.config.native_finalization_blocks);
    }

    pub async fn reserve(&self, lots: u128) -> RequestId {
        let reservation = self
            .ledger
            .reserve_collateral(AGENT, "0xminter", lots * LOT)
            .await
            .unwrap();
        self.settle();
        reservation.request_id
    }

    pub async fn redeem(&self, lots: u128) -> RequestId {
        let request = self
            .ledger
            .redeem(AGENT, "0xredeemer", "rRedeemer", lots * LOT)
            .await
            .unwrap();
        self.settle();
        request.request_id
    }

    /// The minter pays the full reservation with its reference.
    pub async fn pay_minting(&self, request_id: RequestId) -> TxId {
        let minting = self.minting(request_id).await;
        self.chain
            .submit_payment(
                MINTER_UNDERLYING,
                AGENT_UNDERLYING,
                minting.total_payment(),
                Some(minting.payment_reference),
            )
            .await
            .unwrap()
    }

    pub async fn minting(&self, request_id: RequestId) -> MintingRecord {
        self.store.minting(AGENT, request_id).await.unwrap().unwrap()
    }

    pub async fn redemption(&self, request_id: RequestId) -> RedemptionRecord {
        self.store
            .redemption(AGENT, request_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn schedule_watermark(&self) -> EventWatermark {
        self.ctx.schedule(AGENT).await.unwrap().watermark
    }

    /// Redemption payments the agent made on the underlying chain.
    pub fn agent_payments_to_redeemer(&self) -> usize {
        self.chain
            .payments_from(AGENT_UNDERLYING)
            .iter()
            .filter(|tx| tx.outputs.iter().any(|(address, _)| address == "rRedeemer"))
            .count()
    }
}
