//! # Outbound Ports
//!
//! Collaborators the engine drives: the ledger, the attestation client, the
//! underlying chain, the persistent store and the operator notifier.

use crate::domain::{
    AgentBotResult, AgentSchedule, AgentSettingName, Amount, AttestationProof, CollateralClass,
    CollateralReservation, EventPosition, EventRecord, MintingRecord, PaymentReference,
    ProofOutcome, ProofRequest, RedemptionRecord, RedemptionRequest, RequestId, TxId,
    UnderlyingAddress, UnderlyingBlock, VaultAddress, MAX_BIPS,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// LEDGER
// =============================================================================

/// Asset manager settings the engine reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManagerSettings {
    /// Attestation query window (seconds).
    pub attestation_window_seconds: u64,
    /// Price factor of native tokens burned when unsticking a minting.
    pub vault_collateral_buy_for_flare_factor_bips: u64,
    /// Minimum wait before an underlying withdrawal can be confirmed.
    pub announced_underlying_confirmation_min_seconds: u64,
}

/// Agent position as reported by the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Owner native address.
    pub owner: VaultAddress,
    /// Agent underlying address.
    pub underlying_address: UnderlyingAddress,
    /// Listed for public minting.
    pub publicly_available: bool,
    /// Minted and backed (UBA).
    pub minted_uba: Amount,
    /// Reserved by open collateral reservations (UBA).
    pub reserved_uba: Amount,
    /// Being redeemed against vault collateral (UBA).
    pub redeeming_uba: Amount,
    /// Being redeemed against pool collateral (UBA).
    pub pool_redeeming_uba: Amount,
    /// Free underlying balance; negative when underfunded.
    pub free_underlying_balance_uba: i128,
    /// Vault collateral held (token wei).
    pub total_vault_collateral_wei: Amount,
    /// Pool collateral held (native wei).
    pub total_pool_collateral_nat_wei: Amount,
    /// Vault collateral not locked by positions (token wei).
    pub free_vault_collateral_wei: Amount,
}

impl AgentInfo {
    /// UBA the given collateral class must cover.
    pub fn backed_uba(&self, class: CollateralClass) -> Amount {
        let redeeming = match class {
            CollateralClass::Vault => self.redeeming_uba,
            CollateralClass::Pool => self.pool_redeeming_uba,
        };
        self.minted_uba
            .saturating_add(self.reserved_uba)
            .saturating_add(redeeming)
    }

    /// Collateral held in the given class.
    pub fn collateral_balance(&self, class: CollateralClass) -> Amount {
        match class {
            CollateralClass::Vault => self.total_vault_collateral_wei,
            CollateralClass::Pool => self.total_pool_collateral_nat_wei,
        }
    }

    /// Nothing minted, reserved or redeeming.
    pub fn has_no_backed_fassets(&self) -> bool {
        self.minted_uba == 0
            && self.reserved_uba == 0
            && self.redeeming_uba == 0
            && self.pool_redeeming_uba == 0
    }
}

/// Price and ratio parameters of one collateral class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralPrice {
    /// Collateral class.
    pub class: CollateralClass,
    /// Token wei per `price_div` UBA, numerator.
    pub price_mul: Amount,
    /// Token wei per `price_div` UBA, denominator.
    pub price_div: Amount,
    /// Minimum collateral ratio of the warning band.
    pub ccb_min_collateral_ratio_bips: u64,
}

impl CollateralPrice {
    /// Convert UBA to collateral token wei at this price.
    pub fn convert_uba_to_token_wei(&self, uba: Amount) -> Amount {
        if self.price_div == 0 {
            return 0;
        }
        uba.saturating_mul(self.price_mul) / self.price_div
    }

    /// Price with a 1:1 ratio, for tests and devnets.
    pub fn at_par(class: CollateralClass, ccb_min_collateral_ratio_bips: u64) -> Self {
        Self {
            class,
            price_mul: 1,
            price_div: 1,
            ccb_min_collateral_ratio_bips,
        }
    }
}

impl Default for AssetManagerSettings {
    fn default() -> Self {
        Self {
            attestation_window_seconds: 86_400,
            vault_collateral_buy_for_flare_factor_bips: MAX_BIPS,
            announced_underlying_confirmation_min_seconds: 60,
        }
    }
}

/// Smart-contract ledger (asset manager, agent vault, collateral pool).
#[async_trait]
pub trait LedgerClient: Send + Sync {
    // ---- chain ----

    /// Current native block number.
    async fn block_height(&self) -> AgentBotResult<u64>;

    /// Timestamp of the latest native block.
    async fn latest_timestamp(&self) -> AgentBotResult<u64>;

    /// Agent's decoded log entries in `[from_block, to_block]`.
    async fn events(
        &self,
        agent: &str,
        from_block: u64,
        to_block: u64,
    ) -> AgentBotResult<Vec<EventRecord>>;

    /// Asset manager settings.
    async fn settings(&self) -> AgentBotResult<AssetManagerSettings>;

    /// Agent position.
    async fn agent_info(&self, agent: &str) -> AgentBotResult<AgentInfo>;

    /// Price and ratios for a collateral class of the agent.
    async fn collateral_price(
        &self,
        agent: &str,
        class: CollateralClass,
    ) -> AgentBotResult<CollateralPrice>;

    // ---- minting ----

    /// Minter side: reserve collateral for `value` UBA.
    async fn reserve_collateral(
        &self,
        agent: &str,
        minter: &str,
        value: Amount,
    ) -> AgentBotResult<CollateralReservation>;

    /// Execute a minting with its payment proof.
    async fn execute_minting(
        &self,
        agent: &str,
        request_id: RequestId,
        proof: &AttestationProof,
    ) -> AgentBotResult<()>;

    /// Default a minting with a non-payment proof.
    async fn minting_payment_default(
        &self,
        agent: &str,
        request_id: RequestId,
        proof: &AttestationProof,
    ) -> AgentBotResult<()>;

    /// Close a minting whose proofs can no longer be obtained.
    async fn unstick_minting(
        &self,
        agent: &str,
        request_id: RequestId,
        proof: &AttestationProof,
        burn_nat_wei: Amount,
    ) -> AgentBotResult<()>;

    // ---- redemption ----

    /// Redeemer side: request redemption of `value` UBA.
    async fn redeem(
        &self,
        agent: &str,
        redeemer: &str,
        payment_address: &str,
        value: Amount,
    ) -> AgentBotResult<RedemptionRequest>;

    /// Confirm a redemption payment with its proof.
    async fn confirm_redemption_payment(
        &self,
        agent: &str,
        request_id: RequestId,
        proof: &AttestationProof,
    ) -> AgentBotResult<()>;

    /// Close a redemption whose proof window expired.
    async fn finish_redemption_without_payment(
        &self,
        agent: &str,
        request_id: RequestId,
        proof: &AttestationProof,
    ) -> AgentBotResult<()>;

    // ---- collateral ----

    /// Deposit vault collateral from the owner.
    async fn deposit_vault_collateral(&self, agent: &str, amount: Amount) -> AgentBotResult<()>;

    /// Buy collateral pool tokens with owner native funds.
    async fn buy_collateral_pool_tokens(&self, agent: &str, amount: Amount)
        -> AgentBotResult<()>;

    /// Owner balance of the collateral token of a class.
    async fn owner_balance(&self, owner: &str, class: CollateralClass) -> AgentBotResult<Amount>;

    // ---- timelocked announcements ----

    /// Announce vault collateral withdrawal. Returns the valid-at timestamp.
    async fn announce_vault_collateral_withdrawal(
        &self,
        agent: &str,
        amount: Amount,
    ) -> AgentBotResult<u64>;

    /// Announce pool token redemption. Returns the valid-at timestamp.
    async fn announce_pool_token_redemption(
        &self,
        agent: &str,
        amount: Amount,
    ) -> AgentBotResult<u64>;

    /// Announce exit from the available list. Returns the valid-at timestamp.
    async fn announce_exit_available(&self, agent: &str) -> AgentBotResult<u64>;

    /// Announce a setting update. Returns the valid-at timestamp.
    async fn announce_agent_setting_update(
        &self,
        agent: &str,
        setting: AgentSettingName,
        value: u128,
    ) -> AgentBotResult<u64>;

    /// Announce vault destruction. Returns the valid-at timestamp.
    async fn announce_destroy(&self, agent: &str) -> AgentBotResult<u64>;

    // ---- timelocked execution ----

    /// Withdraw announced vault collateral.
    async fn withdraw_vault_collateral(&self, agent: &str, amount: Amount) -> AgentBotResult<()>;

    /// Redeem announced pool tokens.
    async fn redeem_collateral_pool_tokens(&self, agent: &str, amount: Amount)
        -> AgentBotResult<()>;

    /// Leave the available agent list.
    async fn exit_available(&self, agent: &str) -> AgentBotResult<()>;

    /// Apply an announced setting update.
    async fn execute_agent_setting_update(
        &self,
        agent: &str,
        setting: AgentSettingName,
    ) -> AgentBotResult<()>;

    /// Destroy the vault.
    async fn destroy(&self, agent: &str) -> AgentBotResult<()>;

    // ---- pool ----

    /// Agent's pool fee balance (fasset UBA).
    async fn pool_fee_balance(&self, agent: &str) -> AgentBotResult<Amount>;

    /// Withdraw pool fees to the vault.
    async fn withdraw_pool_fees(&self, agent: &str, amount: Amount) -> AgentBotResult<()>;

    /// Burn the agent's own fassets against its backing.
    async fn self_close(&self, agent: &str, amount: Amount) -> AgentBotResult<()>;

    /// Pool tokens held by the vault.
    async fn pool_token_balance(&self, agent: &str) -> AgentBotResult<Amount>;

    /// Total pool token supply.
    async fn pool_token_total_supply(&self, agent: &str) -> AgentBotResult<Amount>;

    // ---- underlying ----

    /// Announce a withdrawal from the underlying address. Returns the
    /// announcement timestamp and the reference the payment must carry.
    async fn announce_underlying_withdrawal(
        &self,
        agent: &str,
    ) -> AgentBotResult<(u64, PaymentReference)>;

    /// Confirm an announced underlying withdrawal.
    async fn confirm_underlying_withdrawal(&self, agent: &str, tx_id: &str) -> AgentBotResult<()>;

    /// Cancel an announced underlying withdrawal.
    async fn cancel_underlying_withdrawal(&self, agent: &str) -> AgentBotResult<()>;

    /// Credit a proved underlying top-up payment to the agent.
    async fn confirm_top_up_payment(
        &self,
        agent: &str,
        proof: &AttestationProof,
    ) -> AgentBotResult<()>;

    // ---- claims ----

    /// Reward epochs claimable by an address (vault or pool).
    async fn unclaimed_reward_epochs(
        &self,
        agent: &str,
        class: CollateralClass,
    ) -> AgentBotResult<Vec<u64>>;

    /// Claim rewards for epochs.
    async fn claim_rewards(
        &self,
        agent: &str,
        class: CollateralClass,
        epochs: &[u64],
    ) -> AgentBotResult<Amount>;

    /// Airdrop distribution months claimable.
    async fn claimable_airdrop_months(
        &self,
        agent: &str,
        class: CollateralClass,
    ) -> AgentBotResult<Vec<u64>>;

    /// Claim airdrop distributions.
    async fn claim_airdrop(
        &self,
        agent: &str,
        class: CollateralClass,
        months: &[u64],
    ) -> AgentBotResult<Amount>;
}

// =============================================================================
// ATTESTATION
// =============================================================================

/// Payment proof query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentQuery {
    /// Transaction to prove.
    pub tx_id: TxId,
    /// Block the transaction is in.
    pub block_number: u64,
    /// Paying address.
    pub source: UnderlyingAddress,
    /// Receiving address.
    pub target: UnderlyingAddress,
}

/// Referenced-payment-nonexistence query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonPaymentQuery {
    /// Receiving address.
    pub destination: UnderlyingAddress,
    /// Reference the payment would carry.
    pub payment_reference: PaymentReference,
    /// Minimum amount.
    pub amount: Amount,
    /// First block of the window.
    pub first_block: u64,
    /// Last block of the window.
    pub last_block: u64,
    /// Deadline timestamp.
    pub deadline_timestamp: u64,
}

/// Attestation protocol client.
#[async_trait]
pub trait AttestationClient: Send + Sync {
    /// Request a payment proof. `None` when not yet requestable.
    async fn request_payment_proof(
        &self,
        query: &PaymentQuery,
    ) -> AgentBotResult<Option<ProofRequest>>;

    /// Request a referenced-payment-nonexistence proof.
    async fn request_referenced_payment_nonexistence_proof(
        &self,
        query: &NonPaymentQuery,
    ) -> AgentBotResult<Option<ProofRequest>>;

    /// Request a confirmed-block-height-exists proof over a query window.
    async fn request_confirmed_block_height_exists_proof(
        &self,
        query_window_seconds: u64,
    ) -> AgentBotResult<Option<ProofRequest>>;

    /// Poll a request.
    async fn obtain_proof(&self, request: &ProofRequest) -> AgentBotResult<ProofOutcome>;
}

// =============================================================================
// UNDERLYING CHAIN
// =============================================================================

/// Transaction as reported by the wallet / indexer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderlyingTransaction {
    /// Transaction id.
    pub tx_id: TxId,
    /// Including block, `None` while pending.
    pub block_number: Option<u64>,
    /// `(address, amount)` inputs.
    pub inputs: Vec<(UnderlyingAddress, Amount)>,
    /// `(address, amount)` outputs.
    pub outputs: Vec<(UnderlyingAddress, Amount)>,
    /// Payment reference carried by the transaction.
    pub reference: Option<PaymentReference>,
}

impl UnderlyingTransaction {
    /// Address of the first input.
    pub fn first_input(&self) -> Option<&UnderlyingAddress> {
        self.inputs.first().map(|(address, _)| address)
    }
}

/// Underlying chain wallet and indexer.
#[async_trait]
pub trait UnderlyingChainClient: Send + Sync {
    /// Current block number.
    async fn block_height(&self) -> AgentBotResult<u64>;

    /// Block by number.
    async fn block_at(&self, number: u64) -> AgentBotResult<Option<UnderlyingBlock>>;

    /// Transaction by id.
    async fn transaction(&self, tx_id: &str) -> AgentBotResult<Option<UnderlyingTransaction>>;

    /// Transactions carrying `reference`.
    async fn transactions_by_reference(
        &self,
        reference: &PaymentReference,
    ) -> AgentBotResult<Vec<UnderlyingTransaction>>;

    /// Sign and submit a payment.
    async fn submit_payment(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
        reference: Option<PaymentReference>,
    ) -> AgentBotResult<TxId>;

    /// Current estimated transaction fee.
    async fn transaction_fee(&self) -> AgentBotResult<Amount>;

    /// Address balance.
    async fn balance(&self, address: &str) -> AgentBotResult<Amount>;

    /// Blocks after which a transaction is final.
    fn finalization_blocks(&self) -> u64;

    /// Average block time.
    fn seconds_per_block(&self) -> u64;
}

// =============================================================================
// STORE
// =============================================================================

/// Single write in a unit of work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOperation {
    /// Insert; fails on duplicate `(agent, request_id)`.
    InsertMinting(MintingRecord),
    /// Update; fails when missing.
    UpdateMinting(MintingRecord),
    /// Insert; fails on duplicate `(agent, request_id)`.
    InsertRedemption(RedemptionRecord),
    /// Update; fails when missing.
    UpdateRedemption(RedemptionRecord),
    /// Insert or replace the agent schedule.
    PutSchedule(AgentSchedule),
}

/// Writes committed atomically.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitOfWork {
    /// Operations in order.
    pub operations: Vec<StoreOperation>,
}

impl UnitOfWork {
    /// Empty unit of work.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation.
    pub fn push(&mut self, operation: StoreOperation) -> &mut Self {
        self.operations.push(operation);
        self
    }

    /// Add a minting update.
    pub fn update_minting(&mut self, minting: MintingRecord) -> &mut Self {
        self.push(StoreOperation::UpdateMinting(minting))
    }

    /// Add a redemption update.
    pub fn update_redemption(&mut self, redemption: RedemptionRecord) -> &mut Self {
        self.push(StoreOperation::UpdateRedemption(redemption))
    }

    /// Add the schedule.
    pub fn put_schedule(&mut self, schedule: AgentSchedule) -> &mut Self {
        self.push(StoreOperation::PutSchedule(schedule))
    }

    /// True when nothing to write.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Persistent store of records and schedules.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Schedule of an agent.
    async fn agent_schedule(&self, agent: &str) -> AgentBotResult<Option<AgentSchedule>>;

    /// Agents whose schedule is active.
    async fn active_agents(&self) -> AgentBotResult<Vec<VaultAddress>>;

    /// Minting by key.
    async fn minting(
        &self,
        agent: &str,
        request_id: RequestId,
    ) -> AgentBotResult<Option<MintingRecord>>;

    /// Redemption by key.
    async fn redemption(
        &self,
        agent: &str,
        request_id: RequestId,
    ) -> AgentBotResult<Option<RedemptionRecord>>;

    /// Mintings not in Done, by request id.
    async fn open_mintings(&self, agent: &str) -> AgentBotResult<Vec<MintingRecord>>;

    /// Redemptions not in Done, by request id.
    async fn open_redemptions(&self, agent: &str) -> AgentBotResult<Vec<RedemptionRecord>>;

    /// Apply all operations or none.
    async fn commit(&self, work: UnitOfWork) -> AgentBotResult<()>;
}

// =============================================================================
// NOTIFIER
// =============================================================================

/// Notification severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational.
    Info,
    /// Needs attention.
    Warning,
    /// Needs immediate action.
    Critical,
}

/// Operator notification.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Notification {
    MintingStarted { request_id: RequestId },
    MintingExecuted { request_id: RequestId },
    SelfMintExecuted,
    MintingDeleted { request_id: RequestId },
    MintingDefaulted { request_id: RequestId },
    MintingUnstuck { request_id: RequestId, burned_nat_wei: Amount },
    MintingProofUnobtainable { request_id: RequestId },
    RedemptionStarted { request_id: RequestId },
    RedemptionPaid { request_id: RequestId, tx_id: TxId },
    RedemptionProofRequested { request_id: RequestId },
    RedemptionDefaulted { request_id: RequestId, redeemer: VaultAddress },
    RedemptionPerformed { request_id: RequestId },
    RedemptionFailed { request_id: RequestId, reason: String },
    RedemptionBlocked { request_id: RequestId },
    RedemptionExpired { request_id: RequestId },
    RedemptionProofUnobtainable { request_id: RequestId },
    BlockHeightProofUnobtainable,
    CollateralToppedUp { class: CollateralClass, amount: Amount },
    CollateralTopUpFailed { class: CollateralClass, amount: Amount },
    LowOwnerBalance { class: CollateralClass, balance: Amount },
    UnderlyingTopUpPaid { amount: Amount, tx_id: TxId },
    UnderlyingToppedUp { amount: Amount, tx_id: TxId },
    UnderlyingTopUpFailed { amount: Amount },
    LowOwnerUnderlyingBalance { balance: Amount },
    SettingUpdated { setting: AgentSettingName },
    TimelockExecuted { name: String },
    TimelockLapsed { name: String, reason: String },
    ExitedAvailable,
    DestroyAnnounced,
    AgentDestroyed,
    UnderlyingWithdrawalConfirmed { tx_id: TxId },
    UnderlyingWithdrawalCancelled,
    RewardsClaimed { class: CollateralClass, amount: Amount },
    AirdropClaimed { class: CollateralClass, amount: Amount },
    AgentInCcb { timestamp: u64 },
    LiquidationStarted { timestamp: u64 },
    LiquidationEnded,
    LiquidationPerformed { value: Amount },
    UnderlyingBalanceTooLow,
    DuplicatePayment { tx_id_1: TxId, tx_id_2: TxId },
    IllegalPayment { tx_id: TxId },
    EventDropped { position: EventPosition, event: &'static str },
}

impl Notification {
    /// Severity for routing.
    pub fn severity(&self) -> Severity {
        match self {
            Self::AgentInCcb { .. }
            | Self::LiquidationStarted { .. }
            | Self::LiquidationPerformed { .. }
            | Self::UnderlyingBalanceTooLow
            | Self::DuplicatePayment { .. }
            | Self::IllegalPayment { .. }
            | Self::CollateralTopUpFailed { .. }
            | Self::UnderlyingTopUpFailed { .. } => Severity::Critical,
            Self::MintingProofUnobtainable { .. }
            | Self::RedemptionProofUnobtainable { .. }
            | Self::BlockHeightProofUnobtainable
            | Self::RedemptionDefaulted { .. }
            | Self::RedemptionFailed { .. }
            | Self::RedemptionBlocked { .. }
            | Self::RedemptionExpired { .. }
            | Self::MintingUnstuck { .. }
            | Self::LowOwnerBalance { .. }
            | Self::LowOwnerUnderlyingBalance { .. }
            | Self::TimelockLapsed { .. }
            | Self::EventDropped { .. } => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// Operator notifier. Fire-and-forget, never retried.
pub trait Notifier: Send + Sync {
    /// Deliver a notification about `agent`.
    fn notify(&self, agent: &str, notification: Notification);
}
