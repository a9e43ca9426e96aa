//! Deterministic asset-manager ledger for tests and devnets.
//!
//! Keeps per-agent positions, emits [`LedgerEvent`]s into a block log and
//! records every state-changing call so tests can assert exactly-once
//! behavior. Rejections can be injected per method.

use super::simulated_chain::SimulatedUnderlyingChain;
use crate::algorithms::payment_reference;
use crate::domain::{
    AgentBotError, AgentBotResult, AgentSettingName, Amount, AttestationProof, CollateralClass,
    CollateralReservation, EventRecord, LedgerEvent, PaymentReference, ProofBody, RedemptionRequest,
    RequestId, TxId, MAX_BIPS,
};
use crate::ports::{AgentInfo, AssetManagerSettings, CollateralPrice, LedgerClient};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Ledger parameters.
#[derive(Clone, Debug)]
pub struct SimulatedLedgerConfig {
    /// Seconds per native block.
    pub block_seconds: u64,
    /// Minting fee.
    pub minting_fee_bips: u64,
    /// Redemption fee.
    pub redemption_fee_bips: u64,
    /// Underlying blocks a minter has to pay.
    pub payment_window_blocks: u64,
    /// Underlying seconds a minter has to pay.
    pub payment_window_seconds: u64,
    /// Withdrawal and pool token redemption timelock.
    pub withdrawal_wait_seconds: u64,
    /// Setting update timelock.
    pub setting_update_wait_seconds: u64,
    /// Exit available timelock.
    pub exit_wait_seconds: u64,
    /// Destroy timelock.
    pub destroy_wait_seconds: u64,
    /// Reward per claimed epoch or airdrop month.
    pub reward_per_claim: Amount,
    /// Asset manager settings.
    pub settings: AssetManagerSettings,
}

impl Default for SimulatedLedgerConfig {
    fn default() -> Self {
        Self {
            block_seconds: 2,
            minting_fee_bips: 100,
            redemption_fee_bips: 100,
            payment_window_blocks: 10,
            payment_window_seconds: 100,
            withdrawal_wait_seconds: 60,
            setting_update_wait_seconds: 120,
            exit_wait_seconds: 60,
            destroy_wait_seconds: 300,
            reward_per_claim: 1_000,
            settings: AssetManagerSettings::default(),
        }
    }
}

/// One recorded state-changing call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerCall {
    /// Agent vault.
    pub agent: String,
    /// Contract method.
    pub method: &'static str,
    /// Request id, for minting/redemption calls.
    pub request_id: Option<RequestId>,
    /// Amount argument, when any.
    pub amount: Option<Amount>,
}

#[derive(Clone, Debug, Default)]
struct SimulatedAgent {
    info: AgentInfo,
    pool_fee_balance: Amount,
    pool_token_balance: Amount,
    pool_token_supply: Amount,
    settings: HashMap<AgentSettingName, u128>,
    announcements: HashMap<&'static str, (u64, Amount)>,
    reservations: HashMap<RequestId, Amount>,
    redemptions: HashMap<RequestId, (Amount, String)>,
    unclaimed_epochs: HashMap<CollateralClass, Vec<u64>>,
    airdrop_months: HashMap<CollateralClass, Vec<u64>>,
    underlying_withdrawal: Option<PaymentReference>,
    confirmed_top_ups: HashSet<TxId>,
    destroyed: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    height: u64,
    timestamp: u64,
    next_log_index: u64,
    next_request_id: RequestId,
    next_announcement_id: u64,
    log: Vec<(String, EventRecord)>,
    agents: HashMap<String, SimulatedAgent>,
    prices: HashMap<CollateralClass, CollateralPrice>,
    owner_balances: HashMap<(String, CollateralClass), Amount>,
    calls: Vec<LedgerCall>,
    rejections: HashMap<&'static str, String>,
    transient_failures: HashMap<&'static str, u32>,
}

/// In-memory ledger.
pub struct SimulatedLedger {
    config: SimulatedLedgerConfig,
    chain: Arc<SimulatedUnderlyingChain>,
    state: RwLock<LedgerState>,
}

impl SimulatedLedger {
    /// Ledger at block 1 whose reservations reference `chain`'s tip.
    pub fn new(config: SimulatedLedgerConfig, chain: Arc<SimulatedUnderlyingChain>) -> Self {
        let mut prices = HashMap::new();
        for class in CollateralClass::ALL {
            prices.insert(class, CollateralPrice::at_par(class, 15_000));
        }
        Self {
            state: RwLock::new(LedgerState {
                height: 1,
                timestamp: chain.tip().timestamp,
                next_request_id: 1,
                next_announcement_id: 1,
                prices,
                ..LedgerState::default()
            }),
            config,
            chain,
        }
    }

    /// Register an agent with an underlying address and owner.
    pub fn create_agent(&self, agent: &str, owner: &str, underlying_address: &str) {
        let info = AgentInfo {
            owner: owner.to_string(),
            underlying_address: underlying_address.to_string(),
            publicly_available: true,
            ..AgentInfo::default()
        };
        self.state.write().agents.insert(
            agent.to_string(),
            SimulatedAgent {
                info,
                ..SimulatedAgent::default()
            },
        );
    }

    /// Mine `count` native blocks.
    pub fn mine(&self, count: u64) {
        let mut state = self.state.write();
        state.height += count;
        state.timestamp += count * self.config.block_seconds;
        state.next_log_index = 0;
    }

    /// Move ledger time forward without mining.
    pub fn advance_time(&self, seconds: u64) {
        self.state.write().timestamp += seconds;
    }

    /// Append an event to the log of `agent` in the current block.
    pub fn emit(&self, agent: &str, event: LedgerEvent) -> EventRecord {
        let mut state = self.state.write();
        Self::emit_locked(&mut state, agent, event)
    }

    fn emit_locked(state: &mut LedgerState, agent: &str, event: LedgerEvent) -> EventRecord {
        let record = EventRecord::new(state.height, state.next_log_index, event);
        state.next_log_index += 1;
        state.log.push((agent.to_string(), record.clone()));
        record
    }

    /// Replace the agent's position.
    pub fn update_agent_info(&self, agent: &str, update: impl FnOnce(&mut AgentInfo)) {
        if let Some(simulated) = self.state.write().agents.get_mut(agent) {
            update(&mut simulated.info);
        }
    }

    /// Set a collateral price.
    pub fn set_price(&self, price: CollateralPrice) {
        self.state.write().prices.insert(price.class, price);
    }

    /// Set an owner's collateral token balance.
    pub fn set_owner_balance(&self, owner: &str, class: CollateralClass, amount: Amount) {
        self.state
            .write()
            .owner_balances
            .insert((owner.to_string(), class), amount);
    }

    /// Set pool fee balance and pool token holdings.
    pub fn set_pool(&self, agent: &str, fee_balance: Amount, token_balance: Amount, supply: Amount) {
        if let Some(simulated) = self.state.write().agents.get_mut(agent) {
            simulated.pool_fee_balance = fee_balance;
            simulated.pool_token_balance = token_balance;
            simulated.pool_token_supply = supply;
        }
    }

    /// Make reward epochs and airdrop months claimable.
    pub fn set_claimable(&self, agent: &str, class: CollateralClass, epochs: Vec<u64>, months: Vec<u64>) {
        if let Some(simulated) = self.state.write().agents.get_mut(agent) {
            simulated.unclaimed_epochs.insert(class, epochs);
            simulated.airdrop_months.insert(class, months);
        }
    }

    /// Reject calls to `method` with `reason` until cleared.
    pub fn reject(&self, method: &'static str, reason: &str) {
        self.state.write().rejections.insert(method, reason.to_string());
    }

    /// Stop rejecting `method`.
    pub fn clear_rejection(&self, method: &'static str) {
        self.state.write().rejections.remove(method);
    }

    /// Fail the next `count` calls to `method` with a transient error.
    pub fn fail_next(&self, method: &'static str, count: u32) {
        self.state.write().transient_failures.insert(method, count);
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<LedgerCall> {
        self.state.read().calls.clone()
    }

    /// Number of recorded calls to `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .read()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Current setting value.
    pub fn setting(&self, agent: &str, setting: AgentSettingName) -> Option<u128> {
        self.state
            .read()
            .agents
            .get(agent)
            .and_then(|a| a.settings.get(&setting).copied())
    }

    /// Current position.
    pub fn info(&self, agent: &str) -> Option<AgentInfo> {
        self.state.read().agents.get(agent).map(|a| a.info.clone())
    }

    /// True once `destroy` succeeded.
    pub fn is_destroyed(&self, agent: &str) -> bool {
        self.state
            .read()
            .agents
            .get(agent)
            .map_or(false, |a| a.destroyed)
    }

    /// Records the call, then applies injected failures.
    fn enter(
        state: &mut LedgerState,
        agent: &str,
        method: &'static str,
        request_id: Option<RequestId>,
        amount: Option<Amount>,
    ) -> AgentBotResult<()> {
        if let Some(remaining) = state.transient_failures.get_mut(method) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AgentBotError::Ledger(format!("{method}: rpc timeout")));
            }
        }
        if let Some(reason) = state.rejections.get(method) {
            return Err(AgentBotError::LedgerRejected {
                action: method.to_string(),
                reason: reason.clone(),
            });
        }
        state.calls.push(LedgerCall {
            agent: agent.to_string(),
            method,
            request_id,
            amount,
        });
        Ok(())
    }

    fn agent_mut<'a>(
        state: &'a mut LedgerState,
        agent: &str,
    ) -> AgentBotResult<&'a mut SimulatedAgent> {
        state
            .agents
            .get_mut(agent)
            .filter(|a| !a.destroyed)
            .ok_or_else(|| AgentBotError::LedgerRejected {
                action: "agent".to_string(),
                reason: format!("invalid agent vault address {agent}"),
            })
    }

    fn rejected(action: &str, reason: &str) -> AgentBotError {
        AgentBotError::LedgerRejected {
            action: action.to_string(),
            reason: reason.to_string(),
        }
    }

    fn require_body(proof: &AttestationProof, action: &str, payment: bool) -> AgentBotResult<()> {
        let matches = match proof.body {
            ProofBody::Payment { .. } => payment,
            ProofBody::ReferencedPaymentNonexistence { .. } => !payment,
            ProofBody::ConfirmedBlockHeightExists { .. } => false,
        };
        if matches {
            Ok(())
        } else {
            Err(Self::rejected(action, "invalid proof type"))
        }
    }

    fn announce(
        &self,
        agent: &str,
        method: &'static str,
        entry: &'static str,
        wait: u64,
        amount: Amount,
    ) -> AgentBotResult<u64> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, method, None, Some(amount))?;
        let valid_at = state.timestamp + wait;
        Self::agent_mut(&mut state, agent)?
            .announcements
            .insert(entry, (valid_at, amount));
        Ok(valid_at)
    }

    fn take_announcement(
        state: &mut LedgerState,
        agent: &str,
        entry: &'static str,
        action: &str,
    ) -> AgentBotResult<Amount> {
        let now = state.timestamp;
        let simulated = Self::agent_mut(state, agent)?;
        let (valid_at, amount) = simulated
            .announcements
            .get(entry)
            .copied()
            .ok_or_else(|| Self::rejected(action, "not announced"))?;
        if now < valid_at {
            return Err(Self::rejected(action, "not allowed yet"));
        }
        simulated.announcements.remove(entry);
        Ok(amount)
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn block_height(&self) -> AgentBotResult<u64> {
        Ok(self.state.read().height)
    }

    async fn latest_timestamp(&self) -> AgentBotResult<u64> {
        Ok(self.state.read().timestamp)
    }

    async fn events(
        &self,
        agent: &str,
        from_block: u64,
        to_block: u64,
    ) -> AgentBotResult<Vec<EventRecord>> {
        let mut state = self.state.write();
        if let Some(remaining) = state.transient_failures.get_mut("events") {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AgentBotError::Ledger("events: rpc timeout".to_string()));
            }
        }
        Ok(state
            .log
            .iter()
            .filter(|(owner, record)| {
                owner == agent
                    && record.position.block_number >= from_block
                    && record.position.block_number <= to_block
            })
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn settings(&self) -> AgentBotResult<AssetManagerSettings> {
        Ok(self.config.settings.clone())
    }

    async fn agent_info(&self, agent: &str) -> AgentBotResult<AgentInfo> {
        let mut state = self.state.write();
        Ok(Self::agent_mut(&mut state, agent)?.info.clone())
    }

    async fn collateral_price(
        &self,
        _agent: &str,
        class: CollateralClass,
    ) -> AgentBotResult<CollateralPrice> {
        self.state
            .read()
            .prices
            .get(&class)
            .cloned()
            .ok_or_else(|| AgentBotError::Ledger(format!("no price for {class:?}")))
    }

    async fn reserve_collateral(
        &self,
        agent: &str,
        minter: &str,
        value: Amount,
    ) -> AgentBotResult<CollateralReservation> {
        let tip = self.chain.tip();
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "reserveCollateral", None, Some(value))?;
        let request_id = state.next_request_id;
        state.next_request_id += 1;
        let reservation = CollateralReservation {
            request_id,
            minter: minter.to_string(),
            value,
            fee: value * Amount::from(self.config.minting_fee_bips) / Amount::from(MAX_BIPS),
            first_underlying_block: tip.number,
            last_underlying_block: tip.number + self.config.payment_window_blocks,
            last_underlying_timestamp: tip.timestamp + self.config.payment_window_seconds,
            payment_reference: payment_reference::minting(request_id),
        };
        let simulated = Self::agent_mut(&mut state, agent)?;
        simulated.info.reserved_uba += value;
        simulated.reservations.insert(request_id, value);
        Self::emit_locked(
            &mut state,
            agent,
            LedgerEvent::CollateralReserved(reservation.clone()),
        );
        Ok(reservation)
    }

    async fn execute_minting(
        &self,
        agent: &str,
        request_id: RequestId,
        proof: &AttestationProof,
    ) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "executeMinting", Some(request_id), None)?;
        Self::require_body(proof, "executeMinting", true)?;
        let simulated = Self::agent_mut(&mut state, agent)?;
        let value = simulated
            .reservations
            .remove(&request_id)
            .ok_or_else(|| Self::rejected("executeMinting", "invalid crt id"))?;
        simulated.info.reserved_uba -= value;
        simulated.info.minted_uba += value;
        Self::emit_locked(
            &mut state,
            agent,
            LedgerEvent::MintingExecuted {
                request_id: Some(request_id),
            },
        );
        Ok(())
    }

    async fn minting_payment_default(
        &self,
        agent: &str,
        request_id: RequestId,
        proof: &AttestationProof,
    ) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "mintingPaymentDefault", Some(request_id), None)?;
        Self::require_body(proof, "mintingPaymentDefault", false)?;
        let simulated = Self::agent_mut(&mut state, agent)?;
        let value = simulated
            .reservations
            .remove(&request_id)
            .ok_or_else(|| Self::rejected("mintingPaymentDefault", "invalid crt id"))?;
        simulated.info.reserved_uba -= value;
        Ok(())
    }

    async fn unstick_minting(
        &self,
        agent: &str,
        request_id: RequestId,
        _proof: &AttestationProof,
        burn_nat_wei: Amount,
    ) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "unstickMinting", Some(request_id), Some(burn_nat_wei))?;
        let simulated = Self::agent_mut(&mut state, agent)?;
        let value = simulated
            .reservations
            .remove(&request_id)
            .ok_or_else(|| Self::rejected("unstickMinting", "invalid crt id"))?;
        simulated.info.reserved_uba -= value;
        Ok(())
    }

    async fn redeem(
        &self,
        agent: &str,
        redeemer: &str,
        payment_address: &str,
        value: Amount,
    ) -> AgentBotResult<RedemptionRequest> {
        let tip = self.chain.tip();
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "redeem", None, Some(value))?;
        let request_id = state.next_request_id;
        state.next_request_id += 1;
        let request = RedemptionRequest {
            request_id,
            redeemer: redeemer.to_string(),
            payment_address: payment_address.to_string(),
            value,
            fee: value * Amount::from(self.config.redemption_fee_bips) / Amount::from(MAX_BIPS),
            last_underlying_block: tip.number + self.config.payment_window_blocks,
            last_underlying_timestamp: tip.timestamp + self.config.payment_window_seconds,
            payment_reference: payment_reference::redemption(request_id),
        };
        let simulated = Self::agent_mut(&mut state, agent)?;
        simulated.info.minted_uba = simulated.info.minted_uba.saturating_sub(value);
        simulated.info.redeeming_uba += value;
        simulated
            .redemptions
            .insert(request_id, (value, redeemer.to_string()));
        Self::emit_locked(
            &mut state,
            agent,
            LedgerEvent::RedemptionRequested(request.clone()),
        );
        Ok(request)
    }

    async fn confirm_redemption_payment(
        &self,
        agent: &str,
        request_id: RequestId,
        proof: &AttestationProof,
    ) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "confirmRedemptionPayment", Some(request_id), None)?;
        Self::require_body(proof, "confirmRedemptionPayment", true)?;
        let simulated = Self::agent_mut(&mut state, agent)?;
        let (value, redeemer) = simulated
            .redemptions
            .remove(&request_id)
            .ok_or_else(|| Self::rejected("confirmRedemptionPayment", "invalid request id"))?;
        simulated.info.redeeming_uba -= value;
        let spent = match &proof.body {
            ProofBody::Payment { received_amount, .. } => *received_amount,
            _ => 0,
        };
        simulated.info.free_underlying_balance_uba -= i128::try_from(spent).unwrap_or(i128::MAX);
        Self::emit_locked(
            &mut state,
            agent,
            LedgerEvent::RedemptionPerformed {
                request_id,
                redeemer,
            },
        );
        Ok(())
    }

    async fn finish_redemption_without_payment(
        &self,
        agent: &str,
        request_id: RequestId,
        _proof: &AttestationProof,
    ) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(
            &mut state,
            agent,
            "finishRedemptionWithoutPayment",
            Some(request_id),
            None,
        )?;
        let simulated = Self::agent_mut(&mut state, agent)?;
        let (value, redeemer) = simulated.redemptions.remove(&request_id).ok_or_else(|| {
            Self::rejected("finishRedemptionWithoutPayment", "invalid request id")
        })?;
        simulated.info.redeeming_uba -= value;
        Self::emit_locked(
            &mut state,
            agent,
            LedgerEvent::RedemptionDefault {
                request_id,
                redeemer,
            },
        );
        Ok(())
    }

    async fn deposit_vault_collateral(&self, agent: &str, amount: Amount) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "depositVaultCollateral", None, Some(amount))?;
        let owner = Self::agent_mut(&mut state, agent)?.info.owner.clone();
        let key = (owner, CollateralClass::Vault);
        let balance = state.owner_balances.get(&key).copied().unwrap_or_default();
        if balance < amount {
            return Err(Self::rejected("depositVaultCollateral", "insufficient balance"));
        }
        state.owner_balances.insert(key, balance - amount);
        let simulated = Self::agent_mut(&mut state, agent)?;
        simulated.info.total_vault_collateral_wei += amount;
        simulated.info.free_vault_collateral_wei += amount;
        Ok(())
    }

    async fn buy_collateral_pool_tokens(
        &self,
        agent: &str,
        amount: Amount,
    ) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "buyCollateralPoolTokens", None, Some(amount))?;
        let owner = Self::agent_mut(&mut state, agent)?.info.owner.clone();
        let key = (owner, CollateralClass::Pool);
        let balance = state.owner_balances.get(&key).copied().unwrap_or_default();
        if balance < amount {
            return Err(Self::rejected("buyCollateralPoolTokens", "insufficient balance"));
        }
        state.owner_balances.insert(key, balance - amount);
        let simulated = Self::agent_mut(&mut state, agent)?;
        simulated.info.total_pool_collateral_nat_wei += amount;
        simulated.pool_token_balance += amount;
        simulated.pool_token_supply += amount;
        Ok(())
    }

    async fn owner_balance(&self, owner: &str, class: CollateralClass) -> AgentBotResult<Amount> {
        Ok(self
            .state
            .read()
            .owner_balances
            .get(&(owner.to_string(), class))
            .copied()
            .unwrap_or_default())
    }

    async fn announce_vault_collateral_withdrawal(
        &self,
        agent: &str,
        amount: Amount,
    ) -> AgentBotResult<u64> {
        self.announce(
            agent,
            "announceVaultCollateralWithdrawal",
            "vaultWithdrawal",
            self.config.withdrawal_wait_seconds,
            amount,
        )
    }

    async fn announce_pool_token_redemption(
        &self,
        agent: &str,
        amount: Amount,
    ) -> AgentBotResult<u64> {
        self.announce(
            agent,
            "announcePoolTokenRedemption",
            "poolRedemption",
            self.config.withdrawal_wait_seconds,
            amount,
        )
    }

    async fn announce_exit_available(&self, agent: &str) -> AgentBotResult<u64> {
        self.announce(
            agent,
            "announceExitAvailable",
            "exit",
            self.config.exit_wait_seconds,
            0,
        )
    }

    async fn announce_agent_setting_update(
        &self,
        agent: &str,
        setting: AgentSettingName,
        value: u128,
    ) -> AgentBotResult<u64> {
        self.announce(
            agent,
            "announceAgentSettingUpdate",
            setting.as_str(),
            self.config.setting_update_wait_seconds,
            value,
        )
    }

    async fn announce_destroy(&self, agent: &str) -> AgentBotResult<u64> {
        self.announce(
            agent,
            "announceDestroy",
            "destroy",
            self.config.destroy_wait_seconds,
            0,
        )
    }

    async fn withdraw_vault_collateral(&self, agent: &str, amount: Amount) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "withdrawVaultCollateral", None, Some(amount))?;
        let announced =
            Self::take_announcement(&mut state, agent, "vaultWithdrawal", "withdrawVaultCollateral")?;
        let simulated = Self::agent_mut(&mut state, agent)?;
        let amount = amount.min(announced).min(simulated.info.total_vault_collateral_wei);
        simulated.info.total_vault_collateral_wei -= amount;
        simulated.info.free_vault_collateral_wei =
            simulated.info.free_vault_collateral_wei.saturating_sub(amount);
        let owner = simulated.info.owner.clone();
        *state
            .owner_balances
            .entry((owner, CollateralClass::Vault))
            .or_default() += amount;
        Ok(())
    }

    async fn redeem_collateral_pool_tokens(
        &self,
        agent: &str,
        amount: Amount,
    ) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "redeemCollateralPoolTokens", None, Some(amount))?;
        let announced = Self::take_announcement(
            &mut state,
            agent,
            "poolRedemption",
            "redeemCollateralPoolTokens",
        )?;
        let simulated = Self::agent_mut(&mut state, agent)?;
        let amount = amount.min(announced).min(simulated.pool_token_balance);
        simulated.pool_token_balance -= amount;
        simulated.pool_token_supply -= amount;
        simulated.info.total_pool_collateral_nat_wei =
            simulated.info.total_pool_collateral_nat_wei.saturating_sub(amount);
        Ok(())
    }

    async fn exit_available(&self, agent: &str) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "exitAvailable", None, None)?;
        Self::take_announcement(&mut state, agent, "exit", "exitAvailable")?;
        Self::agent_mut(&mut state, agent)?.info.publicly_available = false;
        Ok(())
    }

    async fn execute_agent_setting_update(
        &self,
        agent: &str,
        setting: AgentSettingName,
    ) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "executeAgentSettingUpdate", None, None)?;
        let value = Self::take_announcement(
            &mut state,
            agent,
            setting.as_str(),
            "executeAgentSettingUpdate",
        )?;
        Self::agent_mut(&mut state, agent)?
            .settings
            .insert(setting, value);
        Ok(())
    }

    async fn destroy(&self, agent: &str) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "destroyAgent", None, None)?;
        Self::take_announcement(&mut state, agent, "destroy", "destroyAgent")?;
        Self::agent_mut(&mut state, agent)?.destroyed = true;
        Self::emit_locked(&mut state, agent, LedgerEvent::AgentDestroyed);
        Ok(())
    }

    async fn pool_fee_balance(&self, agent: &str) -> AgentBotResult<Amount> {
        let mut state = self.state.write();
        Ok(Self::agent_mut(&mut state, agent)?.pool_fee_balance)
    }

    async fn withdraw_pool_fees(&self, agent: &str, amount: Amount) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "withdrawPoolFees", None, Some(amount))?;
        let simulated = Self::agent_mut(&mut state, agent)?;
        simulated.pool_fee_balance = simulated.pool_fee_balance.saturating_sub(amount);
        Ok(())
    }

    async fn self_close(&self, agent: &str, amount: Amount) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "selfClose", None, Some(amount))?;
        let simulated = Self::agent_mut(&mut state, agent)?;
        simulated.info.minted_uba = simulated.info.minted_uba.saturating_sub(amount);
        Ok(())
    }

    async fn pool_token_balance(&self, agent: &str) -> AgentBotResult<Amount> {
        let mut state = self.state.write();
        Ok(Self::agent_mut(&mut state, agent)?.pool_token_balance)
    }

    async fn pool_token_total_supply(&self, agent: &str) -> AgentBotResult<Amount> {
        let mut state = self.state.write();
        Ok(Self::agent_mut(&mut state, agent)?.pool_token_supply)
    }

    async fn announce_underlying_withdrawal(
        &self,
        agent: &str,
    ) -> AgentBotResult<(u64, PaymentReference)> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "announceUnderlyingWithdrawal", None, None)?;
        let id = state.next_announcement_id;
        state.next_announcement_id += 1;
        let now = state.timestamp;
        let reference = payment_reference::announced_withdrawal(id);
        Self::agent_mut(&mut state, agent)?.underlying_withdrawal = Some(reference);
        Ok((now, reference))
    }

    async fn confirm_underlying_withdrawal(&self, agent: &str, tx_id: &str) -> AgentBotResult<()> {
        let tx = self.chain.find_transaction(tx_id);
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "confirmUnderlyingWithdrawal", None, None)?;
        let simulated = Self::agent_mut(&mut state, agent)?;
        let reference = simulated
            .underlying_withdrawal
            .take()
            .ok_or_else(|| Self::rejected("confirmUnderlyingWithdrawal", "no active announcement"))?;
        let spent = match tx {
            Some(tx) if tx.reference == Some(reference) => tx.inputs.iter().map(|(_, a)| *a).sum::<Amount>(),
            _ => 0,
        };
        simulated.info.free_underlying_balance_uba -= i128::try_from(spent).unwrap_or(i128::MAX);
        Ok(())
    }

    async fn cancel_underlying_withdrawal(&self, agent: &str) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "cancelUnderlyingWithdrawal", None, None)?;
        Self::agent_mut(&mut state, agent)?
            .underlying_withdrawal
            .take()
            .ok_or_else(|| Self::rejected("cancelUnderlyingWithdrawal", "no active announcement"))?;
        Ok(())
    }

    async fn confirm_top_up_payment(
        &self,
        agent: &str,
        proof: &AttestationProof,
    ) -> AgentBotResult<()> {
        let mut state = self.state.write();
        Self::enter(&mut state, agent, "confirmTopupPayment", None, None)?;
        Self::require_body(proof, "confirmTopupPayment", true)?;
        let ProofBody::Payment {
            tx_id,
            receiving_address,
            received_amount,
            payment_reference: reference,
            ..
        } = &proof.body
        else {
            return Err(Self::rejected("confirmTopupPayment", "invalid proof type"));
        };
        let simulated = Self::agent_mut(&mut state, agent)?;
        if *receiving_address != simulated.info.underlying_address {
            return Err(Self::rejected("confirmTopupPayment", "not underlying address"));
        }
        if *reference != Some(payment_reference::top_up(agent)) {
            return Err(Self::rejected("confirmTopupPayment", "not a topup payment"));
        }
        if !simulated.confirmed_top_ups.insert(tx_id.clone()) {
            return Err(Self::rejected("confirmTopupPayment", "payment already confirmed"));
        }
        simulated.info.free_underlying_balance_uba +=
            i128::try_from(*received_amount).unwrap_or(i128::MAX);
        debug!("[ledger] top-up of {} credited to {}", received_amount, agent);
        Ok(())
    }

    async fn unclaimed_reward_epochs(
        &self,
        agent: &str,
        class: CollateralClass,
    ) -> AgentBotResult<Vec<u64>> {
        let mut state = self.state.write();
        Ok(Self::agent_mut(&mut state, agent)?
            .unclaimed_epochs
            .get(&class)
            .cloned()
            .unwrap_or_default())
    }

    async fn claim_rewards(
        &self,
        agent: &str,
        class: CollateralClass,
        epochs: &[u64],
    ) -> AgentBotResult<Amount> {
        let mut state = self.state.write();
        let reward = self.config.reward_per_claim * epochs.len() as Amount;
        Self::enter(&mut state, agent, "claimRewards", None, Some(reward))?;
        let simulated = Self::agent_mut(&mut state, agent)?;
        if let Some(pending) = simulated.unclaimed_epochs.get_mut(&class) {
            pending.retain(|e| !epochs.contains(e));
        }
        Ok(reward)
    }

    async fn claimable_airdrop_months(
        &self,
        agent: &str,
        class: CollateralClass,
    ) -> AgentBotResult<Vec<u64>> {
        let mut state = self.state.write();
        Ok(Self::agent_mut(&mut state, agent)?
            .airdrop_months
            .get(&class)
            .cloned()
            .unwrap_or_default())
    }

    async fn claim_airdrop(
        &self,
        agent: &str,
        class: CollateralClass,
        months: &[u64],
    ) -> AgentBotResult<Amount> {
        let mut state = self.state.write();
        let reward = self.config.reward_per_claim * months.len() as Amount;
        Self::enter(&mut state, agent, "claimAirdropDistribution", None, Some(reward))?;
        let simulated = Self::agent_mut(&mut state, agent)?;
        if let Some(pending) = simulated.airdrop_months.get_mut(&class) {
            pending.retain(|m| !months.contains(m));
        }
        Ok(reward)
    }
}
