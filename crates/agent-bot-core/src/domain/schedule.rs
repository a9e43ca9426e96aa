//! # Agent Schedule
//!
//! Per-agent record: event watermark, failed-event retry queue, timelocked
//! announcements and daily-task bookkeeping.
//!
//! Timelocked announcements are kept as an ordered list of named entries.
//! One executor walks the list; the entry name is the only key, so at most
//! one announcement per name is pending and a re-announce replaces it.

use super::errors::{
    AgentBotError, AgentBotResult, Amount, PaymentReference, RequestId, TxId, UnderlyingAddress,
    VaultAddress,
};
use super::events::{EventPosition, EventRecord, LedgerEvent};
use super::proofs::{AttestationProof, ProofRequest};
use super::value_objects::{AgentSettingName, DailyProofState};
use serde::{Deserialize, Serialize};

/// Entry name: vault collateral withdrawal.
pub const VAULT_COLLATERAL_WITHDRAWAL: &str = "vaultCollateralWithdrawal";
/// Entry name: pool token redemption.
pub const POOL_TOKEN_REDEMPTION: &str = "poolTokenRedemption";
/// Entry name: exit available.
pub const EXIT_AVAILABLE: &str = "exitAvailable";
/// Entry name: cleanup withdrawal of vault collateral.
pub const DESTROY_VAULT_COLLATERAL_WITHDRAWAL: &str = "destroyVaultCollateralWithdrawal";
/// Entry name: cleanup redemption of pool tokens.
pub const DESTROY_POOL_TOKEN_REDEMPTION: &str = "destroyPoolTokenRedemption";
/// Entry name: destroy.
pub const DESTROY: &str = "destroy";

/// What to execute once an entry's timelock passed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelockAction {
    /// Withdraw vault collateral.
    VaultCollateralWithdrawal {
        /// Token wei
        amount: Amount,
    },
    /// Redeem collateral pool tokens.
    PoolTokenRedemption {
        /// Pool token wei
        amount: Amount,
    },
    /// Leave the publicly available agent list.
    ExitAvailable,
    /// Apply an agent setting update.
    SettingUpdate {
        /// Setting
        setting: AgentSettingName,
        /// New value
        value: u128,
    },
    /// Withdraw vault collateral during destruction cleanup.
    DestroyVaultCollateralWithdrawal {
        /// Token wei
        amount: Amount,
    },
    /// Redeem pool tokens during destruction cleanup.
    DestroyPoolTokenRedemption {
        /// Pool token wei
        amount: Amount,
    },
    /// Destroy the agent vault.
    Destroy,
}

impl TimelockAction {
    /// Entry name in the schedule's name table.
    pub fn name(&self) -> &'static str {
        match self {
            Self::VaultCollateralWithdrawal { .. } => VAULT_COLLATERAL_WITHDRAWAL,
            Self::PoolTokenRedemption { .. } => POOL_TOKEN_REDEMPTION,
            Self::ExitAvailable => EXIT_AVAILABLE,
            Self::SettingUpdate { setting, .. } => setting.as_str(),
            Self::DestroyVaultCollateralWithdrawal { .. } => DESTROY_VAULT_COLLATERAL_WITHDRAWAL,
            Self::DestroyPoolTokenRedemption { .. } => DESTROY_POOL_TOKEN_REDEMPTION,
            Self::Destroy => DESTROY,
        }
    }

    /// Entries that block the destruction cleanup step while pending.
    pub fn blocks_cleanup(&self) -> bool {
        matches!(
            self,
            Self::ExitAvailable
                | Self::DestroyVaultCollateralWithdrawal { .. }
                | Self::DestroyPoolTokenRedemption { .. }
        )
    }
}

/// Pending timelocked announcement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockEntry {
    /// Name table key.
    pub name: String,
    /// Ledger timestamp from which execution is allowed.
    pub valid_at: u64,
    /// Payload.
    pub action: TimelockAction,
}

impl TimelockEntry {
    /// Create an entry named after its action.
    pub fn new(valid_at: u64, action: TimelockAction) -> Self {
        Self {
            name: action.name().to_string(),
            valid_at,
            action,
        }
    }

    /// True once the timelock has passed.
    pub fn is_due(&self, now: u64) -> bool {
        self.valid_at <= now
    }
}

/// Announced withdrawal from the agent's underlying address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderlyingWithdrawal {
    /// Ledger timestamp of the announcement.
    pub announced_at: u64,
    /// Reference the withdrawal payment must carry.
    pub payment_reference: PaymentReference,
    /// Submitted withdrawal payment.
    pub payment_tx: Option<TxId>,
    /// Owner asked to cancel.
    pub cancel_requested: bool,
}

impl UnderlyingWithdrawal {
    /// New announcement without a payment.
    pub fn announced(announced_at: u64, payment_reference: PaymentReference) -> Self {
        Self {
            announced_at,
            payment_reference,
            payment_tx: None,
            cancel_requested: false,
        }
    }

    /// Confirm or cancel may run once the minimum wait passed.
    pub fn can_settle(&self, now: u64, min_wait_seconds: u64) -> bool {
        self.announced_at.saturating_add(min_wait_seconds) < now
    }
}

/// Phase of an underlying top-up payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopUpState {
    /// About to pay; no transaction known yet.
    Requested,
    /// Payment submitted, waiting for confirmation depth.
    Paid,
    /// Payment proof requested.
    AwaitingProof,
}

/// Owner-funded top-up of the agent's underlying address, open until the
/// ledger credited it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderlyingTopUpPayment {
    /// Phase.
    pub state: TopUpState,
    /// Amount paid to the agent.
    pub amount: Amount,
    /// Paying owner address.
    pub source: UnderlyingAddress,
    /// Underlying height when the top-up was decided. Earlier payments with
    /// the same reference belong to older top-ups.
    pub requested_at_block: u64,
    /// Submitted payment.
    pub payment_tx: Option<TxId>,
    /// Outstanding payment proof request.
    pub proof_request: Option<ProofRequest>,
}

impl UnderlyingTopUpPayment {
    /// Top-up decided at `requested_at_block`, not paid yet.
    pub fn requested(source: &str, amount: Amount, requested_at_block: u64) -> Self {
        Self {
            state: TopUpState::Requested,
            amount,
            source: source.to_string(),
            requested_at_block,
            payment_tx: None,
            proof_request: None,
        }
    }

    /// Record the submitted payment.
    pub fn mark_paid(&mut self, tx_id: TxId) {
        self.state = TopUpState::Paid;
        self.payment_tx = Some(tx_id);
    }

    /// Record the proof request.
    pub fn await_proof(&mut self, request: ProofRequest) {
        self.state = TopUpState::AwaitingProof;
        self.proof_request = Some(request);
    }
}

/// Event reading progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWatermark {
    /// First native block not read yet.
    pub next_block: u64,
    /// Last event whose handler was attempted.
    pub last_applied: Option<EventPosition>,
}

impl EventWatermark {
    /// Watermark starting at `next_block`.
    pub fn starting_at(next_block: u64) -> Self {
        Self {
            next_block,
            last_applied: None,
        }
    }

    /// True if `position` was already applied.
    pub fn covers(&self, position: EventPosition) -> bool {
        self.last_applied.map_or(false, |last| position <= last)
    }

    /// Advance past an attempted event.
    pub fn record_applied(&mut self, position: EventPosition) -> AgentBotResult<()> {
        if let Some(last) = self.last_applied {
            if position <= last {
                return Err(AgentBotError::WatermarkRegression {
                    current: last.to_string(),
                    attempted: position.to_string(),
                });
            }
        }
        self.last_applied = Some(position);
        Ok(())
    }

    /// Advance the block cursor after a read range completed.
    pub fn finish_range(&mut self, to_block: u64) {
        self.next_block = self.next_block.max(to_block.saturating_add(1));
    }
}

/// Event whose handler failed, queued for re-application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEvent {
    /// The event.
    pub record: EventRecord,
    /// Attempts so far, including the first.
    pub attempts: u32,
}

/// One agent's schedule record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSchedule {
    /// Agent vault address.
    pub agent: VaultAddress,
    /// Agent's underlying address.
    pub underlying_address: UnderlyingAddress,
    /// False once the vault is destroyed.
    pub active: bool,
    /// Event reading progress.
    pub watermark: EventWatermark,
    /// Events waiting for another attempt.
    pub failed_events: Vec<FailedEvent>,
    /// Pending timelocked announcements, in announcement order.
    pub timelocks: Vec<TimelockEntry>,
    /// Announced underlying withdrawal.
    pub underlying_withdrawal: Option<UnderlyingWithdrawal>,
    /// Destruction cleanup in progress.
    pub waiting_for_destruction_cleanup: bool,
    /// Pool fees withdrawn during cleanup and not yet self-closed.
    #[serde(default)]
    pub pending_self_close: Option<Amount>,
    /// Underlying timestamp of the last completed daily run.
    pub daily_tasks_timestamp: u64,
    /// Daily block-height proof phase.
    pub daily_proof_state: DailyProofState,
    /// Outstanding daily block-height proof request.
    pub daily_proof_request: Option<ProofRequest>,
    /// Latest obtained block-height proof, reloaded on startup.
    #[serde(default)]
    pub block_height_proof: Option<AttestationProof>,
    /// Underlying top-up not yet credited by the ledger.
    #[serde(default)]
    pub underlying_top_up: Option<UnderlyingTopUpPayment>,
}

impl AgentSchedule {
    /// Schedule for a newly registered agent.
    pub fn new(agent: &str, underlying_address: &str, next_block: u64) -> Self {
        Self {
            agent: agent.to_string(),
            underlying_address: underlying_address.to_string(),
            active: true,
            watermark: EventWatermark::starting_at(next_block),
            failed_events: Vec::new(),
            timelocks: Vec::new(),
            underlying_withdrawal: None,
            waiting_for_destruction_cleanup: false,
            pending_self_close: None,
            daily_tasks_timestamp: 0,
            daily_proof_state: DailyProofState::ObtainedProof,
            daily_proof_request: None,
            block_height_proof: None,
            underlying_top_up: None,
        }
    }

    /// Store an announcement, replacing any pending entry of the same name.
    pub fn announce(&mut self, valid_at: u64, action: TimelockAction) {
        let entry = TimelockEntry::new(valid_at, action);
        match self.timelocks.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.timelocks.push(entry),
        }
    }

    /// Entries whose timelock passed, in list order.
    pub fn due_timelocks(&self, now: u64) -> Vec<TimelockEntry> {
        self.timelocks
            .iter()
            .filter(|e| e.is_due(now))
            .cloned()
            .collect()
    }

    /// Remove an entry by name. Returns whether one was pending.
    pub fn clear(&mut self, name: &str) -> bool {
        let before = self.timelocks.len();
        self.timelocks.retain(|e| e.name != name);
        self.timelocks.len() != before
    }

    /// Look up a pending entry.
    pub fn pending(&self, name: &str) -> Option<&TimelockEntry> {
        self.timelocks.iter().find(|e| e.name == name)
    }

    /// True if an entry blocks the cleanup step.
    pub fn cleanup_blocked(&self) -> bool {
        self.timelocks.iter().any(|e| e.action.blocks_cleanup())
    }

    /// Queue a failed event, or bump its attempt count if already queued.
    pub fn record_failure(&mut self, record: EventRecord) {
        match self
            .failed_events
            .iter_mut()
            .find(|f| f.record.position == record.position)
        {
            Some(failed) => failed.attempts += 1,
            None => self.failed_events.push(FailedEvent {
                record,
                attempts: 1,
            }),
        }
    }

    /// Drop a queued event.
    pub fn forget_failure(&mut self, position: EventPosition) {
        self.failed_events.retain(|f| f.record.position != position);
    }

    /// True if the reservation event for minting `request_id` is queued.
    pub fn minting_creation_queued(&self, request_id: RequestId) -> bool {
        self.failed_events.iter().any(|f| {
            matches!(&f.record.event, LedgerEvent::CollateralReserved(r) if r.request_id == request_id)
        })
    }

    /// True if the request event for redemption `request_id` is queued.
    pub fn redemption_creation_queued(&self, request_id: RequestId) -> bool {
        self.failed_events.iter().any(|f| {
            matches!(&f.record.event, LedgerEvent::RedemptionRequested(r) if r.request_id == request_id)
        })
    }
}
