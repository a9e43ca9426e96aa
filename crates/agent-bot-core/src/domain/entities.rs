//! # Domain Entities
//!
//! Persisted minting and redemption records. Both are keyed by
//! `(agent, request_id)`, never deleted, and terminal at `Done`.

use super::errors::{
    AgentBotError, AgentBotResult, Amount, PaymentReference, RequestId, TxId, UnderlyingAddress,
    VaultAddress,
};
use super::events::{CollateralReservation, RedemptionRequest};
use super::proofs::ProofRequest;
use super::value_objects::{MintingState, RedemptionFinalState, RedemptionState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One collateral reservation being serviced by the agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintingRecord {
    /// Row id.
    pub id: Uuid,
    /// Agent vault address.
    pub agent: VaultAddress,
    /// Where the minter must pay.
    pub agent_underlying_address: UnderlyingAddress,
    /// Reservation id.
    pub request_id: RequestId,
    /// Lifecycle state.
    pub state: MintingState,
    /// Minted value (UBA).
    pub value: Amount,
    /// Minting fee (UBA).
    pub fee: Amount,
    /// First underlying block for the payment.
    pub first_underlying_block: u64,
    /// Last underlying block for the payment.
    pub last_underlying_block: u64,
    /// Last underlying timestamp for the payment.
    pub last_underlying_timestamp: u64,
    /// Reference the payment must carry.
    pub payment_reference: PaymentReference,
    /// Outstanding payment or non-payment proof request.
    pub proof_request: Option<ProofRequest>,
    /// Attestors finalized the request as not proved.
    pub proof_unobtainable: bool,
}

impl MintingRecord {
    /// Create a record from a `CollateralReserved` event.
    pub fn from_reservation(
        agent: &str,
        agent_underlying_address: &str,
        reservation: &CollateralReservation,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent: agent.to_string(),
            agent_underlying_address: agent_underlying_address.to_string(),
            request_id: reservation.request_id,
            state: MintingState::Started,
            value: reservation.value,
            fee: reservation.fee,
            first_underlying_block: reservation.first_underlying_block,
            last_underlying_block: reservation.last_underlying_block,
            last_underlying_timestamp: reservation.last_underlying_timestamp,
            payment_reference: reservation.payment_reference,
            proof_request: None,
            proof_unobtainable: false,
        }
    }

    /// Transition to new state.
    pub fn transition_to(&mut self, new_state: MintingState) -> AgentBotResult<()> {
        if !self.state.can_transition_to(new_state) {
            return Err(AgentBotError::InvalidMintingTransition {
                from: format!("{:?}", self.state),
                to: format!("{:?}", new_state),
            });
        }
        self.state = new_state;
        Ok(())
    }

    /// Move to a proof-awaiting state and remember the request.
    pub fn await_proof(&mut self, state: MintingState, request: ProofRequest) -> AgentBotResult<()> {
        self.transition_to(state)?;
        self.proof_request = Some(request);
        Ok(())
    }

    /// Stored proof request, required in proof-awaiting states.
    pub fn require_proof_request(&self) -> AgentBotResult<&ProofRequest> {
        self.proof_request
            .as_ref()
            .ok_or(AgentBotError::MissingProofRequest {
                kind: "minting",
                request_id: self.request_id,
            })
    }

    /// Amount the non-payment proof must cover.
    pub fn total_payment(&self) -> Amount {
        self.value.saturating_add(self.fee)
    }
}

/// One redemption request being serviced by the agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRecord {
    /// Row id.
    pub id: Uuid,
    /// Agent vault address.
    pub agent: VaultAddress,
    /// Request id.
    pub request_id: RequestId,
    /// Lifecycle state.
    pub state: RedemptionState,
    /// Ledger outcome, once known.
    pub final_state: Option<RedemptionFinalState>,
    /// Redeemer was paid out from collateral.
    pub defaulted: bool,
    /// Redeemer native address.
    pub redeemer: VaultAddress,
    /// Underlying address to pay.
    pub payment_address: UnderlyingAddress,
    /// Redeemed value (UBA).
    pub value: Amount,
    /// Fee kept by the agent (UBA).
    pub fee: Amount,
    /// Last underlying block for the payment.
    pub last_underlying_block: u64,
    /// Last underlying timestamp for the payment.
    pub last_underlying_timestamp: u64,
    /// Reference the payment must carry.
    pub payment_reference: PaymentReference,
    /// Submitted payment transaction.
    pub payment_tx: Option<TxId>,
    /// Outstanding payment proof request.
    pub proof_request: Option<ProofRequest>,
    /// Attestors finalized the request as not proved.
    pub proof_unobtainable: bool,
}

impl RedemptionRecord {
    /// Create a record from a `RedemptionRequested` event.
    pub fn from_request(agent: &str, request: &RedemptionRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent: agent.to_string(),
            request_id: request.request_id,
            state: RedemptionState::Started,
            final_state: None,
            defaulted: false,
            redeemer: request.redeemer.clone(),
            payment_address: request.payment_address.clone(),
            value: request.value,
            fee: request.fee,
            last_underlying_block: request.last_underlying_block,
            last_underlying_timestamp: request.last_underlying_timestamp,
            payment_reference: request.payment_reference,
            payment_tx: None,
            proof_request: None,
            proof_unobtainable: false,
        }
    }

    /// Transition to new state.
    pub fn transition_to(&mut self, new_state: RedemptionState) -> AgentBotResult<()> {
        if !self.state.can_transition_to(new_state) {
            return Err(AgentBotError::InvalidRedemptionTransition {
                from: format!("{:?}", self.state),
                to: format!("{:?}", new_state),
            });
        }
        self.state = new_state;
        Ok(())
    }

    /// Record the submitted payment.
    pub fn mark_paid(&mut self, tx_id: TxId) -> AgentBotResult<()> {
        self.transition_to(RedemptionState::Paid)?;
        self.payment_tx = Some(tx_id);
        Ok(())
    }

    /// Close with a ledger outcome. Returns false, leaving the record as it
    /// was, when already closed.
    pub fn finish(&mut self, outcome: RedemptionFinalState) -> AgentBotResult<bool> {
        if self.state.is_terminal() {
            return Ok(false);
        }
        self.transition_to(RedemptionState::Done)?;
        self.final_state = Some(outcome);
        Ok(true)
    }

    /// Payment transaction id, required once paid.
    pub fn require_payment_tx(&self) -> AgentBotResult<&TxId> {
        self.payment_tx
            .as_ref()
            .ok_or(AgentBotError::MissingPaymentTx {
                request_id: self.request_id,
            })
    }

    /// Stored proof request, required while awaiting proof.
    pub fn require_proof_request(&self) -> AgentBotResult<&ProofRequest> {
        self.proof_request
            .as_ref()
            .ok_or(AgentBotError::MissingProofRequest {
                kind: "redemption",
                request_id: self.request_id,
            })
    }

    /// Amount the agent pays: value minus the fee it keeps.
    pub fn payment_amount(&self) -> Amount {
        self.value.saturating_sub(self.fee)
    }
}
