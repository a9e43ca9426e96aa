//! Attestation client backed by a [`SimulatedUnderlyingChain`].
//!
//! Requests are assigned to the current round and evaluated against the
//! chain when polled after their round was finalized. The request body is
//! the JSON-encoded query. Payment and non-payment queries reaching below
//! the lowest queryable block are refused at request time and not proved when
//! evaluated.

use super::simulated_chain::SimulatedUnderlyingChain;
use crate::domain::{
    AgentBotError, AgentBotResult, AttestationProof, ProofBody, ProofOutcome, ProofRequest,
};
use crate::ports::{AttestationClient, NonPaymentQuery, PaymentQuery};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Debug, Serialize, Deserialize)]
enum SimulatedQuery {
    Payment(PaymentQuery),
    NonPayment(NonPaymentQuery),
    BlockHeight { window_seconds: u64 },
}

/// How far back the verifiers keep underlying history.
pub const DEFAULT_QUERY_WINDOW_SECONDS: u64 = 86_400;

#[derive(Debug)]
struct AttestationState {
    current_round: u64,
    finalized_round: Option<u64>,
    requestable: bool,
    force_not_proved: bool,
    query_window_seconds: u64,
    requests: Vec<ProofRequest>,
}

/// Simulated attestation protocol.
pub struct SimulatedAttestationClient {
    chain: Arc<SimulatedUnderlyingChain>,
    state: RwLock<AttestationState>,
}

impl SimulatedAttestationClient {
    /// Client proving facts about `chain`.
    pub fn new(chain: Arc<SimulatedUnderlyingChain>) -> Self {
        Self {
            chain,
            state: RwLock::new(AttestationState {
                current_round: 1,
                finalized_round: None,
                requestable: true,
                force_not_proved: false,
                query_window_seconds: DEFAULT_QUERY_WINDOW_SECONDS,
                requests: Vec::new(),
            }),
        }
    }

    /// Finalize every round up to the current one and open the next.
    pub fn finalize_rounds(&self) {
        let mut state = self.state.write();
        state.finalized_round = Some(state.current_round);
        state.current_round += 1;
    }

    /// Toggle whether new requests are accepted.
    pub fn set_requestable(&self, requestable: bool) {
        self.state.write().requestable = requestable;
    }

    /// Finalized rounds return `NotProved` regardless of chain state.
    pub fn set_force_not_proved(&self, force: bool) {
        self.state.write().force_not_proved = force;
    }

    /// Underlying history the verifiers can still query, in seconds.
    pub fn set_query_window(&self, seconds: u64) {
        self.state.write().query_window_seconds = seconds;
    }

    /// Requests accepted so far.
    pub fn requests(&self) -> Vec<ProofRequest> {
        self.state.read().requests.clone()
    }

    fn lowest_queryable_block(&self) -> u64 {
        let window = self.state.read().query_window_seconds;
        let tip = self.chain.tip();
        self.chain
            .first_block_since(tip.timestamp.saturating_sub(window))
            .number
    }

    /// False when the query asks about blocks the verifiers no longer keep.
    fn within_query_window(&self, query: &SimulatedQuery) -> bool {
        let first_block = match query {
            SimulatedQuery::Payment(query) => query.block_number,
            SimulatedQuery::NonPayment(query) => query.first_block,
            SimulatedQuery::BlockHeight { .. } => return true,
        };
        first_block >= self.lowest_queryable_block()
    }

    fn submit(&self, query: SimulatedQuery) -> AgentBotResult<Option<ProofRequest>> {
        if !self.within_query_window(&query) {
            debug!("[attestation] refused request below the query window");
            return Ok(None);
        }
        let mut state = self.state.write();
        if !state.requestable {
            return Ok(None);
        }
        let data =
            serde_json::to_string(&query).map_err(|e| AgentBotError::Attestation(e.to_string()))?;
        let request = ProofRequest::new(state.current_round, data);
        state.requests.push(request.clone());
        debug!("[attestation] accepted request in round {}", request.round);
        Ok(Some(request))
    }

    fn evaluate(&self, query: SimulatedQuery) -> Option<ProofBody> {
        if !self.within_query_window(&query) {
            return None;
        }
        match query {
            SimulatedQuery::Payment(query) => {
                let tx = self.chain.find_transaction(&query.tx_id)?;
                let block_number = tx.block_number?;
                let received_amount = tx
                    .outputs
                    .iter()
                    .filter(|(address, _)| *address == query.target)
                    .map(|(_, amount)| *amount)
                    .sum();
                Some(ProofBody::Payment {
                    tx_id: tx.tx_id.clone(),
                    source_address: query.source,
                    receiving_address: query.target,
                    received_amount,
                    payment_reference: tx.reference,
                    block_number,
                })
            }
            SimulatedQuery::NonPayment(query) => {
                let paid = self
                    .chain
                    .referenced_in_window(&query.payment_reference, query.first_block, query.last_block)
                    .iter()
                    .any(|tx| {
                        tx.outputs
                            .iter()
                            .any(|(address, amount)| *address == query.destination && *amount >= query.amount)
                    });
                let tip = self.chain.tip();
                let window_over = tip.number > query.last_block && tip.timestamp > query.deadline_timestamp;
                (!paid && window_over).then(|| ProofBody::ReferencedPaymentNonexistence {
                    destination: query.destination,
                    payment_reference: query.payment_reference,
                    amount: query.amount,
                    minimal_block: query.first_block,
                    deadline_block: query.last_block,
                    deadline_timestamp: query.deadline_timestamp,
                })
            }
            SimulatedQuery::BlockHeight { window_seconds } => {
                let tip = self.chain.tip();
                let lowest = self
                    .chain
                    .first_block_since(tip.timestamp.saturating_sub(window_seconds));
                Some(ProofBody::ConfirmedBlockHeightExists {
                    block_number: tip.number,
                    block_timestamp: tip.timestamp,
                    lowest_query_window_block_number: lowest.number,
                    lowest_query_window_block_timestamp: lowest.timestamp,
                })
            }
        }
    }
}

#[async_trait]
impl AttestationClient for SimulatedAttestationClient {
    async fn request_payment_proof(
        &self,
        query: &PaymentQuery,
    ) -> AgentBotResult<Option<ProofRequest>> {
        self.submit(SimulatedQuery::Payment(query.clone()))
    }

    async fn request_referenced_payment_nonexistence_proof(
        &self,
        query: &NonPaymentQuery,
    ) -> AgentBotResult<Option<ProofRequest>> {
        self.submit(SimulatedQuery::NonPayment(query.clone()))
    }

    async fn request_confirmed_block_height_exists_proof(
        &self,
        query_window_seconds: u64,
    ) -> AgentBotResult<Option<ProofRequest>> {
        self.submit(SimulatedQuery::BlockHeight {
            window_seconds: query_window_seconds,
        })
    }

    async fn obtain_proof(&self, request: &ProofRequest) -> AgentBotResult<ProofOutcome> {
        let (finalized, force_not_proved) = {
            let state = self.state.read();
            let finalized = state
                .finalized_round
                .map_or(false, |round| request.round <= round);
            (finalized, state.force_not_proved)
        };
        if !finalized {
            return Ok(ProofOutcome::NotFinalized);
        }
        if force_not_proved {
            return Ok(ProofOutcome::NotProved);
        }
        let query: SimulatedQuery = serde_json::from_str(&request.data)
            .map_err(|e| AgentBotError::Attestation(e.to_string()))?;
        Ok(match self.evaluate(query) {
            Some(body) => ProofOutcome::Proved(AttestationProof {
                round: request.round,
                merkle_proof: vec![hex::encode(request.data.as_bytes())],
                body,
            }),
            None => ProofOutcome::NotProved,
        })
    }
}
