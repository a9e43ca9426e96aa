//! # Attestation Proofs
//!
//! Request handles and the tagged retrieval outcome.

use super::errors::{Amount, PaymentReference, TxId, UnderlyingAddress};
use serde::{Deserialize, Serialize};

/// Handle for a submitted proof request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRequest {
    /// Voting round the request was assigned to.
    pub round: u64,
    /// Opaque request body, needed to retrieve the proof.
    pub data: String,
}

impl ProofRequest {
    /// Create a request handle.
    pub fn new(round: u64, data: impl Into<String>) -> Self {
        Self {
            round,
            data: data.into(),
        }
    }
}

/// Attested response body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofBody {
    /// A payment happened.
    Payment {
        /// Transaction id
        tx_id: TxId,
        /// Paying address
        source_address: UnderlyingAddress,
        /// Receiving address
        receiving_address: UnderlyingAddress,
        /// Received amount
        received_amount: Amount,
        /// Payment reference read from the transaction
        payment_reference: Option<PaymentReference>,
        /// Block the transaction was included in
        block_number: u64,
    },
    /// No payment with this reference happened in the window.
    ReferencedPaymentNonexistence {
        /// Expected receiving address
        destination: UnderlyingAddress,
        /// Expected reference
        payment_reference: PaymentReference,
        /// Expected minimum amount
        amount: Amount,
        /// First block searched
        minimal_block: u64,
        /// Last block searched
        deadline_block: u64,
        /// Deadline timestamp
        deadline_timestamp: u64,
    },
    /// Underlying block exists and is confirmed.
    ConfirmedBlockHeightExists {
        /// Block number
        block_number: u64,
        /// Block timestamp
        block_timestamp: u64,
        /// Lowest block still queryable by the attestors
        lowest_query_window_block_number: u64,
        /// Timestamp of the lowest queryable block
        lowest_query_window_block_timestamp: u64,
    },
}

/// Finalized attestation proof, submittable on the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationProof {
    /// Round the proof was finalized in.
    pub round: u64,
    /// Merkle proof nodes (hex).
    pub merkle_proof: Vec<String>,
    /// Attested body.
    pub body: ProofBody,
}

impl AttestationProof {
    /// Lowest queryable `(block, timestamp)` for block-height proofs.
    pub fn lowest_query_window(&self) -> Option<(u64, u64)> {
        match &self.body {
            ProofBody::ConfirmedBlockHeightExists {
                lowest_query_window_block_number,
                lowest_query_window_block_timestamp,
                ..
            } => Some((
                *lowest_query_window_block_number,
                *lowest_query_window_block_timestamp,
            )),
            _ => None,
        }
    }
}

/// Result of polling a proof request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProofOutcome {
    /// Round not finalized yet; poll again later.
    NotFinalized,
    /// Round finalized and the request was proved.
    Proved(AttestationProof),
    /// Round finalized without a proof. Retrying is pointless.
    NotProved,
}

impl ProofOutcome {
    /// True once the round is settled either way.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::NotFinalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_height_proof(lqw_block: u64, lqw_ts: u64) -> AttestationProof {
        AttestationProof {
            round: 3,
            merkle_proof: vec![],
            body: ProofBody::ConfirmedBlockHeightExists {
                block_number: 500,
                block_timestamp: 5000,
                lowest_query_window_block_number: lqw_block,
                lowest_query_window_block_timestamp: lqw_ts,
            },
        }
    }

    #[test]
    fn test_lowest_query_window_only_for_block_height() {
        assert_eq!(
            block_height_proof(120, 1200).lowest_query_window(),
            Some((120, 1200))
        );

        let payment = AttestationProof {
            round: 1,
            merkle_proof: vec![],
            body: ProofBody::Payment {
                tx_id: "tx".to_string(),
                source_address: "a".to_string(),
                receiving_address: "b".to_string(),
                received_amount: 10,
                payment_reference: None,
                block_number: 1,
            },
        };
        assert_eq!(payment.lowest_query_window(), None);
    }

    #[test]
    fn test_outcome_finality() {
        assert!(!ProofOutcome::NotFinalized.is_final());
        assert!(ProofOutcome::NotProved.is_final());
        assert!(ProofOutcome::Proved(block_height_proof(1, 1)).is_final());
    }
}
