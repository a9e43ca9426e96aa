//! # Domain Errors
//!
//! Error types for the agent lifecycle engine.
//!
//! Only invariant violations and transient collaborator failures are errors.
//! "Not yet requestable" and "not finalized" outcomes are values, see
//! [`crate::domain::ProofOutcome`].

use thiserror::Error;

/// Native (ledger) address of an agent vault, owner or pool.
pub type VaultAddress = String;

/// Address on the underlying (external) payment chain.
pub type UnderlyingAddress = String;

/// Transaction identifier on the underlying chain.
pub type TxId = String;

/// Collateral reservation or redemption request id.
pub type RequestId = u64;

/// Amount in the smallest unit of an asset (UBA or token wei).
pub type Amount = u128;

/// 32-byte payment reference carried by underlying payments.
pub type PaymentReference = [u8; 32];

/// Ledger rejection reasons that mean a timelocked announcement lapsed.
pub const LAPSED_REJECTIONS: [&str; 3] = [
    "withdrawal: too late",
    "withdrawal: CR too low",
    "update not valid anymore",
];

/// Agent bot error types.
#[derive(Debug, Error)]
pub enum AgentBotError {
    /// No schedule record for this agent.
    #[error("Agent not registered: {agent}")]
    AgentNotFound {
        /// Agent vault address
        agent: VaultAddress,
    },

    /// Expected minting record is missing.
    #[error("Minting {request_id} not found for agent {agent}")]
    MintingNotFound {
        /// Agent vault address
        agent: VaultAddress,
        /// Collateral reservation id
        request_id: RequestId,
    },

    /// Expected redemption record is missing.
    #[error("Redemption {request_id} not found for agent {agent}")]
    RedemptionNotFound {
        /// Agent vault address
        agent: VaultAddress,
        /// Redemption request id
        request_id: RequestId,
    },

    /// Insert collided with an existing `(agent, request_id)` key.
    #[error("Duplicate {kind} record {request_id} for agent {agent}")]
    DuplicateRecord {
        /// Record kind ("minting" or "redemption")
        kind: &'static str,
        /// Agent vault address
        agent: VaultAddress,
        /// Request id
        request_id: RequestId,
    },

    /// Invalid minting state transition.
    #[error("Invalid minting transition: {from} -> {to}")]
    InvalidMintingTransition {
        /// Current state
        from: String,
        /// Attempted state
        to: String,
    },

    /// Invalid redemption state transition.
    #[error("Invalid redemption transition: {from} -> {to}")]
    InvalidRedemptionTransition {
        /// Current state
        from: String,
        /// Attempted state
        to: String,
    },

    /// A state that polls a proof has no stored request.
    #[error("Missing proof request for {kind} {request_id}")]
    MissingProofRequest {
        /// Record kind
        kind: &'static str,
        /// Request id
        request_id: RequestId,
    },

    /// A closing event arrived while the event creating its record is still
    /// queued for retry.
    #[error("Creating event for {kind} {request_id} not applied yet")]
    CreationPending {
        /// Record kind
        kind: &'static str,
        /// Request id
        request_id: RequestId,
    },

    /// A paid redemption has no payment transaction id.
    #[error("Missing payment transaction for redemption {request_id}")]
    MissingPaymentTx {
        /// Redemption request id
        request_id: RequestId,
    },

    /// The open underlying top-up lacks data its phase requires.
    #[error("Underlying top-up in {state} has no {field}")]
    IncompleteTopUp {
        /// Top-up phase
        state: String,
        /// Missing field
        field: &'static str,
    },

    /// The watermark would move backwards.
    #[error("Watermark regression: {current} -> {attempted}")]
    WatermarkRegression {
        /// Current last applied position
        current: String,
        /// Attempted position
        attempted: String,
    },

    /// No underlying withdrawal was announced.
    #[error("No underlying withdrawal announced for agent {agent}")]
    NoUnderlyingWithdrawal {
        /// Agent vault address
        agent: VaultAddress,
    },

    /// Ledger refused the call.
    #[error("Ledger rejected {action}: {reason}")]
    LedgerRejected {
        /// Contract method
        action: String,
        /// Revert reason
        reason: String,
    },

    /// Ledger RPC failure.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Attestation client failure.
    #[error("Attestation error: {0}")]
    Attestation(String),

    /// Underlying chain (wallet / indexer) failure.
    #[error("Underlying chain error: {0}")]
    Underlying(String),

    /// Persistent store failure.
    #[error("Storage error: {reason}")]
    Storage {
        /// Failure reason
        reason: String,
    },

    /// Engine configuration the bot cannot run with.
    #[error("Invalid configuration: {field} {reason}")]
    InvalidConfig {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
}

impl AgentBotError {
    /// True when the ledger reported that a timelocked announcement is no
    /// longer executable. Such entries are cleared rather than retried.
    pub fn is_lapsed_timelock(&self) -> bool {
        match self {
            Self::LedgerRejected { reason, .. } => {
                LAPSED_REJECTIONS.iter().any(|needle| reason.contains(needle))
            }
            _ => false,
        }
    }

    /// True for collaborator failures that are retried on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Ledger(_) | Self::Attestation(_) | Self::Underlying(_) | Self::Storage { .. }
        )
    }
}

/// Result alias for the agent bot.
pub type AgentBotResult<T> = Result<T, AgentBotError>;
