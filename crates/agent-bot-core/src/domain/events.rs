//! # Ledger Events
//!
//! Decoded ledger log entries as a closed tagged union. The reconciler
//! matches on [`LedgerEvent`] exhaustively; new event kinds extend the enum.

use super::errors::{Amount, PaymentReference, RequestId, TxId, UnderlyingAddress, VaultAddress};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a log entry on the ledger. Orders by block, then log index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventPosition {
    /// Block number.
    pub block_number: u64,
    /// Log index within the block.
    pub log_index: u64,
}

impl EventPosition {
    /// Create a position.
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

impl fmt::Display for EventPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// Payload of `CollateralReserved`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralReservation {
    /// Reservation id.
    pub request_id: RequestId,
    /// Minter native address.
    pub minter: VaultAddress,
    /// Minted value (UBA).
    pub value: Amount,
    /// Minting fee (UBA).
    pub fee: Amount,
    /// First underlying block the payment may appear in.
    pub first_underlying_block: u64,
    /// Last underlying block for the payment.
    pub last_underlying_block: u64,
    /// Last underlying timestamp for the payment.
    pub last_underlying_timestamp: u64,
    /// Reference the payment must carry.
    pub payment_reference: PaymentReference,
}

/// Payload of `RedemptionRequested`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRequest {
    /// Redemption request id.
    pub request_id: RequestId,
    /// Redeemer native address.
    pub redeemer: VaultAddress,
    /// Underlying address to pay.
    pub payment_address: UnderlyingAddress,
    /// Redeemed value (UBA).
    pub value: Amount,
    /// Redemption fee kept by the agent (UBA).
    pub fee: Amount,
    /// Last underlying block for the payment.
    pub last_underlying_block: u64,
    /// Last underlying timestamp for the payment.
    pub last_underlying_timestamp: u64,
    /// Reference the payment must carry.
    pub payment_reference: PaymentReference,
}

/// Ledger events relevant to one agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// A minter reserved collateral.
    CollateralReserved(CollateralReservation),
    /// Reservation removed (expired or defaulted by the ledger).
    CollateralReservationDeleted {
        /// Reservation id
        request_id: RequestId,
    },
    /// Minting executed. `None` for self-minting without a reservation.
    MintingExecuted {
        /// Reservation id
        request_id: Option<RequestId>,
    },
    /// A redeemer requested redemption.
    RedemptionRequested(RedemptionRequest),
    /// Redemption defaulted, redeemer paid from collateral.
    RedemptionDefault {
        /// Request id
        request_id: RequestId,
        /// Redeemer
        redeemer: VaultAddress,
    },
    /// Redemption payment confirmed.
    RedemptionPerformed {
        /// Request id
        request_id: RequestId,
        /// Redeemer
        redeemer: VaultAddress,
    },
    /// Redemption payment confirmed as failed.
    RedemptionPaymentFailed {
        /// Request id
        request_id: RequestId,
        /// Payment transaction
        tx_id: TxId,
        /// Redeemer
        redeemer: VaultAddress,
        /// Failure reason reported by the ledger
        failure_reason: String,
    },
    /// Redemption payment blocked by the receiver.
    RedemptionPaymentBlocked {
        /// Request id
        request_id: RequestId,
        /// Payment transaction
        tx_id: TxId,
        /// Redeemer
        redeemer: VaultAddress,
    },
    /// Agent vault destroyed.
    AgentDestroyed,
    /// New prices published.
    PriceEpochFinalized {
        /// Price epoch
        epoch: u64,
    },
    /// Agent entered the collateral ratio warning band.
    AgentInCcb {
        /// Ledger timestamp
        timestamp: u64,
    },
    /// Liquidation started.
    LiquidationStarted {
        /// Ledger timestamp
        timestamp: u64,
    },
    /// Agent left liquidation (or the warning band).
    LiquidationEnded,
    /// Part of the agent's position was liquidated.
    LiquidationPerformed {
        /// Liquidated value (UBA)
        value: Amount,
    },
    /// Underlying balance below backing; full liquidation.
    UnderlyingBalanceTooLow,
    /// Two payments with the same reference were proved.
    DuplicatePaymentConfirmed {
        /// First transaction
        tx_id_1: TxId,
        /// Second transaction
        tx_id_2: TxId,
    },
    /// An illegal payment from the agent's address was proved.
    IllegalPaymentConfirmed {
        /// Offending transaction
        tx_id: TxId,
    },
}

impl LedgerEvent {
    /// Event name as emitted by the ledger contracts.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CollateralReserved(_) => "CollateralReserved",
            Self::CollateralReservationDeleted { .. } => "CollateralReservationDeleted",
            Self::MintingExecuted { .. } => "MintingExecuted",
            Self::RedemptionRequested(_) => "RedemptionRequested",
            Self::RedemptionDefault { .. } => "RedemptionDefault",
            Self::RedemptionPerformed { .. } => "RedemptionPerformed",
            Self::RedemptionPaymentFailed { .. } => "RedemptionPaymentFailed",
            Self::RedemptionPaymentBlocked { .. } => "RedemptionPaymentBlocked",
            Self::AgentDestroyed => "AgentDestroyed",
            Self::PriceEpochFinalized { .. } => "PriceEpochFinalized",
            Self::AgentInCcb { .. } => "AgentInCCB",
            Self::LiquidationStarted { .. } => "LiquidationStarted",
            Self::LiquidationEnded => "LiquidationEnded",
            Self::LiquidationPerformed { .. } => "LiquidationPerformed",
            Self::UnderlyingBalanceTooLow => "UnderlyingBalanceTooLow",
            Self::DuplicatePaymentConfirmed { .. } => "DuplicatePaymentConfirmed",
            Self::IllegalPaymentConfirmed { .. } => "IllegalPaymentConfirmed",
        }
    }
}

/// Decoded log entry with its ledger position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Where the log was emitted.
    pub position: EventPosition,
    /// Decoded event.
    pub event: LedgerEvent,
}

impl EventRecord {
    /// Create a record.
    pub fn new(block_number: u64, log_index: u64, event: LedgerEvent) -> Self {
        Self {
            position: EventPosition::new(block_number, log_index),
            event,
        }
    }
}
