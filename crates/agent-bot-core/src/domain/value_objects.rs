//! # Domain Value Objects
//!
//! Lifecycle states and small immutable types.

use serde::{Deserialize, Serialize};

/// Basis points in 100%.
pub const MAX_BIPS: u64 = 10_000;

/// Minting state machine.
///
/// ```text
/// Started ──payment found──→ AwaitingPaymentProof ──proved──→ Done
///    │    ──no payment────→ AwaitingNonPaymentProof ──proved──→ Done
///    └──────window expired (unstick)────────────────────────→ Done
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MintingState {
    /// Reservation observed, waiting for the payment deadline.
    #[default]
    Started,
    /// Payment proof requested.
    AwaitingPaymentProof,
    /// Non-payment proof requested.
    AwaitingNonPaymentProof,
    /// Executed, defaulted, deleted or unstuck.
    Done,
}

impl MintingState {
    /// Check if transition is valid.
    pub fn can_transition_to(&self, next: MintingState) -> bool {
        match (self, next) {
            (Self::Started, Self::AwaitingPaymentProof) => true,
            (Self::Started, Self::AwaitingNonPaymentProof) => true,
            (Self::Started, Self::Done) => true, // unstick or closing event
            (Self::AwaitingPaymentProof, Self::Done) => true,
            (Self::AwaitingNonPaymentProof, Self::Done) => true,
            _ => false,
        }
    }

    /// Check if terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Redemption state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RedemptionState {
    /// Request observed, not yet paid.
    #[default]
    Started,
    /// Underlying payment submitted.
    Paid,
    /// Payment proof requested.
    AwaitingProof,
    /// Paid, confirmation left to third parties.
    ProofNotRequested,
    /// Confirmed, finished without payment, or closed by a ledger event.
    Done,
}

impl RedemptionState {
    /// Check if transition is valid.
    pub fn can_transition_to(&self, next: RedemptionState) -> bool {
        match (self, next) {
            (Self::Started, Self::Paid) => true,
            (Self::Paid, Self::AwaitingProof) => true,
            (Self::Paid, Self::ProofNotRequested) => true,
            (Self::Done, _) => false,
            (_, Self::Done) => true,
            _ => false,
        }
    }

    /// Check if terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Processing priority, lower first.
    pub fn handling_priority(&self) -> u8 {
        match self {
            Self::Started => 0,
            Self::Paid | Self::AwaitingProof => 1,
            Self::ProofNotRequested => 2,
            Self::Done => u8::MAX,
        }
    }
}

/// Ledger outcome that closed a redemption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedemptionFinalState {
    /// Payment confirmed as correct.
    Performed,
    /// Payment confirmed as failed or insufficient.
    Failed,
    /// Payment blocked by the receiving address.
    Blocked,
    /// Closed by the agent after the proof window expired.
    FinishedWithoutPayment,
}

/// Two-phase state of the daily block-height proof.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DailyProofState {
    /// Last proof obtained (or none yet); next run requests a new one.
    #[default]
    ObtainedProof,
    /// Proof requested, polling its round.
    WaitingProof,
}

/// Agent collateral classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollateralClass {
    /// Vault collateral (stablecoin or similar ERC20).
    Vault,
    /// Collateral pool (native token).
    Pool,
}

impl CollateralClass {
    /// Both classes, vault first.
    pub const ALL: [CollateralClass; 2] = [CollateralClass::Vault, CollateralClass::Pool];
}

/// The eight agent settings whose updates are timelocked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentSettingName {
    /// Minting fee.
    FeeBips,
    /// Pool share of the minting fee.
    PoolFeeShareBips,
    /// Vault collateral ratio required for minting.
    MintingVaultCollateralRatioBips,
    /// Pool collateral ratio required for minting.
    MintingPoolCollateralRatioBips,
    /// Price factor when the agent buys fassets.
    BuyFAssetByAgentFactorBips,
    /// Pool exit collateral ratio.
    PoolExitCollateralRatioBips,
    /// Pool top-up collateral ratio.
    PoolTopupCollateralRatioBips,
    /// Pool top-up token price factor.
    PoolTopupTokenPriceFactorBips,
}

impl AgentSettingName {
    /// Name table, in execution order.
    pub const ALL: [AgentSettingName; 8] = [
        AgentSettingName::FeeBips,
        AgentSettingName::PoolFeeShareBips,
        AgentSettingName::MintingVaultCollateralRatioBips,
        AgentSettingName::MintingPoolCollateralRatioBips,
        AgentSettingName::BuyFAssetByAgentFactorBips,
        AgentSettingName::PoolExitCollateralRatioBips,
        AgentSettingName::PoolTopupCollateralRatioBips,
        AgentSettingName::PoolTopupTokenPriceFactorBips,
    ];

    /// Setting name as known to the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FeeBips => "feeBIPS",
            Self::PoolFeeShareBips => "poolFeeShareBIPS",
            Self::MintingVaultCollateralRatioBips => "mintingVaultCollateralRatioBIPS",
            Self::MintingPoolCollateralRatioBips => "mintingPoolCollateralRatioBIPS",
            Self::BuyFAssetByAgentFactorBips => "buyFAssetByAgentFactorBIPS",
            Self::PoolExitCollateralRatioBips => "poolExitCollateralRatioBIPS",
            Self::PoolTopupCollateralRatioBips => "poolTopupCollateralRatioBIPS",
            Self::PoolTopupTokenPriceFactorBips => "poolTopupTokenPriceFactorBIPS",
        }
    }

    /// Reverse lookup in the name table.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|setting| setting.as_str() == name)
    }
}

impl std::fmt::Display for AgentSettingName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Block on the underlying chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderlyingBlock {
    /// Block number.
    pub number: u64,
    /// Block timestamp (seconds).
    pub timestamp: u64,
}

impl UnderlyingBlock {
    /// Create a block reference.
    pub fn new(number: u64, timestamp: u64) -> Self {
        Self { number, timestamp }
    }
}
