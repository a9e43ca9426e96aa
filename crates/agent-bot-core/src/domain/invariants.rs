//! # Domain Invariants
//!
//! Checks applied by stores before a unit of work is accepted.

use super::entities::{MintingRecord, RedemptionRecord};
use super::errors::{AgentBotError, AgentBotResult};
use super::schedule::EventWatermark;

/// Invariant: a stored minting only moves forward.
///
/// Same state (field updates only) or a valid transition.
pub fn invariant_minting_forward(
    stored: &MintingRecord,
    updated: &MintingRecord,
) -> AgentBotResult<()> {
    if stored.state == updated.state || stored.state.can_transition_to(updated.state) {
        return Ok(());
    }
    Err(AgentBotError::InvalidMintingTransition {
        from: format!("{:?}", stored.state),
        to: format!("{:?}", updated.state),
    })
}

/// Invariant: a stored redemption only moves forward.
pub fn invariant_redemption_forward(
    stored: &RedemptionRecord,
    updated: &RedemptionRecord,
) -> AgentBotResult<()> {
    if stored.state == updated.state || stored.state.can_transition_to(updated.state) {
        return Ok(());
    }
    Err(AgentBotError::InvalidRedemptionTransition {
        from: format!("{:?}", stored.state),
        to: format!("{:?}", updated.state),
    })
}

/// Invariant: the persisted watermark is non-decreasing.
pub fn invariant_watermark_forward(
    stored: &EventWatermark,
    updated: &EventWatermark,
) -> AgentBotResult<()> {
    let regressed_block = updated.next_block < stored.next_block;
    let regressed_event = match (stored.last_applied, updated.last_applied) {
        (Some(_), None) => true,
        (Some(old), Some(new)) => new < old,
        _ => false,
    };
    if regressed_block || regressed_event {
        return Err(AgentBotError::WatermarkRegression {
            current: format!("{}@{:?}", stored.next_block, stored.last_applied),
            attempted: format!("{}@{:?}", updated.next_block, updated.last_applied),
        });
    }
    Ok(())
}
