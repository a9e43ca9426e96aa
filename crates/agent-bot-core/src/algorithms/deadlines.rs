//! # Deadline Arithmetic
//!
//! The three expiry races: the external payment deadline, the attestors'
//! proof-availability window and plain confirmation depth. All inputs are
//! chain time; nothing here reads a wall clock.

use crate::domain::{AttestationProof, UnderlyingBlock};

/// Minting payment deadline has passed on the underlying chain.
///
/// `last_underlying_block + 1 + finalization_blocks < latest.number`
pub fn payment_deadline_passed(
    last_underlying_block: u64,
    finalization_blocks: u64,
    latest: UnderlyingBlock,
) -> bool {
    last_underlying_block
        .saturating_add(1)
        .saturating_add(finalization_blocks)
        < latest.number
}

/// A redemption payment submitted now would still land before its deadline.
///
/// Either the block or the timestamp bound suffices.
pub fn still_time_to_pay(
    latest: UnderlyingBlock,
    finalization_blocks: u64,
    seconds_per_block: u64,
    last_underlying_block: u64,
    last_underlying_timestamp: u64,
) -> bool {
    let by_block = latest
        .number
        .saturating_add(finalization_blocks)
        .saturating_add(1)
        < last_underlying_block;
    let by_time = latest
        .timestamp
        .saturating_add(finalization_blocks.saturating_mul(seconds_per_block))
        .saturating_add(seconds_per_block)
        < last_underlying_timestamp;
    by_block || by_time
}

/// The attestors can no longer prove anything about the payment window.
///
/// True only when both the lowest queryable block and its timestamp lie past
/// the window's end. `false` for proofs without a query window.
pub fn proof_window_expired(
    block_height_proof: &AttestationProof,
    last_underlying_block: u64,
    last_underlying_timestamp: u64,
) -> bool {
    match block_height_proof.lowest_query_window() {
        Some((lqw_block, lqw_timestamp)) => {
            lqw_block > last_underlying_block && lqw_timestamp > last_underlying_timestamp
        }
        None => false,
    }
}

/// Transaction is deep enough to request its proof.
pub fn confirmation_depth_reached(height: u64, tx_block: u64, finalization_blocks: u64) -> bool {
    height.saturating_sub(tx_block) >= finalization_blocks
}

/// Daily tasks are due: strictly more than `period` elapsed in chain time.
pub fn daily_tasks_due(latest_timestamp: u64, last_run_timestamp: u64, period_seconds: u64) -> bool {
    latest_timestamp.saturating_sub(last_run_timestamp) > period_seconds
}
