//! # Payment References
//!
//! 32-byte references: an 8-byte type prefix followed by a 24-byte
//! big-endian id (or the low 24 bytes of an address).

use crate::domain::PaymentReference;
use sha2::{Digest, Sha256};

/// Minting payment.
pub const TYPE_MINTING: u64 = 0x4642_5052_6641_0001;
/// Redemption payment.
pub const TYPE_REDEMPTION: u64 = 0x4642_5052_6641_0002;
/// Announced underlying withdrawal.
pub const TYPE_ANNOUNCED_WITHDRAWAL: u64 = 0x4642_5052_6641_0003;
/// Underlying top-up.
pub const TYPE_TOPUP: u64 = 0x4642_5052_6641_0011;

fn encode(prefix: u64, body: &[u8]) -> PaymentReference {
    let mut reference = [0u8; 32];
    reference[..8].copy_from_slice(&prefix.to_be_bytes());
    let take = body.len().min(24);
    reference[32 - take..].copy_from_slice(&body[body.len() - take..]);
    reference
}

/// Reference for a collateral reservation.
pub fn minting(request_id: u64) -> PaymentReference {
    encode(TYPE_MINTING, &request_id.to_be_bytes())
}

/// Reference for a redemption request.
pub fn redemption(request_id: u64) -> PaymentReference {
    encode(TYPE_REDEMPTION, &request_id.to_be_bytes())
}

/// Reference for an announced underlying withdrawal.
pub fn announced_withdrawal(announcement_id: u64) -> PaymentReference {
    encode(TYPE_ANNOUNCED_WITHDRAWAL, &announcement_id.to_be_bytes())
}

/// Reference for an underlying top-up of `vault`.
///
/// Hex addresses are embedded directly; anything else is hashed first.
pub fn top_up(vault: &str) -> PaymentReference {
    let stripped = vault.strip_prefix("0x").unwrap_or(vault);
    match hex::decode(stripped) {
        Ok(bytes) if !bytes.is_empty() => encode(TYPE_TOPUP, &bytes),
        _ => encode(TYPE_TOPUP, Sha256::digest(vault.as_bytes()).as_slice()),
    }
}

/// Type prefix of a reference.
pub fn reference_type(reference: &PaymentReference) -> u64 {
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&reference[..8]);
    u64::from_be_bytes(prefix)
}

/// `0x`-prefixed hex rendering.
pub fn to_hex(reference: &PaymentReference) -> String {
    format!("0x{}", hex::encode(reference))
}
