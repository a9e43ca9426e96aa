//! # Integration Scenarios
//!
//! Every test ticks real [`agent_bot_core::AgentBotEngine`]s over the
//! simulated ledger, attestation client and underlying chain. Chain time is
//! moved explicitly, so each tick sees exactly the state the test set up.

#[cfg(test)]
pub(crate) mod harness;

pub mod minting;
pub mod operations;
pub mod recovery;
pub mod redemption;
