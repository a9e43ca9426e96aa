//! # Service Module
//!
//! Per-agent lifecycle engine and the components it steps each tick.

pub mod context;
pub mod engine;
pub mod minting;
pub mod reconciler;
pub mod redemption;
pub mod scanner;
pub mod timelocks;
pub mod top_up;

#[cfg(test)]
pub(crate) mod testkit;

pub use context::AgentBotContext;
pub use engine::AgentBotEngine;
pub use minting::MintingLifecycle;
pub use reconciler::{EventReconciler, FollowUp};
pub use redemption::RedemptionLifecycle;
pub use scanner::DailyScanner;
pub use timelocks::TimelockExecutor;
pub use top_up::{CollateralTopUp, UnderlyingTopUp};
