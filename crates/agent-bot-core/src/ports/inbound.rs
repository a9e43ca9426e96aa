//! # Inbound Ports
//!
//! Owner-facing API: each call performs the ledger announcement and stores
//! the matching schedule entry for the timelock executor.

use crate::domain::{AgentBotResult, AgentSettingName, Amount, TxId};
use async_trait::async_trait;

/// Agent owner API - inbound port.
#[async_trait]
pub trait AgentOwnerApi: Send + Sync {
    /// Announce a vault collateral withdrawal. Returns the valid-at timestamp.
    async fn announce_vault_collateral_withdrawal(&self, amount: Amount) -> AgentBotResult<u64>;

    /// Announce a pool token redemption. Returns the valid-at timestamp.
    async fn announce_pool_token_redemption(&self, amount: Amount) -> AgentBotResult<u64>;

    /// Announce exit from the available agent list.
    async fn announce_exit_available(&self) -> AgentBotResult<u64>;

    /// Announce a setting update.
    async fn announce_setting_update(
        &self,
        setting: AgentSettingName,
        value: u128,
    ) -> AgentBotResult<u64>;

    /// Announce an underlying withdrawal. Returns the announcement timestamp.
    async fn announce_underlying_withdrawal(&self) -> AgentBotResult<u64>;

    /// Pay out the announced underlying withdrawal.
    async fn perform_underlying_withdrawal(
        &self,
        destination: &str,
        amount: Amount,
    ) -> AgentBotResult<TxId>;

    /// Ask for the announced underlying withdrawal to be cancelled.
    async fn cancel_underlying_withdrawal(&self) -> AgentBotResult<()>;

    /// Start closing the agent.
    async fn begin_destruction(&self) -> AgentBotResult<()>;
}
