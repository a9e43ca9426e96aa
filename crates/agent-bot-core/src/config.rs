//! # Engine Configuration
//!
//! Parameters that shape lifecycle decisions. Chain-derived values
//! (finalization depth of the underlying chain, attestation window) are read
//! from the collaborators instead.

use crate::algorithms::{
    CCB_LIQUIDATION_PREVENTION_FACTOR_BIPS,
    NEGATIVE_FREE_UNDERLYING_BALANCE_PREVENTION_FACTOR_BIPS,
};
use crate::domain::{AgentBotError, AgentBotResult, Amount, UnderlyingAddress};
use std::str::FromStr;

/// One day in seconds.
pub const DAY_SECONDS: u64 = 86_400;

/// Agent bot engine configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentBotConfig {
    /// Native blocks behind the tip that are considered final.
    pub native_finalization_blocks: u64,
    /// Blocks per event log query.
    pub read_logs_chunk_size: u64,
    /// Re-applications of a failed event before it is dropped.
    pub max_event_retries: u32,
    /// Chain-time interval between daily corner-case scans (seconds).
    pub daily_task_period_seconds: u64,
    /// Non-Started redemptions handled per tick.
    pub max_non_priority_redemptions: usize,
    /// Margin over the warning-band ratio when topping up collateral.
    pub collateral_top_up_factor_bips: u64,
    /// Margin over the estimated fee for underlying top-ups.
    pub underlying_top_up_factor_bips: u64,
    /// Owner address on the underlying chain, source of top-ups.
    pub owner_underlying_address: UnderlyingAddress,
    /// Notify when the owner's vault collateral token balance drops to this.
    pub owner_low_vault_collateral_balance: Amount,
    /// Notify when the owner's native balance drops to this.
    pub owner_low_native_balance: Amount,
    /// Owner underlying balance kept on top of the top-up margin.
    pub owner_underlying_min_balance: Amount,
    /// Request payment proofs for own redemption payments and confirm them.
    pub confirm_redemption_payments: bool,
}

impl Default for AgentBotConfig {
    fn default() -> Self {
        Self {
            native_finalization_blocks: 2,
            read_logs_chunk_size: 10,
            max_event_retries: 5,
            daily_task_period_seconds: DAY_SECONDS,
            max_non_priority_redemptions: 50,
            collateral_top_up_factor_bips: CCB_LIQUIDATION_PREVENTION_FACTOR_BIPS,
            underlying_top_up_factor_bips: NEGATIVE_FREE_UNDERLYING_BALANCE_PREVENTION_FACTOR_BIPS,
            owner_underlying_address: String::new(),
            owner_low_vault_collateral_balance: 0,
            owner_low_native_balance: 0,
            owner_underlying_min_balance: 0,
            confirm_redemption_payments: true,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AgentBotConfig {
    /// Defaults overridden by `AGENT_BOT_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            native_finalization_blocks: env_or(
                "AGENT_BOT_NATIVE_FINALIZATION_BLOCKS",
                defaults.native_finalization_blocks,
            ),
            read_logs_chunk_size: env_or(
                "AGENT_BOT_READ_LOGS_CHUNK_SIZE",
                defaults.read_logs_chunk_size,
            ),
            max_event_retries: env_or("AGENT_BOT_MAX_EVENT_RETRIES", defaults.max_event_retries),
            daily_task_period_seconds: env_or(
                "AGENT_BOT_DAILY_TASK_PERIOD_SECONDS",
                defaults.daily_task_period_seconds,
            ),
            max_non_priority_redemptions: env_or(
                "AGENT_BOT_MAX_NON_PRIORITY_REDEMPTIONS",
                defaults.max_non_priority_redemptions,
            ),
            collateral_top_up_factor_bips: env_or(
                "AGENT_BOT_COLLATERAL_TOP_UP_FACTOR_BIPS",
                defaults.collateral_top_up_factor_bips,
            ),
            underlying_top_up_factor_bips: env_or(
                "AGENT_BOT_UNDERLYING_TOP_UP_FACTOR_BIPS",
                defaults.underlying_top_up_factor_bips,
            ),
            owner_underlying_address: std::env::var("AGENT_BOT_OWNER_UNDERLYING_ADDRESS")
                .unwrap_or(defaults.owner_underlying_address),
            owner_low_vault_collateral_balance: env_or(
                "AGENT_BOT_OWNER_LOW_VAULT_COLLATERAL_BALANCE",
                defaults.owner_low_vault_collateral_balance,
            ),
            owner_low_native_balance: env_or(
                "AGENT_BOT_OWNER_LOW_NATIVE_BALANCE",
                defaults.owner_low_native_balance,
            ),
            owner_underlying_min_balance: env_or(
                "AGENT_BOT_OWNER_UNDERLYING_MIN_BALANCE",
                defaults.owner_underlying_min_balance,
            ),
            confirm_redemption_payments: env_or(
                "AGENT_BOT_CONFIRM_REDEMPTION_PAYMENTS",
                defaults.confirm_redemption_payments,
            ),
        }
    }

    /// Reject settings under which the engine would stall or never read logs.
    pub fn validate(&self) -> AgentBotResult<()> {
        let invalid = |field, reason| Err(AgentBotError::InvalidConfig { field, reason });
        if self.read_logs_chunk_size == 0 {
            return invalid("read_logs_chunk_size", "must be positive");
        }
        if self.max_event_retries == 0 {
            return invalid("max_event_retries", "must be positive");
        }
        if self.daily_task_period_seconds == 0 {
            return invalid("daily_task_period_seconds", "must be positive");
        }
        if self.collateral_top_up_factor_bips < 10_000 {
            return invalid("collateral_top_up_factor_bips", "must be at least 10000");
        }
        if self.owner_underlying_address.is_empty() {
            return invalid("owner_underlying_address", "must be set");
        }
        Ok(())
    }
}
