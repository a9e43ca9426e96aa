//! # Runtime Configuration
//!
//! Process-level settings: which agents to run, how often to tick and the
//! shape of the in-process devnet. Engine semantics live in
//! [`agent_bot_core::AgentBotConfig`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Interval between ticks of all engines.
    pub poll_interval_ms: u64,
    /// Agent vault addresses to run.
    pub agents: Vec<String>,
    /// Owner native address of the devnet agents.
    pub owner_address: String,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Interval between devnet blocks on both chains.
    pub devnet_block_interval_ms: u64,
    /// Initial underlying funds of each devnet agent and of the owner.
    pub devnet_initial_underlying_balance: u128,
    /// File the store is loaded from at startup and saved to after every
    /// tick. Unset keeps state in memory only.
    pub store_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            agents: vec!["0xa9e470".to_string()],
            owner_address: "0x0a11ce".to_string(),
            log_level: "info".to_string(),
            devnet_block_interval_ms: 2_000,
            devnet_initial_underlying_balance: 1_000_000,
            store_path: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Poll interval of zero.
    #[error("AGENT_BOT_POLL_INTERVAL_MS must be positive")]
    ZeroPollInterval,

    /// Devnet block interval of zero.
    #[error("AGENT_BOT_DEVNET_BLOCK_INTERVAL_MS must be positive")]
    ZeroBlockInterval,

    /// Nothing to run.
    #[error("AGENT_BOT_AGENTS lists no agent vault")]
    NoAgents,

    /// The same vault listed twice.
    #[error("Agent vault {0} listed more than once")]
    DuplicateAgent(String),
}

impl RuntimeConfig {
    /// Defaults overridden by `AGENT_BOT_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let agents = std::env::var("AGENT_BOT_AGENTS")
            .ok()
            .map(|v| parse_list(&v))
            .unwrap_or(defaults.agents);
        Self {
            poll_interval_ms: env_or("AGENT_BOT_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            agents,
            owner_address: std::env::var("AGENT_BOT_OWNER_ADDRESS")
                .unwrap_or(defaults.owner_address),
            log_level: std::env::var("AGENT_BOT_LOG_LEVEL").unwrap_or(defaults.log_level),
            devnet_block_interval_ms: env_or(
                "AGENT_BOT_DEVNET_BLOCK_INTERVAL_MS",
                defaults.devnet_block_interval_ms,
            ),
            devnet_initial_underlying_balance: env_or(
                "AGENT_BOT_DEVNET_INITIAL_UNDERLYING_BALANCE",
                defaults.devnet_initial_underlying_balance,
            ),
            store_path: std::env::var("AGENT_BOT_STORE_PATH")
                .ok()
                .and_then(|v| parse_path(&v)),
        }
    }

    /// Reject configurations the runtime cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.devnet_block_interval_ms == 0 {
            return Err(ConfigError::ZeroBlockInterval);
        }
        if self.agents.is_empty() {
            return Err(ConfigError::NoAgents);
        }
        for (i, agent) in self.agents.iter().enumerate() {
            if self.agents[..i].contains(agent) {
                return Err(ConfigError::DuplicateAgent(agent.clone()));
            }
        }
        Ok(())
    }

    /// Tick interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Devnet block interval.
    pub fn devnet_block_interval(&self) -> Duration {
        Duration::from_millis(self.devnet_block_interval_ms)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_path(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    (!value.is_empty()).then(|| PathBuf::from(value))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
