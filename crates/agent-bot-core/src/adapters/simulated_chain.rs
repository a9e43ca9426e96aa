//! Deterministic underlying chain for tests and devnets.
//!
//! Blocks are mined explicitly; submitted payments are included in the
//! current tip block.

use crate::domain::{
    AgentBotError, AgentBotResult, Amount, PaymentReference, TxId, UnderlyingAddress,
    UnderlyingBlock,
};
use crate::ports::{UnderlyingChainClient, UnderlyingTransaction};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Chain parameters.
#[derive(Clone, Debug)]
pub struct SimulatedChainConfig {
    /// Blocks after which a transaction is final.
    pub finalization_blocks: u64,
    /// Seconds between blocks.
    pub seconds_per_block: u64,
    /// Fee charged per payment.
    pub transaction_fee: Amount,
    /// Timestamp of block 0.
    pub genesis_timestamp: u64,
}

impl Default for SimulatedChainConfig {
    fn default() -> Self {
        Self {
            finalization_blocks: 3,
            seconds_per_block: 10,
            transaction_fee: 10,
            genesis_timestamp: 1_700_000_000,
        }
    }
}

#[derive(Debug, Default)]
struct ChainState {
    blocks: Vec<UnderlyingBlock>,
    balances: HashMap<UnderlyingAddress, Amount>,
    transactions: Vec<UnderlyingTransaction>,
    reject_submissions: bool,
}

/// In-memory underlying chain.
#[derive(Debug)]
pub struct SimulatedUnderlyingChain {
    config: SimulatedChainConfig,
    state: RwLock<ChainState>,
}

impl SimulatedUnderlyingChain {
    /// Chain with only the genesis block.
    pub fn new(config: SimulatedChainConfig) -> Self {
        let genesis = UnderlyingBlock::new(0, config.genesis_timestamp);
        Self {
            config,
            state: RwLock::new(ChainState {
                blocks: vec![genesis],
                ..ChainState::default()
            }),
        }
    }

    /// Mine `count` empty blocks.
    pub fn mine(&self, count: u64) -> UnderlyingBlock {
        let mut state = self.state.write();
        for _ in 0..count {
            let tip = Self::tip_of(&state);
            state.blocks.push(UnderlyingBlock::new(
                tip.number + 1,
                tip.timestamp + self.config.seconds_per_block,
            ));
        }
        Self::tip_of(&state)
    }

    /// Current tip.
    pub fn tip(&self) -> UnderlyingBlock {
        Self::tip_of(&self.state.read())
    }

    fn tip_of(state: &ChainState) -> UnderlyingBlock {
        state
            .blocks
            .last()
            .copied()
            .unwrap_or(UnderlyingBlock::new(0, 0))
    }

    /// Lowest block at or after `timestamp`.
    pub fn first_block_since(&self, timestamp: u64) -> UnderlyingBlock {
        let state = self.state.read();
        state
            .blocks
            .iter()
            .find(|b| b.timestamp >= timestamp)
            .copied()
            .unwrap_or_else(|| Self::tip_of(&state))
    }

    /// Credit an address.
    pub fn fund(&self, address: &str, amount: Amount) {
        let mut state = self.state.write();
        *state.balances.entry(address.to_string()).or_default() += amount;
    }

    /// Make `submit_payment` fail.
    pub fn set_reject_submissions(&self, reject: bool) {
        self.state.write().reject_submissions = reject;
    }

    /// Transaction lookup without going through the port.
    pub fn find_transaction(&self, tx_id: &str) -> Option<UnderlyingTransaction> {
        self.state
            .read()
            .transactions
            .iter()
            .find(|tx| tx.tx_id == tx_id)
            .cloned()
    }

    /// Payments sent from `address`.
    pub fn payments_from(&self, address: &str) -> Vec<UnderlyingTransaction> {
        self.state
            .read()
            .transactions
            .iter()
            .filter(|tx| tx.first_input().map(String::as_str) == Some(address))
            .cloned()
            .collect()
    }

    /// Transactions carrying `reference` within blocks `[first, last]`.
    pub fn referenced_in_window(
        &self,
        reference: &PaymentReference,
        first: u64,
        last: u64,
    ) -> Vec<UnderlyingTransaction> {
        self.state
            .read()
            .transactions
            .iter()
            .filter(|tx| tx.reference.as_ref() == Some(reference))
            .filter(|tx| matches!(tx.block_number, Some(b) if b >= first && b <= last))
            .cloned()
            .collect()
    }
}

impl Default for SimulatedUnderlyingChain {
    fn default() -> Self {
        Self::new(SimulatedChainConfig::default())
    }
}

#[async_trait]
impl UnderlyingChainClient for SimulatedUnderlyingChain {
    async fn block_height(&self) -> AgentBotResult<u64> {
        Ok(self.tip().number)
    }

    async fn block_at(&self, number: u64) -> AgentBotResult<Option<UnderlyingBlock>> {
        let state = self.state.read();
        Ok(usize::try_from(number)
            .ok()
            .and_then(|index| state.blocks.get(index).copied()))
    }

    async fn transaction(&self, tx_id: &str) -> AgentBotResult<Option<UnderlyingTransaction>> {
        Ok(self.find_transaction(tx_id))
    }

    async fn transactions_by_reference(
        &self,
        reference: &PaymentReference,
    ) -> AgentBotResult<Vec<UnderlyingTransaction>> {
        Ok(self
            .state
            .read()
            .transactions
            .iter()
            .filter(|tx| tx.reference.as_ref() == Some(reference))
            .cloned()
            .collect())
    }

    async fn submit_payment(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
        reference: Option<PaymentReference>,
    ) -> AgentBotResult<TxId> {
        let mut state = self.state.write();
        if state.reject_submissions {
            return Err(AgentBotError::Underlying("wallet unavailable".to_string()));
        }
        let total = amount.saturating_add(self.config.transaction_fee);
        let balance = state.balances.get(from).copied().unwrap_or_default();
        if balance < total {
            return Err(AgentBotError::Underlying(format!(
                "insufficient funds on {from}: {balance} < {total}"
            )));
        }
        state.balances.insert(from.to_string(), balance - total);
        *state.balances.entry(to.to_string()).or_default() += amount;

        let tx_id = format!("utx-{}", state.transactions.len() + 1);
        let block_number = Self::tip_of(&state).number;
        state.transactions.push(UnderlyingTransaction {
            tx_id: tx_id.clone(),
            block_number: Some(block_number),
            inputs: vec![(from.to_string(), total)],
            outputs: vec![(to.to_string(), amount)],
            reference,
        });
        debug!(
            "[underlying] {} paid {} to {} in block {}",
            from, amount, to, block_number
        );
        Ok(tx_id)
    }

    async fn transaction_fee(&self) -> AgentBotResult<Amount> {
        Ok(self.config.transaction_fee)
    }

    async fn balance(&self, address: &str) -> AgentBotResult<Amount> {
        Ok(self
            .state
            .read()
            .balances
            .get(address)
            .copied()
            .unwrap_or_default())
    }

    fn finalization_blocks(&self) -> u64 {
        self.config.finalization_blocks
    }

    fn seconds_per_block(&self) -> u64 {
        self.config.seconds_per_block
    }
}
