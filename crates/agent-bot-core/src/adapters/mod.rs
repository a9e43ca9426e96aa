//! # Adapters Module
//!
//! In-process implementations of every outbound port. They back the test
//! suites and the runtime's devnet mode.

pub mod memory_store;
pub mod notifier;
pub mod simulated_attestation;
pub mod simulated_chain;
pub mod simulated_ledger;

pub use memory_store::{InMemoryAgentStore, StoreSnapshot};
pub use notifier::{FanoutNotifier, RecordingNotifier, TracingNotifier};
pub use simulated_attestation::SimulatedAttestationClient;
pub use simulated_chain::{SimulatedChainConfig, SimulatedUnderlyingChain};
pub use simulated_ledger::{LedgerCall, SimulatedLedger, SimulatedLedgerConfig};
