//! # Agent Bot Core
//!
//! Per-agent lifecycle engine of an FAsset agent bot.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! An agent backs synthetic assets (fassets) with collateral on a
//! smart-contract ledger and holds the real assets on an external payment
//! chain. For each agent vault the engine:
//! - follows minting requests to execution, default or unsticking
//! - pays redemptions and proves the payments to the ledger
//! - closes records whose proof window expired (daily corner-case scan)
//! - reconciles the ledger event log into persisted records, replay-safe
//! - executes timelocked owner announcements and tops up collateral
//!
//! ## Tick Flow
//!
//! ```text
//! Ledger log ──events──→ EventReconciler ──records──→ PersistentStore
//!                                                        │
//!        ┌───────────────────────────────────────────────┤
//!        ↓                       ↓                       ↓
//! RedemptionLifecycle     MintingLifecycle       TimelockExecutor
//!        │                       │                       │
//!        └──── payments, proofs, ledger calls ───────────┘
//!                                │
//!                          DailyScanner ──block-height proof──→ cache
//! ```
//!
//! ## Module Structure
//!
//! ```text
//! agent-bot-core/
//! ├── domain/          # Records, events, proofs, schedule, state machines
//! ├── algorithms/      # Deadlines, collateral arithmetic, ordering, references
//! ├── ports/           # Owner API + ledger/attestation/chain/store/notifier traits
//! ├── adapters/        # In-memory store and simulated collaborators
//! ├── service/         # Engine, lifecycles, reconciler, scanner, timelocks
//! ├── config.rs        # Engine configuration
//! └── runner.rs        # Concurrent multi-agent tick loop
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod config;
pub mod domain;
pub mod ports;
pub mod runner;
pub mod service;

// Re-exports
pub use config::AgentBotConfig;
pub use domain::{
    AgentBotError, AgentBotResult, AgentSchedule, AttestationProof, CollateralClass, EventRecord,
    LedgerEvent, MintingRecord, MintingState, ProofOutcome, RedemptionFinalState,
    RedemptionRecord, RedemptionState, TimelockAction,
};
pub use ports::{
    AgentOwnerApi, AttestationClient, LedgerClient, Notification, Notifier, PersistentStore,
    UnderlyingChainClient, UnitOfWork,
};
pub use runner::AgentBotRunner;
pub use service::{AgentBotContext, AgentBotEngine};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
