//! # Agent Bot Test Suite
//!
//! Unified test crate driving whole engines against the in-process devnet.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs     # Devnet fixture shared by every suite
//!     ├── minting.rs     # Scenarios A, B, C
//!     ├── redemption.rs  # Scenarios D, E, priority cap
//!     ├── recovery.rs    # Restarts, replays, crashed commits
//!     └── operations.rs  # Owner timelocks, destruction, top-ups, runner
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p agent-bot-tests
//!
//! # By suite
//! cargo test -p agent-bot-tests integration::minting::
//! cargo test -p agent-bot-tests integration::recovery::
//! ```

pub mod integration;
