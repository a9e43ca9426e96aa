//! # Domain Module
//!
//! Records, events, proofs and state machines of the agent lifecycle.

pub mod entities;
pub mod errors;
pub mod events;
pub mod invariants;
pub mod proofs;
pub mod schedule;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use events::*;
pub use invariants::*;
pub use proofs::*;
pub use schedule::*;
pub use value_objects::*;
