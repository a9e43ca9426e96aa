//! # Algorithms Module
//!
//! Pure arithmetic and ordering used by the lifecycles.

pub mod collateral;
pub mod deadlines;
pub mod ordering;
pub mod payment_reference;

pub use collateral::{
    required_top_up, underlying_top_up_amount, unstick_burn_amount,
    CCB_LIQUIDATION_PREVENTION_FACTOR_BIPS,
    NEGATIVE_FREE_UNDERLYING_BALANCE_PREVENTION_FACTOR_BIPS,
};
pub use deadlines::{
    confirmation_depth_reached, daily_tasks_due, payment_deadline_passed, proof_window_expired,
    still_time_to_pay,
};
pub use ordering::{order_new_events, prioritise_redemptions, read_ranges};
