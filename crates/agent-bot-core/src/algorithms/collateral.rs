//! # Collateral Arithmetic
//!
//! Top-up shortfalls and unstick burn amounts, in basis points.

use crate::domain::{Amount, MAX_BIPS};
use crate::ports::CollateralPrice;

/// Safety margin over the warning-band ratio when topping up (1.2x).
pub const CCB_LIQUIDATION_PREVENTION_FACTOR_BIPS: u64 = 12_000;

/// Underlying balance margin over the estimated fee (1.2x).
pub const NEGATIVE_FREE_UNDERLYING_BALANCE_PREVENTION_FACTOR_BIPS: u64 = 12_000;

fn apply_bips(amount: Amount, bips: u64) -> Amount {
    amount.saturating_mul(Amount::from(bips)) / Amount::from(MAX_BIPS)
}

/// Collateral to add so that `backed_uba` is covered at
/// `ccb_min_collateral_ratio × factor`. Zero when `balance` suffices.
pub fn required_top_up(
    price: &CollateralPrice,
    backed_uba: Amount,
    balance: Amount,
    factor_bips: u64,
) -> Amount {
    let backing = price.convert_uba_to_token_wei(backed_uba);
    let required = apply_bips(
        apply_bips(backing, price.ccb_min_collateral_ratio_bips),
        factor_bips,
    );
    required.saturating_sub(balance)
}

/// Native tokens burned to unstick a minting of `value_uba`.
pub fn unstick_burn_amount(
    pool_price: &CollateralPrice,
    value_uba: Amount,
    buy_for_flare_factor_bips: u64,
) -> Amount {
    apply_bips(
        pool_price.convert_uba_to_token_wei(value_uba),
        buy_for_flare_factor_bips,
    )
}

/// Underlying top-up amount when the free balance is at or below the
/// fee margin, `None` otherwise.
pub fn underlying_top_up_amount(
    free_underlying_balance: i128,
    estimated_fee: Amount,
    factor_bips: u64,
) -> Option<Amount> {
    let threshold = apply_bips(estimated_fee, factor_bips);
    let below = match u128::try_from(free_underlying_balance) {
        Ok(free) => free <= threshold,
        Err(_) => true,
    };
    below.then_some(threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CollateralClass;

    #[test]
    fn test_required_top_up_shortfall() {
        let price = CollateralPrice::at_par(CollateralClass::Vault, 15_000);
        // 1000 * 1.5 * 1.2 = 1800
        assert_eq!(
            required_top_up(&price, 1_000, 1_500, CCB_LIQUIDATION_PREVENTION_FACTOR_BIPS),
            300
        );
        assert_eq!(
            required_top_up(&price, 1_000, 2_000, CCB_LIQUIDATION_PREVENTION_FACTOR_BIPS),
            0
        );
    }

    #[test]
    fn test_required_top_up_uses_price() {
        let price = CollateralPrice {
            class: CollateralClass::Pool,
            price_mul: 2,
            price_div: 1,
            ccb_min_collateral_ratio_bips: 20_000,
        };
        // 500 UBA -> 1000 wei, * 2.0 * 1.2 = 2400
        assert_eq!(
            required_top_up(&price, 500, 0, CCB_LIQUIDATION_PREVENTION_FACTOR_BIPS),
            2_400
        );
    }

    #[test]
    fn test_unstick_burn_amount() {
        let price = CollateralPrice {
            class: CollateralClass::Pool,
            price_mul: 3,
            price_div: 1,
            ccb_min_collateral_ratio_bips: 0,
        };
        assert_eq!(unstick_burn_amount(&price, 1_000, 11_000), 3_300);
    }

    #[test]
    fn test_underlying_top_up_threshold() {
        let factor = NEGATIVE_FREE_UNDERLYING_BALANCE_PREVENTION_FACTOR_BIPS;
        assert_eq!(underlying_top_up_amount(120, 100, factor), Some(120));
        assert_eq!(underlying_top_up_amount(121, 100, factor), None);
        assert_eq!(underlying_top_up_amount(-5, 100, factor), Some(120));
    }
}
