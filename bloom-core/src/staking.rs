use serde::{Deserialize, Serialize};

/// Price of one credit in stake units.
pub const CREDIT_PRICE: f64 = 0.05;
/// Extra credits granted on top of the stake's face value.
pub const STAKING_BONUS: f64 = 0.2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoiEstimate {
    pub direct_cost: f64,
    pub staking_credits: f64,
    pub staking_value: f64,
    pub savings: f64,
    pub roi_percent: f64,
    pub break_even_days: Option<u64>,
}

pub fn credits_for_stake(amount: f64) -> f64 {
    amount / CREDIT_PRICE * (1.0 + STAKING_BONUS)
}

/// Compares paying for `credits_used` directly against covering them with a
/// stake. The stake's credits are capped at what was actually used before
/// being priced.
pub fn estimate_roi(staked_amount: f64, credits_used: f64, timeframe_days: f64) -> RoiEstimate {
    let direct_cost = credits_used * CREDIT_PRICE;
    let staking_credits = credits_for_stake(staked_amount);
    let covered_credits = credits_used.min(staking_credits);
    let staking_value = covered_credits * CREDIT_PRICE;
    let savings = staking_value - direct_cost;

    let roi_percent = if staked_amount > 0.0 {
        savings / staked_amount * 100.0
    } else {
        0.0
    };

    let break_even_days = if timeframe_days > 0.0 && credits_used > 0.0 {
        // staked / (credits_used / days * price), rearranged to keep the division last
        let days = staked_amount * timeframe_days / (credits_used * CREDIT_PRICE);
        Some(days.ceil().max(0.0) as u64)
    } else {
        None
    };

    RoiEstimate {
        direct_cost,
        staking_credits,
        staking_value,
        savings,
        roi_percent,
        break_even_days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn stake_covering_all_usage_breaks_even() {
        let roi = estimate_roi(20.0, 200.0, 30.0);
        assert!(close(roi.direct_cost, 10.0));
        assert!(close(roi.staking_credits, 480.0));
        assert!(close(roi.staking_value, 10.0));
        assert!(close(roi.savings, 0.0));
        assert!(close(roi.roi_percent, 0.0));
        // 200 credits over 30 days costs 1/3 per day; 20 staked lasts 60 days
        assert_eq!(roi.break_even_days, Some(60));
    }

    #[test]
    fn cap_applies_before_pricing() {
        // 1 staked buys 24 credits, so only 24 of 100 are covered
        let roi = estimate_roi(1.0, 100.0, 10.0);
        assert!(close(roi.staking_credits, 24.0));
        assert!(close(roi.staking_value, 1.2));
        assert!(close(roi.direct_cost, 5.0));
        assert!(close(roi.savings, -3.8));
        assert!(close(roi.roi_percent, -380.0));
    }

    #[test]
    fn zero_inputs_do_not_divide_by_zero() {
        let roi = estimate_roi(0.0, 0.0, 0.0);
        assert_eq!(roi.roi_percent, 0.0);
        assert_eq!(roi.break_even_days, None);

        let roi = estimate_roi(10.0, 50.0, 0.0);
        assert_eq!(roi.break_even_days, None);
    }

    #[test]
    fn stake_grants_bonus_credits() {
        assert!(close(credits_for_stake(10.0), 240.0));
    }
}
