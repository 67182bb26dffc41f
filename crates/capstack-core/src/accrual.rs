use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::CapStackError;
use crate::types::{Cents, Rate};
use crate::CapStackResult;

/// Day-count basis for simple daily accrual.
const DAYS_PER_YEAR: Decimal = dec!(365);

/// A dated change to an investor's unreturned capital balance. Positive
/// deltas are contributions, negative deltas are returns of capital.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub date: NaiveDate,
    pub delta: Cents,
}

/// Preferred return accrued on an investor's outstanding unreturned capital
/// from its contribution/return timeline through `as_of`, in cents.
///
/// Simple (non-compounding) daily accrual: each segment between balance
/// changes contributes balance × rate × days / 365. The accrual is a pure
/// function of the timeline and the as-of date; fractional cents carry
/// across segments and round half-away-from-zero once at the end. Events
/// after `as_of` are ignored.
pub fn accrued_preferred(
    events: &[BalanceEvent],
    annual_rate: Rate,
    as_of: NaiveDate,
) -> CapStackResult<Cents> {
    if annual_rate.is_sign_negative() {
        return Err(CapStackError::InvalidInput {
            field: "annual_rate".into(),
            reason: "preferred rate cannot be negative".into(),
        });
    }

    let mut timeline: Vec<BalanceEvent> = events.to_vec();
    timeline.sort_by_key(|e| e.date);

    let mut balance: Cents = 0;
    let mut accrued = Decimal::ZERO;
    let mut cursor: Option<NaiveDate> = None;

    for event in &timeline {
        if event.date > as_of {
            break;
        }
        if let Some(prev) = cursor {
            let days = (event.date - prev).num_days();
            accrued += segment_accrual(balance, annual_rate, days);
        }
        balance += event.delta;
        if balance < 0 {
            return Err(CapStackError::InvalidInput {
                field: "events".into(),
                reason: "returns of capital exceed contributions in the timeline".into(),
            });
        }
        cursor = Some(event.date);
    }

    if let Some(prev) = cursor {
        let days = (as_of - prev).num_days();
        accrued += segment_accrual(balance, annual_rate, days);
    }

    accrued
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| CapStackError::InvalidInput {
            field: "events".into(),
            reason: "accrued amount out of representable range".into(),
        })
}

/// Accrued-but-unpaid preferred return: accrual to date less preferred
/// already paid, floored at zero.
pub fn accrued_unpaid(
    events: &[BalanceEvent],
    annual_rate: Rate,
    as_of: NaiveDate,
    preferred_paid: Cents,
) -> CapStackResult<Cents> {
    let accrued = accrued_preferred(events, annual_rate, as_of)?;
    Ok((accrued - preferred_paid).max(0))
}

fn segment_accrual(balance: Cents, rate: Rate, days: i64) -> Decimal {
    Decimal::from(balance) * rate * Decimal::from(days) / DAYS_PER_YEAR
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_full_year_on_flat_balance() {
        // $1,000,000.00 at 8% for exactly 365 days accrues $80,000.00
        let events = [BalanceEvent { date: d(2024, 1, 1), delta: 100_000_000 }];
        let accrued = accrued_preferred(&events, dec!(0.08), d(2024, 12, 31)).unwrap();
        assert_eq!(accrued, 8_000_000);
    }

    #[test]
    fn test_half_year_is_half_the_accrual() {
        // 146 days = 0.4 years exactly on a 365 basis
        let events = [BalanceEvent { date: d(2024, 1, 1), delta: 100_000_000 }];
        let accrued = accrued_preferred(&events, dec!(0.10), d(2024, 5, 26)).unwrap();
        assert_eq!(accrued, 4_000_000);
    }

    #[test]
    fn test_segments_across_balance_changes() {
        // $500k for 100 days, then $1m for 100 more at 7.3% (0.02% per day):
        // 500000_00 * 0.0002 * 100 + 1000000_00 * 0.0002 * 100
        let events = [
            BalanceEvent { date: d(2024, 1, 1), delta: 50_000_000 },
            BalanceEvent { date: d(2024, 4, 10), delta: 50_000_000 },
        ];
        let accrued = accrued_preferred(&events, dec!(0.073), d(2024, 7, 19)).unwrap();
        assert_eq!(accrued, 1_000_000 + 2_000_000);
    }

    #[test]
    fn test_capital_return_stops_accrual_on_returned_portion() {
        // Full return of capital half-way: second segment accrues on zero
        let events = [
            BalanceEvent { date: d(2024, 1, 1), delta: 100_000_000 },
            BalanceEvent { date: d(2024, 5, 26), delta: -100_000_000 },
        ];
        let accrued = accrued_preferred(&events, dec!(0.10), d(2025, 5, 26)).unwrap();
        assert_eq!(accrued, 4_000_000);
    }

    #[test]
    fn test_events_after_as_of_ignored() {
        let events = [
            BalanceEvent { date: d(2024, 1, 1), delta: 100_000_000 },
            BalanceEvent { date: d(2026, 1, 1), delta: 900_000_000 },
        ];
        let accrued = accrued_preferred(&events, dec!(0.08), d(2024, 12, 31)).unwrap();
        assert_eq!(accrued, 8_000_000);
    }

    #[test]
    fn test_no_events_no_accrual() {
        assert_eq!(accrued_preferred(&[], dec!(0.08), d(2024, 6, 1)).unwrap(), 0);
    }

    #[test]
    fn test_unsorted_timeline_is_sorted_first() {
        let events = [
            BalanceEvent { date: d(2024, 5, 26), delta: -100_000_000 },
            BalanceEvent { date: d(2024, 1, 1), delta: 100_000_000 },
        ];
        let accrued = accrued_preferred(&events, dec!(0.10), d(2025, 5, 26)).unwrap();
        assert_eq!(accrued, 4_000_000);
    }

    #[test]
    fn test_negative_balance_rejected() {
        let events = [BalanceEvent { date: d(2024, 1, 1), delta: -1 }];
        let result = accrued_preferred(&events, dec!(0.08), d(2024, 6, 1));
        assert!(matches!(result, Err(CapStackError::InvalidInput { .. })));
    }

    #[test]
    fn test_accrued_unpaid_nets_out_payments() {
        let events = [BalanceEvent { date: d(2024, 1, 1), delta: 100_000_000 }];
        let unpaid =
            accrued_unpaid(&events, dec!(0.08), d(2024, 12, 31), 3_000_000).unwrap();
        assert_eq!(unpaid, 5_000_000);

        // Paid ahead of accrual floors at zero
        let unpaid =
            accrued_unpaid(&events, dec!(0.08), d(2024, 12, 31), 9_000_000).unwrap();
        assert_eq!(unpaid, 0);
    }
}
