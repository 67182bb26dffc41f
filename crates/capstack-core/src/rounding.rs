use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::error;

use crate::error::CapStackError;
use crate::types::Cents;
use crate::CapStackResult;

/// Resolve fractional ideal shares into integer-cent shares that sum exactly
/// to `total`.
///
/// Each ideal share (expressed in cents, possibly fractional) is floored,
/// then the leftover cents are handed out one at a time in order of largest
/// fractional remainder. Ties break toward the earliest position, so callers
/// present recipients sorted by ascending investor id. The function is
/// deterministic and idempotent: identical inputs always produce identical
/// output, which audit replays rely on.
///
/// Fails `RoundingInvariantViolation` when the ideals are inconsistent with
/// the target total (floors overshoot, or the leftover exceeds one cent per
/// recipient). That error signals a bug in the calling allocator and is
/// logged, never corrected.
pub fn resolve_exact(total: Cents, ideals: &[Decimal]) -> CapStackResult<Vec<Cents>> {
    if total < 0 {
        return Err(CapStackError::InvalidInput {
            field: "total".into(),
            reason: "cannot resolve a negative total".into(),
        });
    }
    if ideals.is_empty() {
        if total == 0 {
            return Ok(Vec::new());
        }
        return Err(CapStackError::InvalidInput {
            field: "ideals".into(),
            reason: "cannot allocate a non-zero total across zero recipients".into(),
        });
    }

    let mut floors: Vec<Cents> = Vec::with_capacity(ideals.len());
    let mut fractions: Vec<(usize, Decimal)> = Vec::with_capacity(ideals.len());

    for (i, share) in ideals.iter().enumerate() {
        if share.is_sign_negative() && !share.is_zero() {
            return Err(CapStackError::InvalidInput {
                field: format!("ideals[{i}]"),
                reason: "ideal shares cannot be negative".into(),
            });
        }
        let floor = share.floor();
        let cents = floor.to_i64().ok_or_else(|| CapStackError::InvalidInput {
            field: format!("ideals[{i}]"),
            reason: "ideal share out of representable range".into(),
        })?;
        floors.push(cents);
        fractions.push((i, share - floor));
    }

    let allocated: Cents = floors.iter().sum();
    let leftover = total - allocated;
    if leftover < 0 || leftover > ideals.len() as i64 {
        error!(
            total,
            allocated, leftover, "rounding invariant violation: floors inconsistent with target"
        );
        return Err(CapStackError::RoundingInvariantViolation { target: total, allocated });
    }

    // Largest fractional remainder first; equal remainders go to the earliest
    // recipient.
    fractions.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for &(idx, _) in fractions.iter().take(leftover as usize) {
        floors[idx] += 1;
    }

    let check: Cents = floors.iter().sum();
    if check != total {
        error!(
            total,
            allocated = check,
            "rounding invariant violation: resolved shares do not sum to target"
        );
        return Err(CapStackError::RoundingInvariantViolation {
            target: total,
            allocated: check,
        });
    }

    Ok(floors)
}

/// Allocate `total` across recipients pro-rata to `weights`, exactly.
///
/// Computes ideal shares total × wᵢ / Σw and resolves them with
/// `resolve_exact`. Weights of zero receive zero. When the weights are
/// themselves integer-cent caps (tier rooms, unreturned balances) and
/// total ≤ Σweights, no resolved share ever exceeds its weight.
pub fn allocate_proportional(total: Cents, weights: &[Decimal]) -> CapStackResult<Vec<Cents>> {
    if total == 0 {
        return Ok(vec![0; weights.len()]);
    }
    if total < 0 {
        return Err(CapStackError::InvalidInput {
            field: "total".into(),
            reason: "cannot allocate a negative total".into(),
        });
    }

    let mut weight_sum = Decimal::ZERO;
    for (i, w) in weights.iter().enumerate() {
        if w.is_sign_negative() && !w.is_zero() {
            return Err(CapStackError::InvalidInput {
                field: format!("weights[{i}]"),
                reason: "weights cannot be negative".into(),
            });
        }
        weight_sum += w;
    }
    if weight_sum.is_zero() {
        return Err(CapStackError::InvalidInput {
            field: "weights".into(),
            reason: "cannot allocate against all-zero weights".into(),
        });
    }

    let total_dec = Decimal::from(total);
    let ideals: Vec<Decimal> = weights.iter().map(|w| total_dec * w / weight_sum).collect();
    resolve_exact(total, &ideals)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exact_split_no_remainder() {
        // $100.00 across 50/50 leaves nothing to distribute
        let shares = resolve_exact(10_000, &[dec!(5000), dec!(5000)]).unwrap();
        assert_eq!(shares, vec![5_000, 5_000]);
    }

    #[test]
    fn test_three_way_split_of_hundred_dollars() {
        // $100.00 / 3 = 3333.33... cents each; the single leftover cent goes
        // to the first recipient (lowest id on a fraction tie)
        let ideal = Decimal::from(10_000) / dec!(3);
        let shares = resolve_exact(10_000, &[ideal, ideal, ideal]).unwrap();
        assert_eq!(shares, vec![3_334, 3_333, 3_333]);
        assert_eq!(shares.iter().sum::<Cents>(), 10_000);
    }

    #[test]
    fn test_largest_remainder_wins() {
        // Fractions 0.9 and 0.1: the 0.9 position takes the leftover cent
        let shares = resolve_exact(100, &[dec!(29.9), dec!(70.1)]).unwrap();
        assert_eq!(shares, vec![30, 70]);
    }

    #[test]
    fn test_tie_break_is_lowest_position() {
        // Equal fractions: earliest position (lowest investor id) first
        let shares = resolve_exact(101, &[dec!(50.5), dec!(50.5)]).unwrap();
        assert_eq!(shares, vec![51, 50]);
    }

    #[test]
    fn test_idempotent_under_reinvocation() {
        let ideals = vec![dec!(123.45), dec!(676.55), dec!(200.00)];
        let first = resolve_exact(1_000, &ideals).unwrap();
        for _ in 0..10 {
            assert_eq!(resolve_exact(1_000, &ideals).unwrap(), first);
        }
    }

    #[test]
    fn test_zero_total_zero_shares() {
        assert_eq!(resolve_exact(0, &[]).unwrap(), Vec::<Cents>::new());
        assert_eq!(allocate_proportional(0, &[dec!(1), dec!(2)]).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_negative_ideal_rejected() {
        let result = resolve_exact(100, &[dec!(-10), dec!(110)]);
        assert!(matches!(result, Err(CapStackError::InvalidInput { .. })));
    }

    #[test]
    fn test_inconsistent_ideals_violate_invariant() {
        // Ideals sum to 200 against a target of 100: floors overshoot
        let result = resolve_exact(100, &[dec!(150), dec!(50)]);
        assert!(matches!(
            result,
            Err(CapStackError::RoundingInvariantViolation { target: 100, allocated: 200 })
        ));

        // Ideals sum far below the target: more than one cent per recipient
        let result = resolve_exact(100, &[dec!(10), dec!(10)]);
        assert!(matches!(
            result,
            Err(CapStackError::RoundingInvariantViolation { .. })
        ));
    }

    #[test]
    fn test_proportional_by_commitment_weights() {
        // 28% / 72% of $1,250,000.00
        let shares =
            allocate_proportional(125_000_000, &[dec!(700000), dec!(1800000)]).unwrap();
        assert_eq!(shares, vec![35_000_000, 90_000_000]);
    }

    #[test]
    fn test_proportional_zero_weight_gets_nothing() {
        let shares = allocate_proportional(999, &[dec!(0), dec!(1), dec!(1)]).unwrap();
        assert_eq!(shares[0], 0);
        assert_eq!(shares.iter().sum::<Cents>(), 999);
    }

    #[test]
    fn test_proportional_all_zero_weights_rejected() {
        let result = allocate_proportional(100, &[dec!(0), dec!(0)]);
        assert!(matches!(result, Err(CapStackError::InvalidInput { .. })));
    }

    #[test]
    fn test_capped_weights_never_exceeded() {
        // Weights are integer-cent caps; a partial allocation must not push
        // any share above its cap
        let caps = [dec!(333), dec!(333), dec!(334)];
        for total in [1, 100, 500, 999, 1_000] {
            let shares = allocate_proportional(total, &caps).unwrap();
            for (share, cap) in shares.iter().zip(caps.iter()) {
                assert!(Decimal::from(*share) <= *cap, "share {share} exceeds cap {cap}");
            }
            assert_eq!(shares.iter().sum::<Cents>(), total);
        }
    }

    proptest! {
        #[test]
        fn prop_proportional_conserves_every_cent(
            total in 0i64..10_000_000,
            weights in proptest::collection::vec(0u32..1_000_000, 1..12),
        ) {
            prop_assume!(weights.iter().any(|w| *w > 0));
            let weights: Vec<Decimal> = weights.into_iter().map(Decimal::from).collect();
            let shares = allocate_proportional(total, &weights).unwrap();
            prop_assert_eq!(shares.iter().sum::<Cents>(), total);
            prop_assert!(shares.iter().all(|s| *s >= 0));
        }

        #[test]
        fn prop_resolution_is_deterministic(
            total in 0i64..1_000_000,
            weights in proptest::collection::vec(1u32..100_000, 1..8),
        ) {
            let weights: Vec<Decimal> = weights.into_iter().map(Decimal::from).collect();
            let first = allocate_proportional(total, &weights).unwrap();
            let second = allocate_proportional(total, &weights).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
