use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::error::CapStackError;
use crate::ledger::EntryKind;
use crate::rounding;
use crate::types::*;
use crate::CapStackResult;

// ---------------------------------------------------------------------------
// Tier model
// ---------------------------------------------------------------------------

/// One rung of the distribution waterfall. Rank orders execution; the kind
/// carries the split rule as data so tier logic never lives in scattered
/// arithmetic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterfallTier {
    pub rank: u32,
    pub kind: TierKind,
}

/// Distribution mechanics for a waterfall tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TierKind {
    /// Return contributed capital, pro-rata to unreturned balances
    ReturnOfCapital,
    /// Pay accrued-but-unpaid preferred return, pro-rata to accrued amounts
    PreferredReturn,
    /// 100% to Sponsors until cumulative promote equals `promote_pct` of
    /// profit distributed so far; room is solved in closed form
    SponsorCatchup { promote_pct: Rate },
    /// Split whatever remains: `sponsor_pct` to Sponsors, the rest to LPs,
    /// each side pro-rata by commitment weight
    ResidualSplit { sponsor_pct: Rate },
}

impl TierKind {
    pub fn label(&self) -> &'static str {
        match self {
            TierKind::ReturnOfCapital => "Return of Capital",
            TierKind::PreferredReturn => "Preferred Return",
            TierKind::SponsorCatchup { .. } => "Sponsor Catch-Up",
            TierKind::ResidualSplit { .. } => "Residual Split",
        }
    }

    /// Ledger entry kind for an allocation out of this tier.
    pub fn entry_kind(&self, class: InvestorClass) -> EntryKind {
        match self {
            TierKind::ReturnOfCapital => EntryKind::CapitalReturn,
            TierKind::PreferredReturn => EntryKind::PreferredReturn,
            TierKind::SponsorCatchup { .. } => EntryKind::Promote,
            TierKind::ResidualSplit { .. } => match class {
                InvestorClass::Sponsor => EntryKind::Promote,
                InvestorClass::Lp => EntryKind::ResidualProfit,
            },
        }
    }
}

/// Validate a tier schedule: non-empty, strictly increasing ranks, split
/// percentages inside [0, 1].
pub fn validate_tiers(tiers: &[WaterfallTier]) -> CapStackResult<()> {
    if tiers.is_empty() {
        return Err(CapStackError::InvalidInput {
            field: "tiers".into(),
            reason: "at least one waterfall tier is required".into(),
        });
    }
    let mut last_rank: Option<u32> = None;
    for tier in tiers {
        if let Some(prev) = last_rank {
            if tier.rank <= prev {
                return Err(CapStackError::InvalidInput {
                    field: "tiers".into(),
                    reason: format!("tier ranks must strictly increase: {} after {prev}", tier.rank),
                });
            }
        }
        last_rank = Some(tier.rank);

        let pct = match tier.kind {
            TierKind::SponsorCatchup { promote_pct } => Some(promote_pct),
            TierKind::ResidualSplit { sponsor_pct } => Some(sponsor_pct),
            _ => None,
        };
        if let Some(pct) = pct {
            if pct < Decimal::ZERO || pct > Decimal::ONE {
                return Err(CapStackError::InvalidInput {
                    field: "tiers".into(),
                    reason: format!("tier {} split must be between 0 and 1", tier.rank),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Input / output types
// ---------------------------------------------------------------------------

/// Per-investor snapshot the waterfall reads. Derived by folding ledger
/// history and running the accrual function; the calculator itself never
/// touches stored state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestorPosition {
    pub investor_id: InvestorId,
    pub class: InvestorClass,
    /// Commitment weight used for residual splits
    pub committed: Cents,
    pub unreturned_capital: Cents,
    pub accrued_preferred_unpaid: Cents,
    pub preferred_paid_to_date: Cents,
    pub promote_received_to_date: Cents,
}

/// Input for a waterfall distribution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionInput {
    /// Cash pool to distribute, in cents
    pub total_amount: Cents,
    /// Ordered tier schedule
    pub tiers: Vec<WaterfallTier>,
    pub positions: Vec<InvestorPosition>,
}

/// One investor's share of one tier (or of the whole distribution).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierAllocation {
    pub investor_id: InvestorId,
    pub amount: Cents,
}

/// Result for a single tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierBreakdown {
    pub rank: u32,
    pub kind: TierKind,
    pub name: String,
    /// The tier's bounded capacity at the moment it ran. The residual tier
    /// reports the pool remaining when it started.
    pub room: Cents,
    /// Amount the tier actually consumed
    pub amount: Cents,
    /// Non-zero allocations, sorted by investor id
    pub allocations: Vec<TierAllocation>,
    /// Pool left after this tier
    pub remaining: Cents,
}

/// Full distribution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionOutput {
    pub tiers: Vec<TierBreakdown>,
    /// Per-investor totals across all tiers, sorted by investor id
    pub by_investor: Vec<TierAllocation>,
    pub total_distributed: Cents,
    /// Pool left over when no tier could consume it (only possible without a
    /// ResidualSplit tier)
    pub undistributed: Cents,
}

// ---------------------------------------------------------------------------
// Calculation
// ---------------------------------------------------------------------------

/// Run a cash pool through the ordered waterfall tiers.
///
/// Tiers execute strictly in rank order. Each consumes
/// min(remaining pool, room) and allocates it with the largest-remainder
/// resolver; whatever is left rolls into the next tier. A pool exhausted
/// before later tiers is not an error: those tiers record zero.
pub fn run_waterfall(
    input: &DistributionInput,
) -> CapStackResult<ComputationOutput<DistributionOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    if input.total_amount <= 0 {
        return Err(CapStackError::NegativeOrZeroAmount {
            context: "distribution pool".into(),
            amount: input.total_amount,
        });
    }
    validate_tiers(&input.tiers)?;
    if input.positions.is_empty() {
        return Err(CapStackError::InvalidInput {
            field: "positions".into(),
            reason: "at least one investor position is required".into(),
        });
    }
    for position in &input.positions {
        if position.unreturned_capital < 0
            || position.accrued_preferred_unpaid < 0
            || position.committed < 0
        {
            return Err(CapStackError::InvalidInput {
                field: "positions".into(),
                reason: format!("negative balance for investor {}", position.investor_id),
            });
        }
    }
    if !input
        .tiers
        .iter()
        .any(|t| matches!(t.kind, TierKind::ResidualSplit { .. }))
    {
        warnings.push("no residual tier: pool beyond tier rooms stays undistributed".to_string());
    }

    // Resolver tie-breaks go to the earliest position, so order by id.
    let mut positions: Vec<&InvestorPosition> = input.positions.iter().collect();
    positions.sort_by_key(|p| p.investor_id);

    let mut remaining = input.total_amount;
    let mut tier_results: Vec<TierBreakdown> = Vec::new();

    // Profit distributed in this run, feeding the catch-up target
    let mut preferred_this_run: Cents = 0;
    let mut promote_this_run: Cents = 0;

    for tier in &input.tiers {
        let (room, amounts) = match tier.kind {
            TierKind::ReturnOfCapital => {
                let weights: Vec<Decimal> = positions
                    .iter()
                    .map(|p| Decimal::from(p.unreturned_capital))
                    .collect();
                let room: Cents = positions.iter().map(|p| p.unreturned_capital).sum();
                let sub = remaining.min(room);
                (room, allocate_or_zero(sub, &weights)?)
            }
            TierKind::PreferredReturn => {
                let weights: Vec<Decimal> = positions
                    .iter()
                    .map(|p| Decimal::from(p.accrued_preferred_unpaid))
                    .collect();
                let room: Cents = positions.iter().map(|p| p.accrued_preferred_unpaid).sum();
                let sub = remaining.min(room);
                let amounts = allocate_or_zero(sub, &weights)?;
                preferred_this_run += sub;
                (room, amounts)
            }
            TierKind::SponsorCatchup { promote_pct } => {
                let room = catchup_room(
                    &positions,
                    promote_pct,
                    preferred_this_run,
                    promote_this_run,
                    remaining,
                )?;
                let sub = remaining.min(room);
                let weights: Vec<Decimal> = positions
                    .iter()
                    .map(|p| match p.class {
                        InvestorClass::Sponsor => Decimal::from(p.committed),
                        InvestorClass::Lp => Decimal::ZERO,
                    })
                    .collect();
                let amounts = allocate_or_zero(sub, &weights)?;
                promote_this_run += amounts.iter().sum::<Cents>();
                (room, amounts)
            }
            TierKind::ResidualSplit { sponsor_pct } => {
                let room = remaining;
                let weights = residual_weights(&positions, sponsor_pct, &mut warnings);
                let amounts = allocate_or_zero(remaining, &weights)?;
                let sponsor_share: Cents = positions
                    .iter()
                    .zip(&amounts)
                    .filter(|(p, _)| p.class == InvestorClass::Sponsor)
                    .map(|(_, a)| *a)
                    .sum();
                promote_this_run += sponsor_share;
                (room, amounts)
            }
        };

        let consumed: Cents = amounts.iter().sum();
        remaining -= consumed;

        let allocations: Vec<TierAllocation> = positions
            .iter()
            .zip(&amounts)
            .filter(|(_, amount)| **amount > 0)
            .map(|(p, amount)| TierAllocation {
                investor_id: p.investor_id,
                amount: *amount,
            })
            .collect();

        tier_results.push(TierBreakdown {
            rank: tier.rank,
            kind: tier.kind,
            name: tier.kind.label().to_string(),
            room,
            amount: consumed,
            allocations,
            remaining,
        });
    }

    if remaining > 0 {
        warnings.push(format!("{remaining} cents undistributed after the final tier"));
    }

    let mut by_investor: BTreeMap<InvestorId, Cents> = BTreeMap::new();
    for tier in &tier_results {
        for allocation in &tier.allocations {
            *by_investor.entry(allocation.investor_id).or_insert(0) += allocation.amount;
        }
    }
    let by_investor: Vec<TierAllocation> = by_investor
        .into_iter()
        .map(|(investor_id, amount)| TierAllocation { investor_id, amount })
        .collect();

    let total_distributed: Cents = tier_results.iter().map(|t| t.amount).sum();
    let investor_total: Cents = by_investor.iter().map(|a| a.amount).sum();
    if total_distributed + remaining != input.total_amount || investor_total != total_distributed {
        tracing::error!(
            pool = input.total_amount,
            total_distributed,
            investor_total,
            remaining,
            "rounding invariant violation: waterfall does not conserve the pool"
        );
        return Err(CapStackError::RoundingInvariantViolation {
            target: input.total_amount,
            allocated: total_distributed + remaining,
        });
    }

    let output = DistributionOutput {
        tiers: tier_results,
        by_investor,
        total_distributed,
        undistributed: remaining,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Tiered Distribution Waterfall (largest remainder)",
        &serde_json::json!({
            "total_amount": input.total_amount,
            "num_tiers": input.tiers.len(),
            "num_investors": input.positions.len(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// Allocate a tier sub-amount, tolerating an all-zero weight vector (a tier
/// with no room allocates nothing).
fn allocate_or_zero(sub: Cents, weights: &[Decimal]) -> CapStackResult<Vec<Cents>> {
    if sub == 0 || weights.iter().all(|w| w.is_zero()) {
        return Ok(vec![0; weights.len()]);
    }
    rounding::allocate_proportional(sub, weights)
}

/// Closed-form catch-up room.
///
/// With promote share p, cumulative preferred paid P (history plus this
/// run's preferred tier) and sponsor promote already received S, the tier
/// must top the sponsor up to p of profit distributed:
///     S + c = p · (P + S + c)   =>   c = p/(1-p) · P - S
/// floored at zero and to whole cents. p = 1 degenerates to "take the rest".
fn catchup_room(
    positions: &[&InvestorPosition],
    promote_pct: Rate,
    preferred_this_run: Cents,
    promote_this_run: Cents,
    remaining: Cents,
) -> CapStackResult<Cents> {
    if promote_pct >= Decimal::ONE {
        return Ok(remaining);
    }

    let preferred_paid: Cents = positions
        .iter()
        .map(|p| p.preferred_paid_to_date)
        .sum::<Cents>()
        + preferred_this_run;
    let promote_received: Cents = positions
        .iter()
        .map(|p| p.promote_received_to_date)
        .sum::<Cents>()
        + promote_this_run;

    let target = promote_pct / (Decimal::ONE - promote_pct) * Decimal::from(preferred_paid)
        - Decimal::from(promote_received);
    if target <= Decimal::ZERO {
        return Ok(0);
    }
    target
        .floor()
        .to_i64()
        .ok_or_else(|| CapStackError::InvalidInput {
            field: "positions".into(),
            reason: "catch-up target out of representable range".into(),
        })
}

/// Weights for the residual tier: `sponsor_pct` spread across Sponsors by
/// commitment, the rest across LPs by commitment. If one side has no
/// participants its share folds into the other with a warning.
fn residual_weights(
    positions: &[&InvestorPosition],
    sponsor_pct: Rate,
    warnings: &mut Vec<String>,
) -> Vec<Decimal> {
    let sponsor_committed: Cents = positions
        .iter()
        .filter(|p| p.class == InvestorClass::Sponsor)
        .map(|p| p.committed)
        .sum();
    let lp_committed: Cents = positions
        .iter()
        .filter(|p| p.class == InvestorClass::Lp)
        .map(|p| p.committed)
        .sum();

    let (sponsor_side, lp_side) = if sponsor_committed == 0 && lp_committed == 0 {
        (Decimal::ZERO, Decimal::ZERO)
    } else if sponsor_committed == 0 {
        if !sponsor_pct.is_zero() {
            warnings.push("no sponsor positions: residual sponsor share folded into LPs".into());
        }
        (Decimal::ZERO, Decimal::ONE)
    } else if lp_committed == 0 {
        if sponsor_pct < Decimal::ONE {
            warnings.push("no LP positions: residual LP share folded into sponsors".into());
        }
        (Decimal::ONE, Decimal::ZERO)
    } else {
        (sponsor_pct, Decimal::ONE - sponsor_pct)
    };

    positions
        .iter()
        .map(|p| match p.class {
            InvestorClass::Sponsor if sponsor_committed > 0 => {
                sponsor_side * Decimal::from(p.committed) / Decimal::from(sponsor_committed)
            }
            InvestorClass::Lp if lp_committed > 0 => {
                lp_side * Decimal::from(p.committed) / Decimal::from(lp_committed)
            }
            _ => Decimal::ZERO,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    /// Standard four-tier schedule: capital, pref, full catch-up to 20%,
    /// 20/80 residual.
    fn standard_tiers() -> Vec<WaterfallTier> {
        vec![
            WaterfallTier { rank: 1, kind: TierKind::ReturnOfCapital },
            WaterfallTier { rank: 2, kind: TierKind::PreferredReturn },
            WaterfallTier {
                rank: 3,
                kind: TierKind::SponsorCatchup { promote_pct: dec!(0.20) },
            },
            WaterfallTier {
                rank: 4,
                kind: TierKind::ResidualSplit { sponsor_pct: dec!(0.20) },
            },
        ]
    }

    fn position(
        id: u32,
        class: InvestorClass,
        committed: Cents,
        unreturned: Cents,
        accrued_unpaid: Cents,
    ) -> InvestorPosition {
        InvestorPosition {
            investor_id: InvestorId(id),
            class,
            committed,
            unreturned_capital: unreturned,
            accrued_preferred_unpaid: accrued_unpaid,
            preferred_paid_to_date: 0,
            promote_received_to_date: 0,
        }
    }

    /// Sponsor $700k / LP $1.8m, fully contributed, nothing yet returned.
    fn standard_positions(accrued_sponsor: Cents, accrued_lp: Cents) -> Vec<InvestorPosition> {
        vec![
            position(1, InvestorClass::Sponsor, 70_000_000, 70_000_000, accrued_sponsor),
            position(2, InvestorClass::Lp, 180_000_000, 180_000_000, accrued_lp),
        ]
    }

    #[test]
    fn test_small_pool_all_goes_to_tier_one() {
        // $50,000 against $2.5m of unreturned capital: 100% tier 1, pro-rata
        let input = DistributionInput {
            total_amount: 5_000_000,
            tiers: standard_tiers(),
            positions: standard_positions(0, 0),
        };
        let out = run_waterfall(&input).unwrap().result;

        assert_eq!(out.tiers[0].amount, 5_000_000);
        assert_eq!(out.tiers[0].room, 250_000_000);
        // 28% / 72%
        assert_eq!(out.tiers[0].allocations[0].amount, 1_400_000);
        assert_eq!(out.tiers[0].allocations[1].amount, 3_600_000);

        for tier in &out.tiers[1..] {
            assert_eq!(tier.amount, 0, "tier {} should be starved", tier.rank);
        }
        assert_eq!(out.total_distributed, 5_000_000);
        assert_eq!(out.undistributed, 0);
    }

    #[test]
    fn test_tiers_consume_in_strict_rank_order() {
        // Pool covers capital plus part of the preferred
        let input = DistributionInput {
            total_amount: 255_000_000,
            tiers: standard_tiers(),
            positions: standard_positions(4_000_000, 10_000_000),
        };
        let out = run_waterfall(&input).unwrap().result;

        // Tier 1 exhausts its full room first
        assert_eq!(out.tiers[0].amount, 250_000_000);
        assert_eq!(out.tiers[0].remaining, 5_000_000);
        // Tier 2 takes what is left, below its $140k room
        assert_eq!(out.tiers[1].room, 14_000_000);
        assert_eq!(out.tiers[1].amount, 5_000_000);
        // Starved tiers
        assert_eq!(out.tiers[2].amount, 0);
        assert_eq!(out.tiers[3].amount, 0);
        assert_eq!(out.undistributed, 0);
    }

    #[test]
    fn test_preferred_pro_rata_to_accrual() {
        let mut positions = standard_positions(4_000_000, 10_000_000);
        positions[0].unreturned_capital = 0;
        positions[1].unreturned_capital = 0;
        let input = DistributionInput {
            total_amount: 7_000_000,
            tiers: standard_tiers(),
            positions,
        };
        let out = run_waterfall(&input).unwrap().result;

        assert_eq!(out.tiers[0].amount, 0);
        // $70k against $140k accrued: half of each claim
        assert_eq!(out.tiers[1].amount, 7_000_000);
        assert_eq!(out.tiers[1].allocations[0].amount, 2_000_000);
        assert_eq!(out.tiers[1].allocations[1].amount, 5_000_000);
    }

    #[test]
    fn test_catchup_closed_form_reaches_promote_share() {
        // Capital fully returned already; pool covers pref and beyond.
        // Preferred paid this run: $140,000. With p = 0.20 the catch-up
        // room is 0.25 × 140,000 = $35,000, all to the sponsor.
        let mut positions = standard_positions(4_000_000, 10_000_000);
        positions[0].unreturned_capital = 0;
        positions[1].unreturned_capital = 0;
        let input = DistributionInput {
            total_amount: 20_000_000,
            tiers: standard_tiers(),
            positions,
        };
        let out = run_waterfall(&input).unwrap().result;

        assert_eq!(out.tiers[1].amount, 14_000_000);
        assert_eq!(out.tiers[2].amount, 3_500_000);
        assert_eq!(out.tiers[2].allocations.len(), 1);
        assert_eq!(out.tiers[2].allocations[0].investor_id, InvestorId(1));

        // After the catch-up: promote = 3.5m, profit = 14m + 3.5m = 17.5m,
        // and 3.5 / 17.5 = 0.20 exactly
        let profit = out.tiers[1].amount + out.tiers[2].amount;
        assert_eq!(out.tiers[2].amount * 5, profit);

        // Residual 20/80 on the remaining $25,000
        assert_eq!(out.tiers[3].amount, 2_500_000);
        assert_eq!(out.tiers[3].allocations[0].amount, 500_000);
        assert_eq!(out.tiers[3].allocations[1].amount, 2_000_000);

        assert_eq!(out.total_distributed, 20_000_000);
    }

    #[test]
    fn test_catchup_counts_prior_history() {
        // Preferred fully paid in an earlier distribution; sponsor already
        // holds some promote. Room = 0.25 × P - S.
        let mut positions = standard_positions(0, 0);
        positions[0].unreturned_capital = 0;
        positions[1].unreturned_capital = 0;
        positions[0].preferred_paid_to_date = 4_000_000;
        positions[1].preferred_paid_to_date = 10_000_000;
        positions[0].promote_received_to_date = 1_000_000;

        let input = DistributionInput {
            total_amount: 10_000_000,
            tiers: standard_tiers(),
            positions,
        };
        let out = run_waterfall(&input).unwrap().result;

        // 0.25 × 14m - 1m = 2.5m
        assert_eq!(out.tiers[2].amount, 2_500_000);
        // Remaining 7.5m flows through the residual split
        assert_eq!(out.tiers[3].amount, 7_500_000);
        assert_eq!(out.total_distributed, 10_000_000);
    }

    #[test]
    fn test_catchup_already_satisfied_is_zero() {
        let mut positions = standard_positions(0, 0);
        positions[0].unreturned_capital = 0;
        positions[1].unreturned_capital = 0;
        positions[1].preferred_paid_to_date = 8_000_000;
        positions[0].promote_received_to_date = 5_000_000; // above target

        let input = DistributionInput {
            total_amount: 1_000_000,
            tiers: standard_tiers(),
            positions,
        };
        let out = run_waterfall(&input).unwrap().result;
        assert_eq!(out.tiers[2].amount, 0);
        assert_eq!(out.tiers[3].amount, 1_000_000);
    }

    #[test]
    fn test_residual_split_conserves_in_one_pass() {
        // Odd pool through 20/80 with multiple LPs of unequal weight
        let positions = vec![
            position(1, InvestorClass::Sponsor, 70_000_000, 0, 0),
            position(2, InvestorClass::Lp, 100_000_000, 0, 0),
            position(3, InvestorClass::Lp, 50_000_000, 0, 0),
            position(4, InvestorClass::Lp, 30_000_000, 0, 0),
        ];
        let input = DistributionInput {
            total_amount: 1_000_001,
            tiers: vec![WaterfallTier {
                rank: 1,
                kind: TierKind::ResidualSplit { sponsor_pct: dec!(0.20) },
            }],
            positions,
        };
        let out = run_waterfall(&input).unwrap().result;

        let sum: Cents = out.tiers[0].allocations.iter().map(|a| a.amount).sum();
        assert_eq!(sum, 1_000_001);
        assert_eq!(out.tiers[0].allocations[0].amount, 200_000); // 20% to sponsor
        assert_eq!(out.undistributed, 0);
    }

    #[test]
    fn test_no_residual_tier_leaves_pool_undistributed() {
        let input = DistributionInput {
            total_amount: 10_000_000,
            tiers: vec![WaterfallTier { rank: 1, kind: TierKind::ReturnOfCapital }],
            positions: standard_positions(0, 0)
                .into_iter()
                .map(|mut p| {
                    p.unreturned_capital = 1_000_000;
                    p
                })
                .collect(),
        };
        let result = run_waterfall(&input).unwrap();
        let out = &result.result;

        assert_eq!(out.tiers[0].amount, 2_000_000);
        assert_eq!(out.total_distributed, 2_000_000);
        assert_eq!(out.undistributed, 8_000_000);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("undistributed")));
    }

    #[test]
    fn test_by_investor_totals_match_tier_totals() {
        let input = DistributionInput {
            total_amount: 300_000_001,
            tiers: standard_tiers(),
            positions: standard_positions(4_000_000, 10_000_000),
        };
        let out = run_waterfall(&input).unwrap().result;

        let tier_sum: Cents = out.tiers.iter().map(|t| t.amount).sum();
        let investor_sum: Cents = out.by_investor.iter().map(|a| a.amount).sum();
        assert_eq!(tier_sum, 300_000_001);
        assert_eq!(investor_sum, 300_000_001);
        assert_eq!(out.undistributed, 0);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let positions = standard_positions(0, 0);

        let input = DistributionInput {
            total_amount: 0,
            tiers: standard_tiers(),
            positions: positions.clone(),
        };
        assert!(matches!(
            run_waterfall(&input),
            Err(CapStackError::NegativeOrZeroAmount { .. })
        ));

        let input = DistributionInput {
            total_amount: 100,
            tiers: vec![],
            positions: positions.clone(),
        };
        assert!(matches!(run_waterfall(&input), Err(CapStackError::InvalidInput { .. })));

        // Non-increasing ranks
        let input = DistributionInput {
            total_amount: 100,
            tiers: vec![
                WaterfallTier { rank: 2, kind: TierKind::ReturnOfCapital },
                WaterfallTier { rank: 2, kind: TierKind::PreferredReturn },
            ],
            positions,
        };
        assert!(matches!(run_waterfall(&input), Err(CapStackError::InvalidInput { .. })));
    }

    #[test]
    fn test_run_is_deterministic() {
        let input = DistributionInput {
            total_amount: 123_456_789,
            tiers: standard_tiers(),
            positions: standard_positions(3_333_333, 7_777_777),
        };
        let first = run_waterfall(&input).unwrap().result;
        let second = run_waterfall(&input).unwrap().result;
        assert_eq!(first.by_investor, second.by_investor);
        assert_eq!(first.total_distributed, second.total_distributed);
    }
}
