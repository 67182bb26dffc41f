use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::CapStackError;
use crate::ledger::LoanPosition;
use crate::rounding;
use crate::types::*;
use crate::CapStackResult;

// ---------------------------------------------------------------------------
// The draw entity
// ---------------------------------------------------------------------------

/// Construction draw lifecycle. Draft and Submitted draws carry no ledger
/// effect; only the Approved to Funded transition moves money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawStatus {
    Draft,
    Submitted,
    Approved,
    Funded,
    Rejected,
}

impl std::fmt::Display for DrawStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DrawStatus::Draft => "Draft",
            DrawStatus::Submitted => "Submitted",
            DrawStatus::Approved => "Approved",
            DrawStatus::Funded => "Funded",
            DrawStatus::Rejected => "Rejected",
        };
        f.write_str(s)
    }
}

/// A construction draw request with its retainage split locked in at
/// creation. retained + net_funded reconstructs the request exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draw {
    pub id: DrawId,
    pub loan_id: LoanId,
    /// Billing period label, e.g. "2024-07"
    pub period: String,
    pub requested: Cents,
    pub retainage_pct: Rate,
    pub retained: Cents,
    pub net_funded: Cents,
    pub status: DrawStatus,
}

impl Draw {
    pub fn new(
        id: DrawId,
        loan_id: LoanId,
        period: &str,
        requested: Cents,
        retainage_pct: Rate,
    ) -> CapStackResult<Self> {
        let (retained, net_funded) = split_retainage(requested, retainage_pct)?;
        Ok(Self {
            id,
            loan_id,
            period: period.to_string(),
            requested,
            retainage_pct,
            retained,
            net_funded,
            status: DrawStatus::Draft,
        })
    }

    pub fn submit(&mut self) -> CapStackResult<()> {
        self.transition(DrawStatus::Draft, DrawStatus::Submitted)
    }

    pub fn approve(&mut self) -> CapStackResult<()> {
        self.transition(DrawStatus::Submitted, DrawStatus::Approved)
    }

    pub fn reject(&mut self) -> CapStackResult<()> {
        self.transition(DrawStatus::Submitted, DrawStatus::Rejected)
    }

    /// Approved to Funded. The engine runs `check_ceiling` first so a
    /// ceiling violation leaves the draw Approved.
    pub fn mark_funded(&mut self) -> CapStackResult<()> {
        self.transition(DrawStatus::Approved, DrawStatus::Funded)
    }

    fn transition(&mut self, from: DrawStatus, to: DrawStatus) -> CapStackResult<()> {
        if self.status != from {
            return Err(CapStackError::InvalidTransition {
                entity: format!("draw {}", self.id),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Retainage split and ceiling check
// ---------------------------------------------------------------------------

/// Split a requested draw into (retained, net_funded).
///
/// retained = requested × retainage_pct, resolved to whole cents by the
/// largest-remainder rule over the two shares so that
/// retained + net_funded = requested, always.
pub fn split_retainage(requested: Cents, retainage_pct: Rate) -> CapStackResult<(Cents, Cents)> {
    if requested <= 0 {
        return Err(CapStackError::NegativeOrZeroAmount {
            context: "draw request".into(),
            amount: requested,
        });
    }
    if retainage_pct < Decimal::ZERO || retainage_pct > Decimal::ONE {
        return Err(CapStackError::InvalidInput {
            field: "retainage_pct".into(),
            reason: "retainage percentage must be between 0 and 1".into(),
        });
    }

    let requested_dec = Decimal::from(requested);
    let ideal_retained = requested_dec * retainage_pct;
    let shares = rounding::resolve_exact(requested, &[ideal_retained, requested_dec - ideal_retained])?;
    Ok((shares[0], shares[1]))
}

/// The ceiling invariant enforced before any Funded transition: capacity
/// already committed (net funded plus all retainage withheld) plus the new
/// request must fit under the loan ceiling.
pub fn check_ceiling(draw: &Draw, position: &LoanPosition, ceiling: Cents) -> CapStackResult<()> {
    let would_be = position.committed() + draw.requested;
    if would_be > ceiling {
        return Err(CapStackError::LoanCeilingExceeded {
            draw_id: draw.id,
            requested: draw.requested,
            would_be,
            ceiling,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Standalone planner
// ---------------------------------------------------------------------------

/// Input for the standalone draw planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawPlanInput {
    pub requested_amount: Cents,
    pub retainage_pct: Rate,
    /// Net proceeds already advanced on the loan
    pub prior_net_funded: Cents,
    /// Retainage already withheld on the loan (whether or not released)
    pub prior_retainage_held: Cents,
    pub loan_ceiling: Cents,
}

/// Planner result: the split plus the post-draw loan position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawPlanOutput {
    pub retained: Cents,
    pub net_funded: Cents,
    /// Capacity consumed once this draw funds
    pub cumulative_committed: Cents,
    /// Ceiling headroom left after this draw
    pub remaining_headroom: Cents,
}

/// Compute a draw's retainage split and check loan headroom without touching
/// any ledger. This is the calculation behind `fund_draw`, exposed for
/// callers that only need the numbers.
pub fn plan_draw(input: &DrawPlanInput) -> CapStackResult<ComputationOutput<DrawPlanOutput>> {
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();

    if input.prior_net_funded < 0 || input.prior_retainage_held < 0 {
        return Err(CapStackError::InvalidInput {
            field: "prior_net_funded".into(),
            reason: "prior loan balances cannot be negative".into(),
        });
    }
    if input.loan_ceiling <= 0 {
        return Err(CapStackError::NegativeOrZeroAmount {
            context: "loan ceiling".into(),
            amount: input.loan_ceiling,
        });
    }

    let (retained, net_funded) = split_retainage(input.requested_amount, input.retainage_pct)?;

    let prior_committed = input.prior_net_funded + input.prior_retainage_held;
    let cumulative_committed = prior_committed + input.requested_amount;
    if cumulative_committed > input.loan_ceiling {
        return Err(CapStackError::LoanCeilingExceeded {
            draw_id: DrawId(0),
            requested: input.requested_amount,
            would_be: cumulative_committed,
            ceiling: input.loan_ceiling,
        });
    }

    let output = DrawPlanOutput {
        retained,
        net_funded,
        cumulative_committed,
        remaining_headroom: input.loan_ceiling - cumulative_committed,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Draw Retainage Split and Ceiling Check",
        &serde_json::json!({
            "requested_amount": input.requested_amount,
            "retainage_pct": input.retainage_pct.to_string(),
            "loan_ceiling": input.loan_ceiling,
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
