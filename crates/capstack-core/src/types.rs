use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// All monetary values, in integer cents. Fractional arithmetic (rates,
/// pro-rata weights, accrual) happens in `Decimal` and is resolved back to
/// whole cents by the rounding resolver, so sums reconcile exactly.
pub type Cents = i64;

/// Rates expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = Decimal;

/// Annual rates quoted in basis points (850 = 8.50%).
pub type BasisPoints = u32;

/// Convert a basis-point quote into a decimal rate.
pub fn bps_to_rate(bps: BasisPoints) -> Rate {
    Decimal::new(bps as i64, 4)
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Investor identifier. Ordering matters: allocation tie-breaks always go to
/// the lowest id.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InvestorId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FundId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrawId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DistributionId(pub u32);

impl fmt::Display for InvestorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DrawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DistributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Investors and commitments
// ---------------------------------------------------------------------------

/// Equity participant class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvestorClass {
    /// The sponsor / general partner, entitled to promote
    Sponsor,
    /// Limited partner
    Lp,
}

/// An equity investor in a fund. Immutable once a call has been issued
/// against it; amendments arrive as new configuration, not edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investor {
    pub id: InvestorId,
    pub legal_name: String,
    pub class: InvestorClass,
    /// Total committed capital in cents
    pub committed: Cents,
    /// Annual preferred-return rate in basis points (simple daily accrual)
    pub preferred_rate_bps: BasisPoints,
}

/// An investor's capital commitment to a single fund, with call and
/// contribution progress. Invariant: contributed ≤ called ≤ committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    pub investor_id: InvestorId,
    pub fund_id: FundId,
    pub committed: Cents,
    pub called_to_date: Cents,
    pub contributed_to_date: Cents,
}

impl Commitment {
    pub fn new(investor_id: InvestorId, fund_id: FundId, committed: Cents) -> Self {
        Self {
            investor_id,
            fund_id,
            committed,
            called_to_date: 0,
            contributed_to_date: 0,
        }
    }

    /// Capacity still available to call against this commitment.
    pub fn remaining_uncalled(&self) -> Cents {
        self.committed - self.called_to_date
    }

    /// Check the ordering invariant: contributed ≤ called ≤ committed, all
    /// non-negative.
    pub fn is_consistent(&self) -> bool {
        0 <= self.contributed_to_date
            && self.contributed_to_date <= self.called_to_date
            && self.called_to_date <= self.committed
    }
}

// ---------------------------------------------------------------------------
// Capital accounts
// ---------------------------------------------------------------------------

/// Running balances for one investor, always derived as a pure fold over
/// ledger history (`ledger::fold_capital_account`), never mutated directly.
///
/// Preferred return accrued is deliberately absent: accrual is a pure
/// function of the contribution/return timeline and an as-of date
/// (`accrual::accrued_preferred`), not a stored balance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapitalAccount {
    pub investor_id: InvestorId,
    /// Capital contributed against issued calls
    pub contributed: Cents,
    /// Capital returned through waterfall tier 1
    pub returned: Cents,
    /// Preferred return paid through waterfall tier 2
    pub preferred_paid: Cents,
    /// Sponsor promote received (catch-up plus sponsor residual share)
    pub promote_received: Cents,
    /// LP share of residual profit received
    pub residual_received: Cents,
}

impl CapitalAccount {
    pub fn new(investor_id: InvestorId) -> Self {
        Self {
            investor_id,
            ..Default::default()
        }
    }

    /// Capital contributed and not yet returned. Never negative: returns
    /// above basis flow through the residual tier, not tier 1.
    pub fn unreturned_capital(&self) -> Cents {
        self.contributed - self.returned
    }

    /// Everything this account has ever received back.
    pub fn total_distributed(&self) -> Cents {
        self.returned + self.preferred_paid + self.promote_received + self.residual_received
    }
}

// ---------------------------------------------------------------------------
// Computation envelope
// ---------------------------------------------------------------------------

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "integer_cents".to_string(),
        },
    }
}
