use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::error::CapStackError;
use crate::rounding;
use crate::types::*;
use crate::CapStackResult;

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

/// Input for a pro-rata capital call allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalCallInput {
    /// Total amount being called, in cents
    pub total_amount: Cents,
    /// Commitments of every investor participating in the call
    pub commitments: Vec<Commitment>,
}

/// One investor's share of a capital call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallAllocation {
    pub investor_id: InvestorId,
    pub amount: Cents,
}

/// Full allocation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalCallOutput {
    /// Per-investor amounts, sorted by investor id, summing exactly to the
    /// requested total
    pub allocations: Vec<CallAllocation>,
    pub total_allocated: Cents,
}

/// Allocate a capital call across investors pro-rata to committed capital.
///
/// Ownership weight is each investor's committed amount. Shares are floored
/// to cents and the leftover distributed by largest fractional remainder
/// (ties to the lowest investor id). Fails `OverCommitment` if any investor's
/// share would exceed their remaining uncalled commitment; the caller must
/// re-weight or reduce the total, the allocator never re-weights silently.
pub fn allocate_capital_call(
    input: &CapitalCallInput,
) -> CapStackResult<ComputationOutput<CapitalCallOutput>> {
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();

    if input.total_amount <= 0 {
        return Err(CapStackError::NegativeOrZeroAmount {
            context: "capital call total".into(),
            amount: input.total_amount,
        });
    }
    if input.commitments.is_empty() {
        return Err(CapStackError::InvalidInput {
            field: "commitments".into(),
            reason: "at least one commitment is required".into(),
        });
    }
    for commitment in &input.commitments {
        if !commitment.is_consistent() {
            return Err(CapStackError::InvalidInput {
                field: "commitments".into(),
                reason: format!(
                    "commitment for investor {} violates contributed <= called <= committed",
                    commitment.investor_id
                ),
            });
        }
    }

    // Tie-breaks in the resolver go to the earliest position, so order by id.
    let mut commitments: Vec<&Commitment> = input.commitments.iter().collect();
    commitments.sort_by_key(|c| c.investor_id);

    let weights: Vec<Decimal> = commitments
        .iter()
        .map(|c| Decimal::from(c.committed))
        .collect();
    let amounts = rounding::allocate_proportional(input.total_amount, &weights)?;

    let mut allocations = Vec::with_capacity(commitments.len());
    for (commitment, amount) in commitments.iter().zip(amounts) {
        let remaining = commitment.remaining_uncalled();
        if amount > remaining {
            return Err(CapStackError::OverCommitment {
                investor_id: commitment.investor_id,
                allocation: amount,
                remaining,
            });
        }
        allocations.push(CallAllocation {
            investor_id: commitment.investor_id,
            amount,
        });
    }

    let output = CapitalCallOutput {
        total_allocated: allocations.iter().map(|a| a.amount).sum(),
        allocations,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Pro-Rata Capital Call (largest remainder)",
        &serde_json::json!({
            "total_amount": input.total_amount,
            "num_investors": input.commitments.len(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// The call entity
// ---------------------------------------------------------------------------

/// Capital call lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Draft,
    Issued,
    PartiallyFunded,
    Funded,
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallStatus::Draft => "Draft",
            CallStatus::Issued => "Issued",
            CallStatus::PartiallyFunded => "PartiallyFunded",
            CallStatus::Funded => "Funded",
        };
        f.write_str(s)
    }
}

/// A capital call with its allocation schedule and funding progress.
/// Immutable once Funded; the engine emits a Contribution ledger entry for
/// each receipt recorded against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalCall {
    pub id: CallId,
    pub fund_id: FundId,
    pub date: NaiveDate,
    pub total_amount: Cents,
    pub allocations: Vec<CallAllocation>,
    /// Receipts recorded per investor
    pub funded: BTreeMap<InvestorId, Cents>,
    pub status: CallStatus,
}

impl CapitalCall {
    pub fn new(
        id: CallId,
        fund_id: FundId,
        date: NaiveDate,
        total_amount: Cents,
        allocations: Vec<CallAllocation>,
    ) -> Self {
        Self {
            id,
            fund_id,
            date,
            total_amount,
            allocations,
            funded: BTreeMap::new(),
            status: CallStatus::Draft,
        }
    }

    pub fn allocation_for(&self, investor_id: InvestorId) -> Option<Cents> {
        self.allocations
            .iter()
            .find(|a| a.investor_id == investor_id)
            .map(|a| a.amount)
    }

    pub fn funded_to_date(&self) -> Cents {
        self.funded.values().sum()
    }

    /// Draft to Issued.
    pub fn issue(&mut self) -> CapStackResult<()> {
        if self.status != CallStatus::Draft {
            return Err(CapStackError::InvalidTransition {
                entity: format!("call {}", self.id),
                from: self.status.to_string(),
                to: CallStatus::Issued.to_string(),
            });
        }
        self.status = CallStatus::Issued;
        Ok(())
    }

    /// Record a funding receipt against one investor's allocation. Rejects
    /// receipts beyond the allocation; flips status to PartiallyFunded and
    /// finally Funded when every allocation is covered.
    pub fn record_funding(&mut self, investor_id: InvestorId, amount: Cents) -> CapStackResult<()> {
        if amount <= 0 {
            return Err(CapStackError::NegativeOrZeroAmount {
                context: "call funding receipt".into(),
                amount,
            });
        }
        match self.status {
            CallStatus::Issued | CallStatus::PartiallyFunded => {}
            other => {
                return Err(CapStackError::InvalidTransition {
                    entity: format!("call {}", self.id),
                    from: other.to_string(),
                    to: CallStatus::PartiallyFunded.to_string(),
                })
            }
        }

        let allocation =
            self.allocation_for(investor_id)
                .ok_or_else(|| CapStackError::NotFound {
                    entity: "call allocation for investor".into(),
                    id: investor_id.to_string(),
                })?;
        let already = self.funded.get(&investor_id).copied().unwrap_or(0);
        if already + amount > allocation {
            return Err(CapStackError::InvalidInput {
                field: "amount".into(),
                reason: format!(
                    "receipt would overfund investor {investor_id}: {} received against an allocation of {allocation}",
                    already + amount
                ),
            });
        }

        *self.funded.entry(investor_id).or_insert(0) += amount;
        self.status = if self.funded_to_date() == self.total_amount {
            CallStatus::Funded
        } else {
            CallStatus::PartiallyFunded
        };
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn commitment(id: u32, committed: Cents) -> Commitment {
        Commitment::new(InvestorId(id), FundId(1), committed)
    }

    /// The repo's standard cap table: Sponsor $700k (28%), 7 LPs totaling
    /// $1.8m (72%).
    fn standard_commitments() -> Vec<Commitment> {
        vec![
            commitment(1, 70_000_000),
            commitment(2, 30_000_000),
            commitment(3, 30_000_000),
            commitment(4, 30_000_000),
            commitment(5, 25_000_000),
            commitment(6, 25_000_000),
            commitment(7, 20_000_000),
            commitment(8, 20_000_000),
        ]
    }

    #[test]
    fn test_sponsor_gets_exactly_28_pct_of_the_call() {
        // $1,250,000 called against $2,500,000 committed
        let input = CapitalCallInput {
            total_amount: 125_000_000,
            commitments: standard_commitments(),
        };
        let out = allocate_capital_call(&input).unwrap().result;

        assert_eq!(out.total_allocated, 125_000_000);
        assert_eq!(out.allocations[0].investor_id, InvestorId(1));
        assert_eq!(out.allocations[0].amount, 35_000_000); // $350,000 sponsor

        let lp_total: Cents = out.allocations[1..].iter().map(|a| a.amount).sum();
        assert_eq!(lp_total, 90_000_000); // $900,000 across the 7 LPs

        // Pro-rata within the LPs too: each pays half its commitment
        for allocation in &out.allocations {
            let committed = standard_commitments()
                .iter()
                .find(|c| c.investor_id == allocation.investor_id)
                .unwrap()
                .committed;
            assert_eq!(allocation.amount * 2, committed);
        }
    }

    #[test]
    fn test_allocations_always_sum_to_total() {
        // A total that does not divide evenly across the weights
        let input = CapitalCallInput {
            total_amount: 100_000_01,
            commitments: vec![
                commitment(1, 1_000_000),
                commitment(2, 1_000_000),
                commitment(3, 1_000_000),
            ],
        };
        let out = allocate_capital_call(&input).unwrap().result;
        let sum: Cents = out.allocations.iter().map(|a| a.amount).sum();
        assert_eq!(sum, 100_000_01);
        // Remainder cents go to the lowest ids
        assert_eq!(out.allocations[0].amount, 33_333_34);
        assert_eq!(out.allocations[1].amount, 33_333_34);
        assert_eq!(out.allocations[2].amount, 33_333_33);
    }

    #[test]
    fn test_over_commitment_fails_and_names_the_investor() {
        let mut commitments = vec![commitment(1, 50_000_00), commitment(2, 50_000_00)];
        commitments[0].called_to_date = 45_000_00; // only $5k of capacity left

        let input = CapitalCallInput {
            total_amount: 40_000_00,
            commitments,
        };
        match allocate_capital_call(&input).unwrap_err() {
            CapStackError::OverCommitment {
                investor_id,
                allocation,
                remaining,
            } => {
                assert_eq!(investor_id, InvestorId(1));
                assert_eq!(allocation, 20_000_00);
                assert_eq!(remaining, 5_000_00);
            }
            other => panic!("expected OverCommitment, got: {other:?}"),
        }
    }

    #[test]
    fn test_zero_or_negative_total_rejected() {
        let input = CapitalCallInput {
            total_amount: 0,
            commitments: vec![commitment(1, 100)],
        };
        assert!(matches!(
            allocate_capital_call(&input),
            Err(CapStackError::NegativeOrZeroAmount { .. })
        ));
    }

    #[test]
    fn test_inconsistent_commitment_rejected() {
        let mut bad = commitment(1, 100_000_00);
        bad.called_to_date = 150_000_00;
        let input = CapitalCallInput {
            total_amount: 10_000_00,
            commitments: vec![bad],
        };
        assert!(matches!(
            allocate_capital_call(&input),
            Err(CapStackError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_unsorted_input_is_allocated_by_id() {
        let input = CapitalCallInput {
            total_amount: 100,
            commitments: vec![commitment(9, 100), commitment(2, 100), commitment(5, 100)],
        };
        let out = allocate_capital_call(&input).unwrap().result;
        let ids: Vec<u32> = out.allocations.iter().map(|a| a.investor_id.0).collect();
        assert_eq!(ids, vec![2, 5, 9]);
        // 100 / 3: leftover cent lands on the lowest id
        assert_eq!(out.allocations[0].amount, 34);
    }

    #[test]
    fn test_call_funding_lifecycle() {
        let mut call = CapitalCall::new(
            CallId(1),
            FundId(1),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            300,
            vec![
                CallAllocation {
                    investor_id: InvestorId(1),
                    amount: 100,
                },
                CallAllocation {
                    investor_id: InvestorId(2),
                    amount: 200,
                },
            ],
        );
        assert_eq!(call.status, CallStatus::Draft);

        // Receipts against a draft call are rejected
        assert!(call.record_funding(InvestorId(1), 100).is_err());

        call.issue().unwrap();
        assert_eq!(call.status, CallStatus::Issued);
        // Double-issue is an invalid transition
        assert!(call.issue().is_err());

        call.record_funding(InvestorId(1), 100).unwrap();
        assert_eq!(call.status, CallStatus::PartiallyFunded);

        // Partial receipt from the second investor
        call.record_funding(InvestorId(2), 150).unwrap();
        assert_eq!(call.status, CallStatus::PartiallyFunded);
        assert_eq!(call.funded_to_date(), 250);

        call.record_funding(InvestorId(2), 50).unwrap();
        assert_eq!(call.status, CallStatus::Funded);

        // Funded calls are closed
        assert!(call.record_funding(InvestorId(1), 1).is_err());
    }

    #[test]
    fn test_overfunding_an_allocation_rejected() {
        let mut call = CapitalCall::new(
            CallId(1),
            FundId(1),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            100,
            vec![CallAllocation {
                investor_id: InvestorId(1),
                amount: 100,
            }],
        );
        call.issue().unwrap();
        assert!(call.record_funding(InvestorId(1), 101).is_err());
        assert!(call.record_funding(InvestorId(9), 10).is_err());
        call.record_funding(InvestorId(1), 60).unwrap();
        assert!(call.record_funding(InvestorId(1), 41).is_err());
    }
}
