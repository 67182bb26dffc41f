use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::accrual;
use crate::calls::{self, CapitalCall, CapitalCallInput};
use crate::draws::{self, Draw, DrawStatus};
use crate::error::CapStackError;
use crate::ledger::{
    balance_events, fold_capital_account, fold_loan_position, has_retainage_release, AccountRef,
    EntryKind, Ledger, LedgerEntry, LoanPosition, PendingEntry,
};
use crate::types::*;
use crate::waterfall::{
    self, DistributionInput, DistributionOutput, InvestorPosition, TierAllocation, TierBreakdown,
    WaterfallTier,
};
use crate::CapStackResult;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Terms of a fund's construction facility. All draw limits and retainage
/// behavior come from here, never from literals at call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanTerms {
    pub loan_id: LoanId,
    /// Maximum capacity the lender will commit, in cents
    pub ceiling: Cents,
    /// Retainage applied when a draw does not specify its own
    pub default_retainage_pct: Rate,
    /// Project completion required before retainage release (e.g. 0.95 for
    /// substantial completion)
    pub completion_threshold: Rate,
}

/// Fund-level configuration: the cap table, waterfall shape, and loan terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundConfig {
    pub fund_id: FundId,
    pub name: String,
    pub investors: Vec<Investor>,
    /// Ordered waterfall tiers applied to every distribution
    pub tiers: Vec<WaterfallTier>,
    pub loan: Option<LoanTerms>,
}

// ---------------------------------------------------------------------------
// Distribution record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionStatus {
    Draft,
    Processed,
}

/// A processed distribution: the tier breakdown and per-investor allocations
/// of one cash event. Immutable once Processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distribution {
    pub id: DistributionId,
    pub fund_id: FundId,
    pub date: NaiveDate,
    pub total_amount: Cents,
    pub tiers: Vec<TierBreakdown>,
    pub allocations: Vec<TierAllocation>,
    pub status: DistributionStatus,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// All state for one fund, guarded by a single mutex. Holding the mutex is
/// the per-fund computation lock from the concurrency model: snapshot reads
/// and batch appends happen under it, so concurrent operations against the
/// same fund serialize while different funds never contend.
struct FundState {
    config: FundConfig,
    commitments: BTreeMap<InvestorId, Commitment>,
    calls: BTreeMap<CallId, CapitalCall>,
    draws: BTreeMap<DrawId, Draw>,
    distributions: BTreeMap<DistributionId, Distribution>,
    /// Cumulative project completion recorded by the inspection workflow
    completion: Rate,
    ledger: Ledger,
    next_call: u32,
    next_draw: u32,
    next_distribution: u32,
}

impl FundState {
    fn investor(&self, id: InvestorId) -> CapStackResult<&Investor> {
        self.config
            .investors
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| CapStackError::NotFound {
                entity: "investor".into(),
                id: id.to_string(),
            })
    }

    fn loan(&self) -> CapStackResult<&LoanTerms> {
        self.config
            .loan
            .as_ref()
            .ok_or_else(|| CapStackError::InvalidInput {
                field: "loan".into(),
                reason: format!("fund {} has no construction loan configured", self.config.fund_id),
            })
    }

    /// Snapshot the waterfall's per-investor positions from ledger history.
    fn positions(&self, as_of: NaiveDate) -> CapStackResult<Vec<InvestorPosition>> {
        let entries = self.ledger.entries();
        let mut positions = Vec::with_capacity(self.config.investors.len());
        for investor in &self.config.investors {
            let account = fold_capital_account(entries, investor.id);
            let events = balance_events(entries, investor.id);
            let accrued_unpaid = accrual::accrued_unpaid(
                &events,
                bps_to_rate(investor.preferred_rate_bps),
                as_of,
                account.preferred_paid,
            )?;
            positions.push(InvestorPosition {
                investor_id: investor.id,
                class: investor.class,
                committed: investor.committed,
                unreturned_capital: account.unreturned_capital(),
                accrued_preferred_unpaid: accrued_unpaid,
                preferred_paid_to_date: account.preferred_paid,
                promote_received_to_date: account.promote_received,
            });
        }
        Ok(positions)
    }
}

/// The engine: a registry of funds, each behind its own lock.
#[derive(Default)]
pub struct Engine {
    funds: RwLock<HashMap<FundId, Arc<Mutex<FundState>>>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fund's configuration and open commitments for its
    /// investors.
    pub fn register_fund(&self, config: FundConfig) -> CapStackResult<()> {
        if config.investors.is_empty() {
            return Err(CapStackError::InvalidInput {
                field: "investors".into(),
                reason: "a fund needs at least one investor".into(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for investor in &config.investors {
            if !seen.insert(investor.id) {
                return Err(CapStackError::InvalidInput {
                    field: "investors".into(),
                    reason: format!("duplicate investor id {}", investor.id),
                });
            }
            if investor.committed <= 0 {
                return Err(CapStackError::NegativeOrZeroAmount {
                    context: format!("commitment for investor {}", investor.id),
                    amount: investor.committed,
                });
            }
        }
        waterfall::validate_tiers(&config.tiers)?;
        if let Some(loan) = &config.loan {
            if loan.ceiling <= 0 {
                return Err(CapStackError::NegativeOrZeroAmount {
                    context: "loan ceiling".into(),
                    amount: loan.ceiling,
                });
            }
        }

        let mut funds = self.funds.write();
        if funds.contains_key(&config.fund_id) {
            return Err(CapStackError::InvalidInput {
                field: "fund_id".into(),
                reason: format!("fund {} is already registered", config.fund_id),
            });
        }

        let commitments = config
            .investors
            .iter()
            .map(|i| (i.id, Commitment::new(i.id, config.fund_id, i.committed)))
            .collect();

        info!(
            fund_id = config.fund_id.0,
            investors = config.investors.len(),
            "registered fund"
        );
        funds.insert(
            config.fund_id,
            Arc::new(Mutex::new(FundState {
                config,
                commitments,
                calls: BTreeMap::new(),
                draws: BTreeMap::new(),
                distributions: BTreeMap::new(),
                completion: Decimal::ZERO,
                ledger: Ledger::new(),
                next_call: 1,
                next_draw: 1,
                next_distribution: 1,
            })),
        );
        Ok(())
    }

    fn fund(&self, fund_id: FundId) -> CapStackResult<Arc<Mutex<FundState>>> {
        self.funds
            .read()
            .get(&fund_id)
            .cloned()
            .ok_or_else(|| CapStackError::NotFound {
                entity: "fund".into(),
                id: fund_id.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Capital calls
    // -----------------------------------------------------------------------

    /// Issue a capital call: allocate the total pro-rata to commitments and
    /// advance every investor's called-to-date. Fails `OverCommitment`
    /// without touching any state.
    pub fn issue_capital_call(
        &self,
        fund_id: FundId,
        date: NaiveDate,
        total_amount: Cents,
    ) -> CapStackResult<CapitalCall> {
        let fund = self.fund(fund_id)?;
        let mut state = fund.lock();

        let input = CapitalCallInput {
            total_amount,
            commitments: state.commitments.values().cloned().collect(),
        };
        let allocation = calls::allocate_capital_call(&input)?.result;

        let id = CallId(state.next_call);
        state.next_call += 1;
        let mut call = CapitalCall::new(id, fund_id, date, total_amount, allocation.allocations);
        call.issue()?;

        for a in &call.allocations {
            if let Some(commitment) = state.commitments.get_mut(&a.investor_id) {
                commitment.called_to_date += a.amount;
            }
        }
        state.calls.insert(id, call.clone());

        info!(
            fund_id = fund_id.0,
            call_id = id.0,
            total_amount,
            "issued capital call"
        );
        Ok(call)
    }

    /// Record a funding receipt against an issued call. Appends the
    /// Contribution entry and advances contributed-to-date atomically with
    /// the call's status change.
    pub fn record_call_funding(
        &self,
        fund_id: FundId,
        call_id: CallId,
        investor_id: InvestorId,
        date: NaiveDate,
        amount: Cents,
    ) -> CapStackResult<CapitalCall> {
        let fund = self.fund(fund_id)?;
        let mut state = fund.lock();

        let call = state
            .calls
            .get_mut(&call_id)
            .ok_or_else(|| CapStackError::NotFound {
                entity: "capital call".into(),
                id: call_id.to_string(),
            })?;
        call.record_funding(investor_id, amount)?;
        let snapshot = call.clone();

        if let Some(commitment) = state.commitments.get_mut(&investor_id) {
            commitment.contributed_to_date += amount;
        }
        state.ledger.append_batch(
            fund_id,
            vec![PendingEntry {
                account: AccountRef::Investor(investor_id),
                kind: EntryKind::Contribution,
                amount,
                ref_id: format!("call-{call_id}"),
                date,
            }],
        );

        debug!(
            fund_id = fund_id.0,
            call_id = call_id.0,
            investor_id = investor_id.0,
            amount,
            "recorded call funding"
        );
        Ok(snapshot)
    }

    // -----------------------------------------------------------------------
    // Draws
    // -----------------------------------------------------------------------

    /// Create a draft draw against the fund's loan. The retainage split is
    /// locked in here; `retainage_pct` of None takes the loan's default.
    pub fn create_draw(
        &self,
        fund_id: FundId,
        period: &str,
        requested: Cents,
        retainage_pct: Option<Rate>,
    ) -> CapStackResult<Draw> {
        let fund = self.fund(fund_id)?;
        let mut state = fund.lock();

        let loan = state.loan()?;
        let pct = retainage_pct.unwrap_or(loan.default_retainage_pct);
        let loan_id = loan.loan_id;

        let id = DrawId(state.next_draw);
        state.next_draw += 1;
        let draw = Draw::new(id, loan_id, period, requested, pct)?;
        state.draws.insert(id, draw.clone());
        Ok(draw)
    }

    pub fn submit_draw(&self, fund_id: FundId, draw_id: DrawId) -> CapStackResult<Draw> {
        self.with_draw(fund_id, draw_id, Draw::submit)
    }

    pub fn approve_draw(&self, fund_id: FundId, draw_id: DrawId) -> CapStackResult<Draw> {
        self.with_draw(fund_id, draw_id, Draw::approve)
    }

    pub fn reject_draw(&self, fund_id: FundId, draw_id: DrawId) -> CapStackResult<Draw> {
        self.with_draw(fund_id, draw_id, Draw::reject)
    }

    fn with_draw(
        &self,
        fund_id: FundId,
        draw_id: DrawId,
        f: impl FnOnce(&mut Draw) -> CapStackResult<()>,
    ) -> CapStackResult<Draw> {
        let fund = self.fund(fund_id)?;
        let mut state = fund.lock();
        let draw = state
            .draws
            .get_mut(&draw_id)
            .ok_or_else(|| CapStackError::NotFound {
                entity: "draw".into(),
                id: draw_id.to_string(),
            })?;
        f(draw)?;
        Ok(draw.clone())
    }

    /// Fund an approved draw: check the loan ceiling against the folded
    /// position, then atomically append the funding and retainage-hold
    /// entries. On `LoanCeilingExceeded` the draw stays Approved and the
    /// ledger is untouched.
    pub fn fund_draw(
        &self,
        fund_id: FundId,
        draw_id: DrawId,
        date: NaiveDate,
    ) -> CapStackResult<Draw> {
        let fund = self.fund(fund_id)?;
        let mut state = fund.lock();

        let ceiling = state.loan()?.ceiling;
        let draw = state
            .draws
            .get(&draw_id)
            .ok_or_else(|| CapStackError::NotFound {
                entity: "draw".into(),
                id: draw_id.to_string(),
            })?;
        if draw.status != DrawStatus::Approved {
            return Err(CapStackError::InvalidTransition {
                entity: format!("draw {draw_id}"),
                from: draw.status.to_string(),
                to: DrawStatus::Funded.to_string(),
            });
        }

        let position = fold_loan_position(state.ledger.entries(), draw.loan_id);
        draws::check_ceiling(draw, &position, ceiling)?;

        let batch = vec![
            PendingEntry {
                account: AccountRef::Loan(draw.loan_id),
                kind: EntryKind::DrawFunding,
                amount: draw.net_funded,
                ref_id: format!("draw-{draw_id}"),
                date,
            },
            PendingEntry {
                account: AccountRef::Loan(draw.loan_id),
                kind: EntryKind::RetainageHold,
                amount: draw.retained,
                ref_id: format!("draw-{draw_id}"),
                date,
            },
        ];

        let draw = state
            .draws
            .get_mut(&draw_id)
            .ok_or_else(|| CapStackError::NotFound {
                entity: "draw".into(),
                id: draw_id.to_string(),
            })?;
        draw.mark_funded()?;
        let snapshot = draw.clone();
        state.ledger.append_batch(fund_id, batch);

        info!(
            fund_id = fund_id.0,
            draw_id = draw_id.0,
            net_funded = snapshot.net_funded,
            retained = snapshot.retained,
            "funded draw"
        );
        Ok(snapshot)
    }

    /// Record cumulative project completion from the inspection workflow.
    pub fn record_completion(&self, fund_id: FundId, completion: Rate) -> CapStackResult<()> {
        if completion < Decimal::ZERO || completion > Decimal::ONE {
            return Err(CapStackError::InvalidInput {
                field: "completion".into(),
                reason: "completion must be between 0 and 1".into(),
            });
        }
        let fund = self.fund(fund_id)?;
        let mut state = fund.lock();
        state.completion = completion;
        Ok(())
    }

    /// Release a funded draw's retainage once the completion threshold is
    /// met. Fails `ThresholdNotMet` below the threshold; a second release of
    /// the same draw is rejected.
    pub fn release_retainage(
        &self,
        fund_id: FundId,
        draw_id: DrawId,
        date: NaiveDate,
    ) -> CapStackResult<LedgerEntry> {
        let fund = self.fund(fund_id)?;
        let mut state = fund.lock();

        let threshold = state.loan()?.completion_threshold;
        let draw = state
            .draws
            .get(&draw_id)
            .ok_or_else(|| CapStackError::NotFound {
                entity: "draw".into(),
                id: draw_id.to_string(),
            })?;
        if draw.status != DrawStatus::Funded {
            return Err(CapStackError::InvalidTransition {
                entity: format!("draw {draw_id}"),
                from: draw.status.to_string(),
                to: "RetainageReleased".to_string(),
            });
        }
        if draw.retained == 0 {
            return Err(CapStackError::InvalidInput {
                field: "draw_id".into(),
                reason: format!("draw {draw_id} carries no retainage"),
            });
        }
        if state.completion < threshold {
            return Err(CapStackError::ThresholdNotMet {
                completion: state.completion,
                threshold,
            });
        }
        let ref_id = format!("draw-{draw_id}");
        if has_retainage_release(state.ledger.entries(), &ref_id) {
            return Err(CapStackError::InvalidInput {
                field: "draw_id".into(),
                reason: format!("retainage for draw {draw_id} was already released"),
            });
        }

        let batch = vec![PendingEntry {
            account: AccountRef::Loan(draw.loan_id),
            kind: EntryKind::RetainageRelease,
            amount: draw.retained,
            ref_id,
            date,
        }];
        let mut committed = state.ledger.append_batch(fund_id, batch);

        info!(
            fund_id = fund_id.0,
            draw_id = draw_id.0,
            amount = committed[0].amount,
            "released retainage"
        );
        Ok(committed.remove(0))
    }

    // -----------------------------------------------------------------------
    // Distributions
    // -----------------------------------------------------------------------

    /// Run the waterfall over a cash pool and commit the resulting entries.
    /// Never fails on a valid positive pool; later tiers may receive zero.
    pub fn process_distribution(
        &self,
        fund_id: FundId,
        date: NaiveDate,
        total_amount: Cents,
    ) -> CapStackResult<Distribution> {
        let fund = self.fund(fund_id)?;
        let mut state = fund.lock();

        let output = Self::compute_distribution(&state, date, total_amount)?;

        let id = DistributionId(state.next_distribution);
        state.next_distribution += 1;
        let ref_id = format!("dist-{id}");

        // One batch for the whole distribution: every tier's entries commit
        // together or not at all.
        let mut batch = Vec::new();
        for tier in &output.tiers {
            for allocation in &tier.allocations {
                let class = state.investor(allocation.investor_id)?.class;
                batch.push(PendingEntry {
                    account: AccountRef::Investor(allocation.investor_id),
                    kind: tier.kind.entry_kind(class),
                    amount: allocation.amount,
                    ref_id: ref_id.clone(),
                    date,
                });
            }
        }

        let mut distribution = Distribution {
            id,
            fund_id,
            date,
            total_amount,
            tiers: output.tiers,
            allocations: output.by_investor,
            status: DistributionStatus::Draft,
        };
        state.ledger.append_batch(fund_id, batch);
        distribution.status = DistributionStatus::Processed;
        state.distributions.insert(id, distribution.clone());

        info!(
            fund_id = fund_id.0,
            distribution_id = id.0,
            total_amount,
            undistributed = output.undistributed,
            "processed distribution"
        );
        Ok(distribution)
    }

    /// Run the waterfall without committing anything. A preview can be
    /// abandoned at no cost; state changes only through
    /// `process_distribution`.
    pub fn preview_distribution(
        &self,
        fund_id: FundId,
        date: NaiveDate,
        total_amount: Cents,
    ) -> CapStackResult<DistributionOutput> {
        let fund = self.fund(fund_id)?;
        let state = fund.lock();
        Self::compute_distribution(&state, date, total_amount)
    }

    fn compute_distribution(
        state: &FundState,
        date: NaiveDate,
        total_amount: Cents,
    ) -> CapStackResult<DistributionOutput> {
        let input = DistributionInput {
            total_amount,
            tiers: state.config.tiers.clone(),
            positions: state.positions(date)?,
        };
        Ok(waterfall::run_waterfall(&input)?.result)
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Fold every investor's capital account from ledger history.
    pub fn capital_accounts(&self, fund_id: FundId) -> CapStackResult<Vec<CapitalAccount>> {
        let fund = self.fund(fund_id)?;
        let state = fund.lock();
        Ok(state
            .config
            .investors
            .iter()
            .map(|i| fold_capital_account(state.ledger.entries(), i.id))
            .collect())
    }

    pub fn loan_position(&self, fund_id: FundId) -> CapStackResult<LoanPosition> {
        let fund = self.fund(fund_id)?;
        let state = fund.lock();
        let loan_id = state.loan()?.loan_id;
        Ok(fold_loan_position(state.ledger.entries(), loan_id))
    }

    pub fn commitments(&self, fund_id: FundId) -> CapStackResult<Vec<Commitment>> {
        let fund = self.fund(fund_id)?;
        let state = fund.lock();
        Ok(state.commitments.values().cloned().collect())
    }

    /// Snapshot the full ledger for statements and audit.
    pub fn ledger_entries(&self, fund_id: FundId) -> CapStackResult<Vec<LedgerEntry>> {
        let fund = self.fund(fund_id)?;
        let state = fund.lock();
        Ok(state.ledger.entries().to_vec())
    }
}
