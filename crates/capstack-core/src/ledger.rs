use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::accrual::BalanceEvent;
use crate::types::{CapitalAccount, Cents, FundId, InvestorId, LoanId};

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Account a ledger entry posts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountRef {
    Investor(InvestorId),
    Loan(LoanId),
}

/// Every movement of money the engine recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Capital received against an issued call
    Contribution,
    /// Capital returned through the waterfall
    CapitalReturn,
    /// Preferred return paid
    PreferredReturn,
    /// Sponsor profit above its capital share (catch-up and residual)
    Promote,
    /// LP share of residual profit
    ResidualProfit,
    /// Net draw proceeds advanced by the lender
    DrawFunding,
    /// Retainage withheld from a funded draw
    RetainageHold,
    /// Retainage paid out once the completion threshold is reached
    RetainageRelease,
}

/// An immutable, append-only ledger record. Once committed an entry is never
/// edited or deleted; corrections are new offsetting entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Monotonically increasing position in the fund's log
    pub seq: u64,
    pub fund_id: FundId,
    pub account: AccountRef,
    pub kind: EntryKind,
    pub amount: Cents,
    /// Operation that produced the entry, e.g. "call-1", "draw-4", "dist-2"
    pub ref_id: String,
    /// Effective date of the cash movement
    pub date: NaiveDate,
    /// Wall-clock commit time; identical for every entry of one batch
    pub recorded_at: DateTime<Utc>,
}

/// An entry awaiting commit. The ledger assigns `seq` and `recorded_at` when
/// the batch lands.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub account: AccountRef,
    pub kind: EntryKind,
    pub amount: Cents,
    pub ref_id: String,
    pub date: NaiveDate,
}

// ---------------------------------------------------------------------------
// The log
// ---------------------------------------------------------------------------

/// Append-only event log for a single fund.
///
/// Holds no state beyond the entries themselves; current balances are always
/// a pure fold over history (`fold_capital_account`, `fold_loan_position`).
/// Callers serialize access through the engine's per-fund lock, so a batch
/// commits atomically: an error raised before `append_batch` simply discards
/// the uncommitted batch with no ledger effect.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    next_seq: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a batch. Entries receive consecutive sequence numbers and a
    /// shared commit timestamp; the committed records are returned.
    pub fn append_batch(&mut self, fund_id: FundId, batch: Vec<PendingEntry>) -> Vec<LedgerEntry> {
        let recorded_at = Utc::now();
        let mut committed = Vec::with_capacity(batch.len());
        for pending in batch {
            let entry = LedgerEntry {
                seq: self.next_seq,
                fund_id,
                account: pending.account,
                kind: pending.kind,
                amount: pending.amount,
                ref_id: pending.ref_id,
                date: pending.date,
                recorded_at,
            };
            self.next_seq += 1;
            self.entries.push(entry.clone());
            committed.push(entry);
        }
        committed
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Folds
// ---------------------------------------------------------------------------

/// Derive an investor's capital account from ledger history.
pub fn fold_capital_account(entries: &[LedgerEntry], investor_id: InvestorId) -> CapitalAccount {
    let mut account = CapitalAccount::new(investor_id);
    for entry in entries {
        if entry.account != AccountRef::Investor(investor_id) {
            continue;
        }
        match entry.kind {
            EntryKind::Contribution => account.contributed += entry.amount,
            EntryKind::CapitalReturn => account.returned += entry.amount,
            EntryKind::PreferredReturn => account.preferred_paid += entry.amount,
            EntryKind::Promote => account.promote_received += entry.amount,
            EntryKind::ResidualProfit => account.residual_received += entry.amount,
            // Loan-side kinds never post to investor accounts
            EntryKind::DrawFunding | EntryKind::RetainageHold | EntryKind::RetainageRelease => {}
        }
    }
    account
}

/// Cumulative lender-side position for one loan, folded from history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanPosition {
    /// Net proceeds advanced across all funded draws
    pub net_funded: Cents,
    /// Retainage ever withheld, whether or not since released
    pub retainage_held: Cents,
    /// Retainage released back out
    pub retainage_released: Cents,
}

impl LoanPosition {
    /// Retainage still held back.
    pub fn outstanding_retainage(&self) -> Cents {
        self.retainage_held - self.retainage_released
    }

    /// Loan capacity consumed: everything advanced plus everything withheld.
    /// Releases move money out of holdback without consuming new capacity.
    pub fn committed(&self) -> Cents {
        self.net_funded + self.retainage_held
    }
}

pub fn fold_loan_position(entries: &[LedgerEntry], loan_id: LoanId) -> LoanPosition {
    let mut position = LoanPosition::default();
    for entry in entries {
        if entry.account != AccountRef::Loan(loan_id) {
            continue;
        }
        match entry.kind {
            EntryKind::DrawFunding => position.net_funded += entry.amount,
            EntryKind::RetainageHold => position.retainage_held += entry.amount,
            EntryKind::RetainageRelease => position.retainage_released += entry.amount,
            _ => {}
        }
    }
    position
}

/// The contribution/return timeline feeding preferred accrual.
pub fn balance_events(entries: &[LedgerEntry], investor_id: InvestorId) -> Vec<BalanceEvent> {
    let mut events = Vec::new();
    for entry in entries {
        if entry.account != AccountRef::Investor(investor_id) {
            continue;
        }
        match entry.kind {
            EntryKind::Contribution => events.push(BalanceEvent {
                date: entry.date,
                delta: entry.amount,
            }),
            EntryKind::CapitalReturn => events.push(BalanceEvent {
                date: entry.date,
                delta: -entry.amount,
            }),
            _ => {}
        }
    }
    events
}

/// Whether retainage for the referenced operation was already released.
pub fn has_retainage_release(entries: &[LedgerEntry], ref_id: &str) -> bool {
    entries
        .iter()
        .any(|e| e.kind == EntryKind::RetainageRelease && e.ref_id == ref_id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
