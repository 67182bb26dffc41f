use thiserror::Error;

use crate::types::{Cents, DrawId, InvestorId, Rate};

#[derive(Debug, Error)]
pub enum CapStackError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Amount must be positive: {context} was {amount} cents")]
    NegativeOrZeroAmount { context: String, amount: Cents },

    #[error("Over-commitment: investor {investor_id} would be allocated {allocation} cents against {remaining} cents of remaining uncalled commitment")]
    OverCommitment {
        investor_id: InvestorId,
        allocation: Cents,
        remaining: Cents,
    },

    #[error("Loan ceiling exceeded: funding draw {draw_id} for {requested} cents would commit {would_be} cents against a ceiling of {ceiling} cents")]
    LoanCeilingExceeded {
        draw_id: DrawId,
        requested: Cents,
        would_be: Cents,
        ceiling: Cents,
    },

    #[error("Retainage release threshold not met: project completion {completion} is below the required {threshold}")]
    ThresholdNotMet { completion: Rate, threshold: Rate },

    #[error("Rounding invariant violation: shares sum to {allocated} cents against a target of {target} cents")]
    RoundingInvariantViolation { target: Cents, allocated: Cents },

    #[error("Invalid status transition for {entity}: {from} to {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("Not found: {entity} {id}")]
    NotFound { entity: String, id: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for CapStackError {
    fn from(e: serde_json::Error) -> Self {
        CapStackError::SerializationError(e.to_string())
    }
}
