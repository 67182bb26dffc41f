pub mod accrual;
pub mod calls;
pub mod draws;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod rounding;
pub mod types;
pub mod waterfall;

pub use error::CapStackError;
pub use types::*;

/// Standard result type for all capstack operations
pub type CapStackResult<T> = Result<T, CapStackError>;
