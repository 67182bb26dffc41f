pub mod call;
pub mod distribute;
pub mod draw;
