//! Master transactions with an enforced runtime ceiling.

pub mod transaction;

pub use transaction::{clamp_runtime, Transaction};
