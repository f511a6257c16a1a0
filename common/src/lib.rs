//! CafeLedger Common Types
//!
//! Shared types used across the ledger crates: account and transaction
//! identifiers, the error taxonomy, and operation deadlines.

pub mod identifiers;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use error::*;
pub use time::*;
