//! CafeLedger Ledger Engine
//!
//! Balance-transfer engine with atomic deposits, withdrawals and transfers
//! over a pluggable account store and append-only transaction log.

pub mod engine;
pub mod account;
pub mod transaction;
pub mod operation;
pub mod store;
pub mod memory;
pub mod postgres;
pub mod audit;

pub use engine::LedgerEngine;
pub use account::Account;
pub use transaction::{Transaction, TransactionType};
pub use operation::Operation;
pub use store::{AccountStore, AtomicUnit, LedgerStore, TransactionLog};
pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use audit::{AuditReport, BalanceDiscrepancy};
