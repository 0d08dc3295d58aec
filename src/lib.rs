//! deal_ledger - Transaction Lifecycle & Financial Integrity Engine
//!
//! Tracks one commercial deal (sale, purchases, logistics load, invoices,
//! bills) from creation to an irreversible close and freezes its financial
//! outcome.
//!
//! # Modules
//!
//! - [`money`] - Decimal amounts, parsing and rounding
//! - [`transaction`] - Lifecycle engine, linkage, commission, compliance, audit
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod logging;
pub mod money;
pub mod transaction;

// Convenient re-exports at crate root
pub use money::{Amount, MoneyError};
pub use transaction::{
    Collaborators, FinancialSnapshot, TransactionEngine, TransactionError, TransactionId,
    TransactionRecord, TransactionState,
};
