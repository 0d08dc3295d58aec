//! Transaction Lifecycle
//!
//! One commercial deal from creation to an irreversible close, with its
//! financial outcome frozen at close.
//!
//! # State Machine
//!
//! ```text
//! DRAFT ──activate / sale confirmed──▶ ACTIVE ──close (guarded)──▶ CLOSED
//!   │
//!   └── delete (no accounting links)
//! ```
//!
//! # Integrity Invariants
//!
//! 1. **Unique reference**: assigned once at creation, never reused, even after delete
//! 2. **Exclusive linkage**: an invoice, vendor bill or freight bill belongs to at most one
//!    transaction per slot; the customer invoice is write-once
//! 3. **Closed margin**: a closed transaction never has a negative gross margin
//! 4. **Frozen commission**: once frozen, `commission == frozen_amount` regardless of rule changes
//! 5. **Immutable close**: links, commission configuration and reference never change after close
//! 6. **Compliance**: close requires every required document verified or overridden with a reason
//!
//! Invariants 1-3 are enforced again by the store itself.

pub mod adapters;
pub mod audit;
pub mod commission;
pub mod compliance;
pub mod engine;
pub mod error;
pub mod financials;
pub mod immutability;
pub mod lease;
pub mod linkage;
pub mod state;
pub mod store;
pub mod types;


// Re-exports for convenience
pub use audit::{AuditEvent, AuditEventKind, IntegrityViolation, ViolationKind};
pub use compliance::{ComplianceGate, ComplianceOverride, ComplianceRegistry, DocumentRule};
pub use engine::{Collaborators, TransactionEngine};
pub use error::{CloseCheckFailure, TransactionError};
pub use state::TransactionState;
pub use store::{MemoryStore, PgStore, StoreError, TransactionStore};
pub use types::{
    Actor, CommissionRule, ComplianceContext, DocumentRef, DocumentState, FinancialSnapshot,
    Financials, LinkSlot, PostingState, TransactionId, TransactionRecord,
};
