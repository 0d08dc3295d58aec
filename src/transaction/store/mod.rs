//! Transaction Persistence
//!
//! The store is the last line of defense for the integrity invariants: it
//! enforces reference uniqueness, one owner per `(slot, doc_ref)` claim, and
//! `closed => gross_margin >= 0` on its own, independent of the checks the
//! engine performs first.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;

use super::audit::AuditEvent;
use super::state::TransactionState;
use super::types::{DocumentRef, LinkSlot, TransactionId, TransactionRecord};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unique or check constraint violated
    #[error("Constraint {constraint} violated: {detail}")]
    Constraint {
        constraint: &'static str,
        detail: String,
    },

    #[error("{slot} {doc_ref} is claimed by transaction {owner}")]
    ClaimConflict {
        slot: LinkSlot,
        doc_ref: DocumentRef,
        owner: TransactionId,
    },

    #[error("Version conflict on {id}: expected {expected}")]
    VersionConflict { id: TransactionId, expected: u64 },

    #[error("Transaction not found: {0}")]
    NotFound(TransactionId),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Database(format!("serialization: {}", e))
    }
}

/// Backing store for transaction records, document claims and audit events
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new record. Fails with `Constraint` on a reused reference.
    async fn insert(&self, record: &TransactionRecord) -> Result<(), StoreError>;

    async fn get(&self, id: TransactionId) -> Result<Option<TransactionRecord>, StoreError>;

    async fn find_by_sale(&self, sale_ref: &str)
    -> Result<Option<TransactionRecord>, StoreError>;

    async fn list_by_state(
        &self,
        state: TransactionState,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Compare-and-swap update. Succeeds only if the stored version equals
    /// `expected_version`; returns the new version. Every document the record
    /// links must be claimed by the record itself.
    async fn update_if_version(
        &self,
        record: &TransactionRecord,
        expected_version: u64,
    ) -> Result<u64, StoreError>;

    /// Claim `doc_ref` in `slot` for `owner`. Idempotent for the same owner,
    /// `ClaimConflict` for any other.
    async fn claim(
        &self,
        slot: LinkSlot,
        doc_ref: &DocumentRef,
        owner: TransactionId,
    ) -> Result<(), StoreError>;

    /// Undo a claim that was never committed to the owner's record
    async fn release(
        &self,
        slot: LinkSlot,
        doc_ref: &DocumentRef,
        owner: TransactionId,
    ) -> Result<bool, StoreError>;

    async fn claim_owner(
        &self,
        slot: LinkSlot,
        doc_ref: &DocumentRef,
    ) -> Result<Option<TransactionId>, StoreError>;

    async fn delete(&self, id: TransactionId) -> Result<(), StoreError>;

    /// Highest numeric suffix among references starting with `prefix`,
    /// deleted records included; 0 when none exist
    async fn last_reference_number(&self, prefix: &str) -> Result<u64, StoreError>;

    /// Append to the transaction's audit chain. `event.seq` must be the next
    /// position.
    async fn append_event(&self, event: &AuditEvent) -> Result<(), StoreError>;

    async fn events(&self, id: TransactionId) -> Result<Vec<AuditEvent>, StoreError>;
}

/// Constraint names shared by the stores
pub(crate) mod constraints {
    pub const UNIQUE_REFERENCE: &str = "unique_transaction_reference";
    pub const UNIQUE_ID: &str = "transactions_pkey";
    pub const NON_NEGATIVE_MARGIN_ON_CLOSE: &str = "non_negative_margin_on_close";
    pub const EVENT_SEQUENCE: &str = "transaction_events_pkey";
}
