//! Linkage Guard
//!
//! Exclusive ownership of accounting documents. A document is claimed per
//! slot category by at most one transaction, ever; the customer invoice slot
//! is additionally write-once per transaction.
//!
//! The application check and the claim write run under a lease on the
//! `(slot, doc_ref)` pair. The store's own uniqueness constraint backs this up
//! for writers that bypass the guard.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::error::TransactionError;
use super::lease::LeaseManager;
use super::store::TransactionStore;
use super::types::{DocumentRef, LinkSlot, TransactionId, TransactionRecord};

/// Result of a successful claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Newly claimed; the caller must commit the link or release the claim
    Claimed,
    /// The record already holds this document in this slot
    AlreadyHeld,
}

pub struct LinkageGuard {
    store: Arc<dyn TransactionStore>,
    leases: LeaseManager<(LinkSlot, DocumentRef)>,
}

impl LinkageGuard {
    pub fn new(store: Arc<dyn TransactionStore>, lease_timeout: Duration) -> Self {
        Self {
            store,
            leases: LeaseManager::new(lease_timeout),
        }
    }

    /// Claim `doc_ref` in `slot` for `record`
    ///
    /// # Errors
    /// * `LinkageConflict` - invoice already set on `record`, or the document
    ///   is owned by another transaction
    /// * `Concurrency` - document lease not acquired in time
    pub async fn claim(
        &self,
        record: &TransactionRecord,
        slot: LinkSlot,
        doc_ref: &DocumentRef,
    ) -> Result<ClaimOutcome, TransactionError> {
        if slot == LinkSlot::Invoice
            && let Some(current) = &record.customer_invoice
        {
            return Err(TransactionError::LinkageConflict {
                slot,
                doc_ref: doc_ref.clone(),
                detail: format!(
                    "{} already has customer invoice {} (write-once)",
                    record.reference, current
                ),
            });
        }
        if record.holds(slot, doc_ref) {
            return Ok(ClaimOutcome::AlreadyHeld);
        }

        let key = (slot, doc_ref.clone());
        let _lease = self.leases.acquire(&key).await?;

        if let Some(owner) = self.store.claim_owner(slot, doc_ref).await?
            && owner != record.id
        {
            warn!(
                transaction_id = %record.id,
                owner = %owner,
                slot = %slot,
                doc_ref = %doc_ref,
                "Linkage conflict"
            );
            return Err(TransactionError::LinkageConflict {
                slot,
                doc_ref: doc_ref.clone(),
                detail: format!("already claimed by transaction {}", owner),
            });
        }

        self.store.claim(slot, doc_ref, record.id).await?;
        debug!(transaction_id = %record.id, slot = %slot, doc_ref = %doc_ref, "Document claimed");
        Ok(ClaimOutcome::Claimed)
    }

    /// Give back a claim whose link was never committed
    pub async fn release(
        &self,
        owner: TransactionId,
        slot: LinkSlot,
        doc_ref: &DocumentRef,
    ) -> Result<bool, TransactionError> {
        let key = (slot, doc_ref.clone());
        let _lease = self.leases.acquire(&key).await?;
        let released = self.store.release(slot, doc_ref, owner).await?;
        if released {
            debug!(transaction_id = %owner, slot = %slot, doc_ref = %doc_ref, "Claim released");
        }
        Ok(released)
    }

    /// Current owner of `doc_ref` in `slot`
    pub async fn owner(
        &self,
        slot: LinkSlot,
        doc_ref: &DocumentRef,
    ) -> Result<Option<TransactionId>, TransactionError> {
        Ok(self.store.claim_owner(slot, doc_ref).await?)
    }

    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }
}
