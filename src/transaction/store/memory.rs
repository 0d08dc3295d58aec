//! In-memory transaction store
//!
//! Enforces the same constraints as the PostgreSQL schema. Used by tests and
//! by the binary when no database is configured.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;

use super::constraints;
use super::{StoreError, TransactionStore};
use crate::transaction::audit::AuditEvent;
use crate::transaction::state::TransactionState;
use crate::transaction::types::{DocumentRef, LinkSlot, TransactionId, TransactionRecord};

#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<TransactionId, TransactionRecord>,
    /// Reference index. Entries outlive deleted records so a reference is
    /// never handed out twice.
    references: DashMap<String, TransactionId>,
    claims: DashMap<(LinkSlot, DocumentRef), TransactionId>,
    events: DashMap<TransactionId, Vec<AuditEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Direct access to a stored chain, for corruption tests
    #[cfg(test)]
    pub(crate) fn with_events_mut<R>(
        &self,
        id: TransactionId,
        f: impl FnOnce(&mut Vec<AuditEvent>) -> R,
    ) -> Option<R> {
        self.events.get_mut(&id).map(|mut events| f(&mut events))
    }

    /// Make sure every document `record` links is claimed by it, inserting
    /// missing claims. On conflict, claims inserted by this call are removed.
    fn assert_claims(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let mut inserted = Vec::new();
        for (slot, doc_ref) in record.claimed_documents() {
            match self.claims.entry((slot, doc_ref.clone())) {
                Entry::Occupied(e) if *e.get() == record.id => {}
                Entry::Occupied(e) => {
                    let owner = *e.get();
                    drop(e);
                    for key in inserted {
                        self.claims.remove(&key);
                    }
                    return Err(StoreError::ClaimConflict {
                        slot,
                        doc_ref,
                        owner,
                    });
                }
                Entry::Vacant(e) => {
                    e.insert(record.id);
                    inserted.push((slot, doc_ref));
                }
            }
        }
        Ok(())
    }
}

fn check_margin_on_close(record: &TransactionRecord) -> Result<(), StoreError> {
    if record.state == TransactionState::Closed
        && record.financials.gross_margin < Decimal::ZERO
    {
        return Err(StoreError::Constraint {
            constraint: constraints::NON_NEGATIVE_MARGIN_ON_CLOSE,
            detail: format!(
                "{} closed with gross margin {}",
                record.reference, record.financials.gross_margin
            ),
        });
    }
    Ok(())
}

/// Numeric part of `reference` after `prefix`, if it is all digits
fn reference_number(reference: &str, prefix: &str) -> Option<u64> {
    let digits = reference.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        check_margin_on_close(record)?;
        if self.records.contains_key(&record.id) {
            return Err(StoreError::Constraint {
                constraint: constraints::UNIQUE_ID,
                detail: record.id.to_string(),
            });
        }

        match self.references.entry(record.reference.clone()) {
            Entry::Occupied(_) => {
                return Err(StoreError::Constraint {
                    constraint: constraints::UNIQUE_REFERENCE,
                    detail: record.reference.clone(),
                });
            }
            Entry::Vacant(e) => {
                e.insert(record.id);
            }
        }

        if let Err(e) = self.assert_claims(record) {
            self.references.remove(&record.reference);
            return Err(e);
        }
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: TransactionId) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn find_by_sale(
        &self,
        sale_ref: &str,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.sale_ref.as_deref() == Some(sale_ref))
            .min_by_key(|r| (r.created_at, r.id))
            .map(|r| r.clone()))
    }

    async fn list_by_state(
        &self,
        state: TransactionState,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.state == state)
            .map(|r| r.clone())
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn update_if_version(
        &self,
        record: &TransactionRecord,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let mut stored = self
            .records
            .get_mut(&record.id)
            .ok_or(StoreError::NotFound(record.id))?;

        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: record.id,
                expected: expected_version,
            });
        }
        check_margin_on_close(record)?;
        self.assert_claims(record)?;

        let mut next = record.clone();
        next.version = expected_version + 1;
        *stored = next;
        Ok(expected_version + 1)
    }

    async fn claim(
        &self,
        slot: LinkSlot,
        doc_ref: &DocumentRef,
        owner: TransactionId,
    ) -> Result<(), StoreError> {
        match self.claims.entry((slot, doc_ref.clone())) {
            Entry::Occupied(e) if *e.get() == owner => Ok(()),
            Entry::Occupied(e) => Err(StoreError::ClaimConflict {
                slot,
                doc_ref: doc_ref.clone(),
                owner: *e.get(),
            }),
            Entry::Vacant(e) => {
                e.insert(owner);
                Ok(())
            }
        }
    }

    async fn release(
        &self,
        slot: LinkSlot,
        doc_ref: &DocumentRef,
        owner: TransactionId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .claims
            .remove_if(&(slot, doc_ref.clone()), |_, holder| *holder == owner)
            .is_some())
    }

    async fn claim_owner(
        &self,
        slot: LinkSlot,
        doc_ref: &DocumentRef,
    ) -> Result<Option<TransactionId>, StoreError> {
        Ok(self.claims.get(&(slot, doc_ref.clone())).map(|o| *o))
    }

    async fn delete(&self, id: TransactionId) -> Result<(), StoreError> {
        let (_, record) = self.records.remove(&id).ok_or(StoreError::NotFound(id))?;
        for (slot, doc_ref) in record.claimed_documents() {
            self.claims.remove_if(&(slot, doc_ref), |_, holder| *holder == id);
        }
        Ok(())
    }

    async fn last_reference_number(&self, prefix: &str) -> Result<u64, StoreError> {
        Ok(self
            .references
            .iter()
            .filter_map(|entry| reference_number(entry.key(), prefix))
            .max()
            .unwrap_or(0))
    }

    async fn append_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let mut chain = self.events.entry(event.transaction_id).or_default();
        if event.seq != chain.len() as u64 {
            return Err(StoreError::Constraint {
                constraint: constraints::EVENT_SEQUENCE,
                detail: format!(
                    "{} expected seq {}, got {}",
                    event.transaction_id,
                    chain.len(),
                    event.seq
                ),
            });
        }
        chain.push(event.clone());
        Ok(())
    }

    async fn events(&self, id: TransactionId) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self
            .events
            .get(&id)
            .map(|chain| chain.clone())
            .unwrap_or_default())
    }
}
