//! In-process collaborator implementations
//!
//! Backed by `DashMap` for concurrent access. Used when the engine is
//! embedded without external systems, and throughout the test suites.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::info;

use super::{
    AccountingAdapter, AuthorizationAdapter, CommissionRuleSource, LogisticsAdapter,
    SequenceGenerator,
};
use crate::transaction::store::{StoreError, TransactionStore};
use crate::transaction::types::{
    Actor, CommissionRule, DocumentRef, DocumentState, PostingState,
};

/// Monotonic `PREFIX-000001` style references
pub struct AtomicSequence {
    prefix: String,
    padding: usize,
    next: AtomicU64,
}

impl AtomicSequence {
    pub fn new(prefix: impl Into<String>, padding: usize) -> Self {
        Self::starting_at(prefix, padding, 1)
    }

    /// Resume after `start - 1` references were already issued
    pub fn starting_at(prefix: impl Into<String>, padding: usize, start: u64) -> Self {
        Self {
            prefix: prefix.into(),
            padding,
            next: AtomicU64::new(start),
        }
    }

    /// Continue after the highest `prefix` reference `store` already holds
    pub async fn resume(
        store: &dyn TransactionStore,
        prefix: impl Into<String>,
        padding: usize,
    ) -> Result<Self, StoreError> {
        let prefix = prefix.into();
        let last = store.last_reference_number(&prefix).await?;
        info!(prefix = %prefix, last, "Reference sequence resumed");
        Ok(Self::starting_at(prefix, padding, last + 1))
    }

    /// Number of references handed out so far
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Acquire).saturating_sub(1)
    }
}

#[async_trait]
impl SequenceGenerator for AtomicSequence {
    async fn next_reference(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::AcqRel);
        format!("{}{:0width$}", self.prefix, n, width = self.padding)
    }
}

/// Load states keyed by load reference; unknown loads count as open
#[derive(Default)]
pub struct MemoryLogistics {
    closed: DashMap<String, bool>,
}

impl MemoryLogistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_closed(&self, load_ref: &str, closed: bool) {
        self.closed.insert(load_ref.to_string(), closed);
    }
}

#[async_trait]
impl LogisticsAdapter for MemoryLogistics {
    async fn is_load_closed(&self, load_ref: &str) -> bool {
        self.closed.get(load_ref).map(|c| *c).unwrap_or(false)
    }
}

/// Accounting documents keyed by reference
#[derive(Default)]
pub struct MemoryAccounting {
    documents: DashMap<DocumentRef, DocumentState>,
}

impl MemoryAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, doc_ref: impl Into<DocumentRef>, state: DocumentState) {
        self.documents.insert(doc_ref.into(), state);
    }

    pub fn put_posted(&self, doc_ref: &str, amount_total: Decimal) {
        self.put(doc_ref, DocumentState::posted(amount_total));
    }

    pub fn put_draft(&self, doc_ref: &str, amount_total: Decimal) {
        self.put(doc_ref, DocumentState::draft(amount_total));
    }

    /// Move a document to POSTED. Returns false for unknown documents.
    pub fn post(&self, doc_ref: &str) -> bool {
        match self.documents.get_mut(&DocumentRef::from(doc_ref)) {
            Some(mut doc) => {
                doc.posting_state = PostingState::Posted;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl AccountingAdapter for MemoryAccounting {
    async fn document_state(&self, doc_ref: &DocumentRef) -> Option<DocumentState> {
        self.documents.get(doc_ref).map(|doc| doc.clone())
    }
}

/// Role grants keyed by actor
#[derive(Default)]
pub struct MemoryAuthorization {
    grants: DashMap<Actor, HashSet<String>>,
}

impl MemoryAuthorization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, actor: &Actor, role: &str) {
        self.grants
            .entry(actor.clone())
            .or_default()
            .insert(role.to_string());
    }

    pub fn revoke(&self, actor: &Actor, role: &str) {
        if let Some(mut roles) = self.grants.get_mut(actor) {
            roles.remove(role);
        }
    }
}

#[async_trait]
impl AuthorizationAdapter for MemoryAuthorization {
    async fn has_role(&self, actor: &Actor, role: &str) -> bool {
        self.grants
            .get(actor)
            .map(|roles| roles.contains(role))
            .unwrap_or(false)
    }
}

/// Commission rules keyed by code
#[derive(Default)]
pub struct MemoryCommissionRules {
    rules: DashMap<String, CommissionRule>,
}

impl MemoryCommissionRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, rule: CommissionRule) {
        self.rules.insert(rule.code.clone(), rule);
    }
}

#[async_trait]
impl CommissionRuleSource for MemoryCommissionRules {
    async fn rule(&self, code: &str) -> Option<CommissionRule> {
        self.rules.get(code).map(|r| r.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_is_monotonic_and_padded() {
        let seq = AtomicSequence::new("TX-", 6);
        assert_eq!(seq.next_reference().await, "TX-000001");
        assert_eq!(seq.next_reference().await, "TX-000002");
        assert_eq!(seq.issued(), 2);

        let resumed = AtomicSequence::starting_at("TX-", 4, 42);
        assert_eq!(resumed.next_reference().await, "TX-0042");
    }

    #[tokio::test]
    async fn test_resume_continues_after_stored_references() {
        use crate::transaction::store::MemoryStore;
        use crate::transaction::types::{TransactionId, TransactionRecord};

        let store = MemoryStore::new();
        let fresh = AtomicSequence::resume(&store, "TX-", 6).await.unwrap();
        assert_eq!(fresh.next_reference().await, "TX-000001");

        for reference in ["TX-000001", "TX-000005"] {
            let record = TransactionRecord::new(TransactionId::new(), reference.into(), None);
            store.insert(&record).await.unwrap();
        }
        let resumed = AtomicSequence::resume(&store, "TX-", 6).await.unwrap();
        assert_eq!(resumed.next_reference().await, "TX-000006");
    }

    #[tokio::test]
    async fn test_sequence_unique_under_concurrency() {
        use std::sync::Arc;

        let seq = Arc::new(AtomicSequence::new("TX-", 6));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let seq = Arc::clone(&seq);
                tokio::spawn(async move { seq.next_reference().await })
            })
            .collect();

        let mut refs = HashSet::new();
        for handle in handles {
            assert!(refs.insert(handle.await.unwrap()));
        }
        assert_eq!(refs.len(), 32);
    }

    #[tokio::test]
    async fn test_accounting_post() {
        let accounting = MemoryAccounting::new();
        accounting.put_draft("BILL-1", Decimal::from(600));

        let doc = accounting.document_state(&"BILL-1".into()).await.unwrap();
        assert_eq!(doc.posting_state, PostingState::Draft);

        assert!(accounting.post("BILL-1"));
        assert!(!accounting.post("BILL-404"));
        let doc = accounting.document_state(&"BILL-1".into()).await.unwrap();
        assert!(doc.posting_state.is_posted());
        assert!(accounting.document_state(&"BILL-404".into()).await.is_none());
    }

    #[tokio::test]
    async fn test_authorization_grant_revoke() {
        let auth = MemoryAuthorization::new();
        let alice = Actor::from("alice");
        assert!(!auth.has_role(&alice, "transaction_manager").await);

        auth.grant(&alice, "transaction_manager");
        assert!(auth.has_role(&alice, "transaction_manager").await);

        auth.revoke(&alice, "transaction_manager");
        assert!(!auth.has_role(&alice, "transaction_manager").await);
    }

    #[tokio::test]
    async fn test_logistics_unknown_load_is_open() {
        let logistics = MemoryLogistics::new();
        assert!(!logistics.is_load_closed("LOAD-1").await);
        logistics.set_closed("LOAD-1", true);
        assert!(logistics.is_load_closed("LOAD-1").await);
    }
}
