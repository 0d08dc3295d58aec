//! Collaborator Adapters
//!
//! Interfaces to the systems the engine consumes but does not own: reference
//! sequencing, logistics, accounting, compliance rules, authorization and
//! commission rules. The engine holds each as `Arc<dyn Trait>`.
//!
//! Implementations must be cheap and local: several of these are called while
//! the per-transaction lease is held during close.

pub mod memory;

pub use memory::{
    AtomicSequence, MemoryAccounting, MemoryAuthorization, MemoryCommissionRules, MemoryLogistics,
};

use async_trait::async_trait;

use super::compliance::ComplianceOverride;
use super::error::TransactionError;
use super::types::{Actor, CommissionRule, ComplianceContext, DocumentRef, DocumentState};

/// Human-readable reference generator
///
/// Called once per creation. A value is never handed out twice, even when the
/// creation that consumed it fails.
#[async_trait]
pub trait SequenceGenerator: Send + Sync {
    async fn next_reference(&self) -> String;
}

/// Logistics collaborator (load state machine lives elsewhere)
#[async_trait]
pub trait LogisticsAdapter: Send + Sync {
    async fn is_load_closed(&self, load_ref: &str) -> bool;
}

/// Accounting collaborator
#[async_trait]
pub trait AccountingAdapter: Send + Sync {
    /// `None` when the document is unknown to accounting
    async fn document_state(&self, doc_ref: &DocumentRef) -> Option<DocumentState>;
}

/// Compliance rule store
#[async_trait]
pub trait ComplianceSource: Send + Sync {
    /// Rule codes with no verified or overridden document for `context`
    async fn missing_compliance(&self, context: &ComplianceContext) -> Vec<String>;

    /// Persist an override for `tag_code`. Reason and actor are validated by
    /// the caller.
    async fn record_override(
        &self,
        _context: &ComplianceContext,
        _tag_code: &str,
        _record: ComplianceOverride,
    ) -> Result<(), TransactionError> {
        Err(TransactionError::Validation(
            "compliance source does not accept overrides".into(),
        ))
    }
}

/// Authorization collaborator
#[async_trait]
pub trait AuthorizationAdapter: Send + Sync {
    async fn has_role(&self, actor: &Actor, role: &str) -> bool;
}

/// Commission rule lookup
#[async_trait]
pub trait CommissionRuleSource: Send + Sync {
    async fn rule(&self, code: &str) -> Option<CommissionRule>;
}
