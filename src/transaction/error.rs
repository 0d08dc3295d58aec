//! Transaction Error Types

use std::fmt;

use thiserror::Error;

use crate::money::{Amount, MoneyError};

use super::state::TransactionState;
use super::store::StoreError;
use super::types::{Actor, DocumentRef, LinkSlot, TransactionId};

/// One unmet close-time business rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCheckFailure {
    InvoiceMissing,
    InvoiceNotPosted(DocumentRef),
    VendorBillNotPosted(DocumentRef),
    /// Accounting collaborator has no record of a linked document
    DocumentUnavailable(DocumentRef),
    LoadNotClosed(String),
    MissingDocuments(Vec<String>),
    Unauthorized { actor: Actor, role: String },
    NegativeGrossMargin(Amount),
    /// Assigned rule's percentage left the 0..=1 range after assignment
    InvalidCommissionRule { code: String, percentage: Amount },
}

impl CloseCheckFailure {
    pub fn code(&self) -> &'static str {
        match self {
            CloseCheckFailure::InvoiceMissing => "INVOICE_MISSING",
            CloseCheckFailure::InvoiceNotPosted(_) => "INVOICE_NOT_POSTED",
            CloseCheckFailure::VendorBillNotPosted(_) => "VENDOR_BILL_NOT_POSTED",
            CloseCheckFailure::DocumentUnavailable(_) => "DOCUMENT_UNAVAILABLE",
            CloseCheckFailure::LoadNotClosed(_) => "LOAD_NOT_CLOSED",
            CloseCheckFailure::MissingDocuments(_) => "MISSING_DOCUMENTS",
            CloseCheckFailure::Unauthorized { .. } => "UNAUTHORIZED",
            CloseCheckFailure::NegativeGrossMargin(_) => "NEGATIVE_GROSS_MARGIN",
            CloseCheckFailure::InvalidCommissionRule { .. } => "INVALID_COMMISSION_RULE",
        }
    }
}

impl fmt::Display for CloseCheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCheckFailure::InvoiceMissing => write!(f, "customer invoice missing"),
            CloseCheckFailure::InvoiceNotPosted(doc) => {
                write!(f, "customer invoice not posted: {}", doc)
            }
            CloseCheckFailure::VendorBillNotPosted(doc) => {
                write!(f, "vendor bill not posted: {}", doc)
            }
            CloseCheckFailure::DocumentUnavailable(doc) => {
                write!(f, "accounting document unavailable: {}", doc)
            }
            CloseCheckFailure::LoadNotClosed(load) => {
                write!(f, "logistics load not closed: {}", load)
            }
            CloseCheckFailure::MissingDocuments(tags) => {
                write!(f, "required documents missing: {}", tags.join(", "))
            }
            CloseCheckFailure::Unauthorized { actor, role } => {
                write!(f, "actor {} lacks role {}", actor, role)
            }
            CloseCheckFailure::NegativeGrossMargin(margin) => {
                write!(f, "negative gross margin: {}", margin)
            }
            CloseCheckFailure::InvalidCommissionRule { code, percentage } => {
                write!(f, "commission rule {} has invalid percentage {}", code, percentage)
            }
        }
    }
}

fn join_failures(failures: &[CloseCheckFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Transaction error types
///
/// Error codes are stable strings for API responses.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    // === Input ===
    #[error("Validation failed: {0}")]
    Validation(String),

    // === Linkage ===
    #[error("Linkage conflict on {slot} {doc_ref}: {detail}")]
    LinkageConflict {
        slot: LinkSlot,
        doc_ref: DocumentRef,
        detail: String,
    },

    // === Business rules ===
    #[error("Required documents missing: {}", .missing.join(", "))]
    Compliance { missing: Vec<String> },

    #[error("Close preconditions failed: {}", join_failures(.failures))]
    Precondition { failures: Vec<CloseCheckFailure> },

    #[error("Actor {actor} lacks role {role}")]
    Authorization { actor: Actor, role: String },

    #[error("Immutable: {0}")]
    Immutability(String),

    // === Lifecycle ===
    #[error("Transaction is not in a closeable state: {0}")]
    NotCloseable(TransactionState),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: TransactionState,
        to: TransactionState,
    },

    // === System ===
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    #[error("Transaction not found: {0}")]
    NotFound(TransactionId),

    #[error("Store error: {0}")]
    Store(String),

    /// Audit trail failed verification
    #[error("Integrity error: {0}")]
    Integrity(String),
}

impl TransactionError {
    pub fn code(&self) -> &'static str {
        match self {
            TransactionError::Validation(_) => "VALIDATION_ERROR",
            TransactionError::LinkageConflict { .. } => "LINKAGE_CONFLICT",
            TransactionError::Compliance { .. } => "COMPLIANCE_ERROR",
            TransactionError::Precondition { .. } => "PRECONDITION_ERROR",
            TransactionError::Authorization { .. } => "AUTHORIZATION_ERROR",
            TransactionError::Immutability(_) => "IMMUTABILITY_ERROR",
            TransactionError::NotCloseable(_) => "NOT_CLOSEABLE",
            TransactionError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            TransactionError::Concurrency(_) => "CONCURRENCY_ERROR",
            TransactionError::NotFound(_) => "TRANSACTION_NOT_FOUND",
            TransactionError::Store(_) => "STORE_ERROR",
            TransactionError::Integrity(_) => "INTEGRITY_ERROR",
        }
    }

    /// HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransactionError::Validation(_) => 400,
            TransactionError::Authorization { .. } => 403,
            TransactionError::NotFound(_) => 404,
            TransactionError::LinkageConflict { .. }
            | TransactionError::NotCloseable(_)
            | TransactionError::InvalidStateTransition { .. }
            | TransactionError::Concurrency(_) => 409,
            TransactionError::Compliance { .. }
            | TransactionError::Precondition { .. }
            | TransactionError::Immutability(_) => 422,
            TransactionError::Store(_) | TransactionError::Integrity(_) => 500,
        }
    }

    /// Failed close checks, when this is a precondition error
    pub fn failures(&self) -> &[CloseCheckFailure] {
        match self {
            TransactionError::Precondition { failures } => failures,
            _ => &[],
        }
    }
}

impl From<MoneyError> for TransactionError {
    fn from(e: MoneyError) -> Self {
        TransactionError::Validation(e.to_string())
    }
}

impl From<StoreError> for TransactionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ClaimConflict {
                slot,
                doc_ref,
                owner,
            } => TransactionError::LinkageConflict {
                slot,
                doc_ref,
                detail: format!("already claimed by transaction {}", owner),
            },
            StoreError::VersionConflict { id, expected } => TransactionError::Concurrency(
                format!("stale state for {} (expected version {})", id, expected),
            ),
            StoreError::NotFound(id) => TransactionError::NotFound(id),
            StoreError::Constraint { .. } | StoreError::Database(_) => {
                TransactionError::Store(e.to_string())
            }
        }
    }
}
