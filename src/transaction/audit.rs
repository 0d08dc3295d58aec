//! Audit Trail
//!
//! Append-only, per-transaction event list. Every event carries the hash of
//! its predecessor (`hash_prev`) and its own hash (`hash_self`, SHA-256 over
//! the canonical JSON of the event without `hash_self`), so a rewritten or
//! dropped event breaks the chain.
//!
//! Also home of the integrity sweep over closed transactions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::money::Amount;

use super::types::{Actor, DocumentRef, LinkSlot, TransactionId, TransactionRecord};

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventKind {
    Created {
        reference: String,
        sale_ref: Option<String>,
    },
    DocumentLinked {
        slot: LinkSlot,
        doc_ref: DocumentRef,
    },
    ReferenceLinked {
        field: String,
        value: String,
    },
    CommissionConfigured {
        rule: Option<String>,
        override_amount: Option<Amount>,
    },
    ComplianceOverridden {
        tag_code: String,
        reason: String,
        actor: Actor,
    },
    Activated,
    CloseRejected {
        actor: Actor,
        failures: Vec<String>,
    },
    Closed {
        actor: Actor,
        gross_margin: Amount,
        frozen_amount: Amount,
    },
    Deleted,
}

impl AuditEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            AuditEventKind::Created { .. } => "created",
            AuditEventKind::DocumentLinked { .. } => "document_linked",
            AuditEventKind::ReferenceLinked { .. } => "reference_linked",
            AuditEventKind::CommissionConfigured { .. } => "commission_configured",
            AuditEventKind::ComplianceOverridden { .. } => "compliance_overridden",
            AuditEventKind::Activated => "activated",
            AuditEventKind::CloseRejected { .. } => "close_rejected",
            AuditEventKind::Closed { .. } => "closed",
            AuditEventKind::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub transaction_id: TransactionId,
    /// Position in this transaction's chain, starting at 0
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: AuditEventKind,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

impl AuditEvent {
    /// Build the next event in a chain whose last element is `prev`
    pub fn chained(
        prev: Option<&AuditEvent>,
        transaction_id: TransactionId,
        kind: AuditEventKind,
        at: DateTime<Utc>,
    ) -> Self {
        let mut event = AuditEvent {
            transaction_id,
            seq: prev.map(|p| p.seq + 1).unwrap_or(0),
            at,
            kind,
            hash_prev: prev.and_then(|p| p.hash_self.clone()),
            hash_self: None,
        };
        event.hash_self = Some(compute_event_hash(&event));
        event
    }
}

/// Hash over canonical JSON of the event with `hash_self` cleared
pub fn compute_event_hash(event: &AuditEvent) -> String {
    let mut clone = event.clone();
    clone.hash_self = None;

    let canonical = canonical_json(&clone);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Sorted-key compact JSON
fn canonical_json<T: Serialize>(value: &T) -> String {
    // Serializing plain data with string keys cannot fail
    let raw = serde_json::to_value(value).unwrap_or(Value::Null);
    sort_keys(&raw).to_string()
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for k in keys {
                sorted.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditChainError {
    #[error("sequence gap at position {position}: found seq {found}")]
    SequenceGap { position: usize, found: u64 },

    #[error("hash_prev mismatch at seq {seq}")]
    PrevMismatch { seq: u64 },

    #[error("hash_self mismatch at seq {seq}")]
    SelfMismatch { seq: u64 },

    #[error("event at seq {seq} belongs to another transaction")]
    ForeignEvent { seq: u64 },
}

/// Verify an ordered chain of events for a single transaction
pub fn verify_chain(events: &[AuditEvent]) -> Result<(), AuditChainError> {
    let mut prev_hash: Option<String> = None;
    let owner = events.first().map(|e| e.transaction_id);

    for (position, event) in events.iter().enumerate() {
        if Some(event.transaction_id) != owner {
            return Err(AuditChainError::ForeignEvent { seq: event.seq });
        }
        if event.seq != position as u64 {
            return Err(AuditChainError::SequenceGap {
                position,
                found: event.seq,
            });
        }
        if event.hash_prev != prev_hash {
            return Err(AuditChainError::PrevMismatch { seq: event.seq });
        }
        let expected = compute_event_hash(event);
        if event.hash_self.as_deref() != Some(expected.as_str()) {
            return Err(AuditChainError::SelfMismatch { seq: event.seq });
        }
        prev_hash = event.hash_self.clone();
    }
    Ok(())
}

// ============================================================================
// Integrity sweep
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    NegativeGrossMargin { gross_margin: Amount },
    CommissionNotFrozen,
    CommissionDrift { stored: Amount, frozen: Amount },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityViolation {
    pub transaction_id: TransactionId,
    pub reference: String,
    pub violation: ViolationKind,
}

/// Check closed records against the close-time invariants
pub fn audit_closed(records: &[TransactionRecord]) -> Vec<IntegrityViolation> {
    let mut violations = Vec::new();
    for record in records.iter().filter(|r| r.state.is_terminal()) {
        let mut push = |violation| {
            violations.push(IntegrityViolation {
                transaction_id: record.id,
                reference: record.reference.clone(),
                violation,
            })
        };

        if record.financials.gross_margin < Decimal::ZERO {
            push(ViolationKind::NegativeGrossMargin {
                gross_margin: record.financials.gross_margin,
            });
        }
        if !record.commission_frozen {
            push(ViolationKind::CommissionNotFrozen);
        } else if record.financials.commission != record.frozen_amount {
            push(ViolationKind::CommissionDrift {
                stored: record.financials.commission,
                frozen: record.frozen_amount,
            });
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::state::TransactionState;

    fn build_chain(id: TransactionId) -> Vec<AuditEvent> {
        let now = Utc::now();
        let e0 = AuditEvent::chained(
            None,
            id,
            AuditEventKind::Created {
                reference: "TX-000001".into(),
                sale_ref: Some("SO-1".into()),
            },
            now,
        );
        let e1 = AuditEvent::chained(
            Some(&e0),
            id,
            AuditEventKind::DocumentLinked {
                slot: LinkSlot::Invoice,
                doc_ref: "INV-1".into(),
            },
            now,
        );
        let e2 = AuditEvent::chained(Some(&e1), id, AuditEventKind::Activated, now);
        vec![e0, e1, e2]
    }

    #[test]
    fn test_chain_links() {
        let events = build_chain(TransactionId::new());
        assert_eq!(events[0].seq, 0);
        assert!(events[0].hash_prev.is_none());
        assert_eq!(events[1].hash_prev, events[0].hash_self);
        assert_eq!(events[2].seq, 2);
        assert!(verify_chain(&events).is_ok());
    }

    #[test]
    fn test_tampered_event_breaks_chain() {
        let mut events = build_chain(TransactionId::new());
        events[1].kind = AuditEventKind::DocumentLinked {
            slot: LinkSlot::Invoice,
            doc_ref: "INV-FORGED".into(),
        };
        assert_eq!(
            verify_chain(&events),
            Err(AuditChainError::SelfMismatch { seq: 1 })
        );
    }

    #[test]
    fn test_dropped_event_breaks_chain() {
        let mut events = build_chain(TransactionId::new());
        events.remove(1);
        assert_eq!(
            verify_chain(&events),
            Err(AuditChainError::SequenceGap {
                position: 1,
                found: 2
            })
        );
    }

    #[test]
    fn test_empty_chain_is_valid() {
        assert!(verify_chain(&[]).is_ok());
    }

    #[test]
    fn test_audit_closed_flags_violations() {
        let mut healthy = TransactionRecord::new(TransactionId::new(), "TX-1".into(), None);
        healthy.state = TransactionState::Closed;
        healthy.commission_frozen = true;
        healthy.financials.gross_margin = Decimal::from(400);

        let mut negative = healthy.clone();
        negative.id = TransactionId::new();
        negative.reference = "TX-2".into();
        negative.financials.gross_margin = Decimal::from(-5);

        let mut unfrozen = healthy.clone();
        unfrozen.id = TransactionId::new();
        unfrozen.reference = "TX-3".into();
        unfrozen.commission_frozen = false;

        let mut drifted = healthy.clone();
        drifted.id = TransactionId::new();
        drifted.reference = "TX-4".into();
        drifted.financials.commission = Decimal::from(12);

        let mut open = negative.clone();
        open.id = TransactionId::new();
        open.state = TransactionState::Active;

        let violations = audit_closed(&[healthy, negative, unfrozen, drifted, open]);
        let refs: Vec<_> = violations.iter().map(|v| v.reference.as_str()).collect();
        assert_eq!(refs, vec!["TX-2", "TX-3", "TX-4"]);
        assert_eq!(
            violations[0].violation,
            ViolationKind::NegativeGrossMargin {
                gross_margin: Decimal::from(-5)
            }
        );
        assert_eq!(violations[1].violation, ViolationKind::CommissionNotFrozen);
    }
}
