//! Immutability Guard
//!
//! Once a transaction is closed its links, commission configuration and
//! reference are frozen. Every engine write passes through here twice: once
//! up front for the field it intends to touch, and once at commit time as a
//! before/after comparison of the whole protected set.

use std::fmt;

use super::error::TransactionError;
use super::state::TransactionState;
use super::types::TransactionRecord;

/// Fields that may not change after close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectedField {
    Reference,
    SaleRef,
    PurchaseRefs,
    LoadRef,
    SalesRep,
    CustomerInvoice,
    VendorBills,
    FreightBills,
    CommissionRule,
    CommissionOverride,
}

impl ProtectedField {
    pub const ALL: [ProtectedField; 10] = [
        ProtectedField::Reference,
        ProtectedField::SaleRef,
        ProtectedField::PurchaseRefs,
        ProtectedField::LoadRef,
        ProtectedField::SalesRep,
        ProtectedField::CustomerInvoice,
        ProtectedField::VendorBills,
        ProtectedField::FreightBills,
        ProtectedField::CommissionRule,
        ProtectedField::CommissionOverride,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtectedField::Reference => "reference",
            ProtectedField::SaleRef => "sale_ref",
            ProtectedField::PurchaseRefs => "purchase_refs",
            ProtectedField::LoadRef => "load_ref",
            ProtectedField::SalesRep => "sales_rep",
            ProtectedField::CustomerInvoice => "customer_invoice",
            ProtectedField::VendorBills => "vendor_bills",
            ProtectedField::FreightBills => "freight_bills",
            ProtectedField::CommissionRule => "commission_rule",
            ProtectedField::CommissionOverride => "commission_override",
        }
    }

    #[inline]
    pub fn is_commission(&self) -> bool {
        matches!(
            self,
            ProtectedField::CommissionRule | ProtectedField::CommissionOverride
        )
    }

    fn differs(&self, a: &TransactionRecord, b: &TransactionRecord) -> bool {
        match self {
            ProtectedField::Reference => a.reference != b.reference,
            ProtectedField::SaleRef => a.sale_ref != b.sale_ref,
            ProtectedField::PurchaseRefs => a.purchase_refs != b.purchase_refs,
            ProtectedField::LoadRef => a.load_ref != b.load_ref,
            ProtectedField::SalesRep => a.sales_rep != b.sales_rep,
            ProtectedField::CustomerInvoice => a.customer_invoice != b.customer_invoice,
            ProtectedField::VendorBills => a.vendor_bills != b.vendor_bills,
            ProtectedField::FreightBills => a.freight_bills != b.freight_bills,
            ProtectedField::CommissionRule => a.commission_rule != b.commission_rule,
            ProtectedField::CommissionOverride => {
                a.commission_override != b.commission_override
            }
        }
    }
}

impl fmt::Display for ProtectedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reject a write to `field` on `record`
pub fn check_write(record: &TransactionRecord, field: ProtectedField) -> Result<(), TransactionError> {
    if record.state.is_terminal() {
        return Err(TransactionError::Immutability(format!(
            "cannot modify {} of closed transaction {}",
            field, record.reference
        )));
    }
    if field.is_commission() && record.commission_frozen {
        return Err(TransactionError::Immutability(format!(
            "commission of {} is frozen",
            record.reference
        )));
    }
    Ok(())
}

/// Commit-time check: `after` must not differ from `before` in any protected
/// field when `before` is closed, and state may only move forward.
pub fn check_update(
    before: &TransactionRecord,
    after: &TransactionRecord,
) -> Result<(), TransactionError> {
    if before.state != after.state && !before.state.can_transition_to(after.state) {
        return Err(TransactionError::InvalidStateTransition {
            from: before.state,
            to: after.state,
        });
    }
    if before.commission_frozen
        && (!after.commission_frozen || after.frozen_amount != before.frozen_amount)
    {
        return Err(TransactionError::Immutability(format!(
            "frozen commission of {} cannot change",
            before.reference
        )));
    }
    if before.state.is_terminal()
        && let Some(field) = ProtectedField::ALL
            .into_iter()
            .find(|field| field.differs(before, after))
    {
        return Err(TransactionError::Immutability(format!(
            "cannot modify {} of closed transaction {}",
            field, before.reference
        )));
    }
    Ok(())
}

/// Deletion is allowed only for a draft that holds no accounting links
pub fn check_delete(record: &TransactionRecord) -> Result<(), TransactionError> {
    if record.state.is_terminal() {
        return Err(TransactionError::Immutability(format!(
            "cannot delete closed transaction {}",
            record.reference
        )));
    }
    if record.has_accounting_links() {
        return Err(TransactionError::Immutability(format!(
            "cannot delete {}: accounting documents are linked",
            record.reference
        )));
    }
    if record.state != TransactionState::Draft {
        return Err(TransactionError::Immutability(format!(
            "cannot delete {} in state {}",
            record.reference, record.state
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::types::TransactionId;
    use rust_decimal::Decimal;

    fn closed() -> TransactionRecord {
        let mut r = TransactionRecord::new(TransactionId::new(), "TX-000009".into(), None);
        r.customer_invoice = Some("INV-1".into());
        r.state = TransactionState::Closed;
        r.commission_frozen = true;
        r
    }

    #[test]
    fn test_closed_rejects_every_protected_write() {
        let record = closed();
        for field in ProtectedField::ALL {
            let err = check_write(&record, field).unwrap_err();
            assert_eq!(err.code(), "IMMUTABILITY_ERROR", "{}", field);
        }
    }

    #[test]
    fn test_open_record_accepts_writes() {
        let record = TransactionRecord::new(TransactionId::new(), "TX-1".into(), None);
        for field in ProtectedField::ALL {
            assert!(check_write(&record, field).is_ok());
        }
    }

    #[test]
    fn test_frozen_commission_rejects_commission_writes() {
        let mut record = TransactionRecord::new(TransactionId::new(), "TX-1".into(), None);
        record.state = TransactionState::Active;
        record.commission_frozen = true;
        assert!(check_write(&record, ProtectedField::CommissionRule).is_err());
        assert!(check_write(&record, ProtectedField::CommissionOverride).is_err());
        assert!(check_write(&record, ProtectedField::LoadRef).is_ok());
    }

    #[test]
    fn test_check_update_detects_protected_diff() {
        let before = closed();

        let mut after = before.clone();
        after.customer_invoice = Some("INV-2".into());
        assert!(check_update(&before, &after).is_err());

        let mut after = before.clone();
        after.frozen_amount = Decimal::from(5);
        assert!(check_update(&before, &after).is_err());

        let mut after = before.clone();
        after.state = TransactionState::Active;
        assert_eq!(
            check_update(&before, &after),
            Err(TransactionError::InvalidStateTransition {
                from: TransactionState::Closed,
                to: TransactionState::Active
            })
        );

        // Non-protected bookkeeping may still move
        let mut after = before.clone();
        after.updated_at = chrono::Utc::now();
        assert!(check_update(&before, &after).is_ok());
    }

    #[test]
    fn test_check_delete() {
        let draft = TransactionRecord::new(TransactionId::new(), "TX-1".into(), None);
        assert!(check_delete(&draft).is_ok());

        let mut linked = draft.clone();
        linked.freight_bills.push("FRT-1".into());
        assert!(check_delete(&linked).is_err());

        let mut active = draft.clone();
        active.state = TransactionState::Active;
        assert!(check_delete(&active).is_err());

        assert!(check_delete(&closed()).is_err());
    }
}
