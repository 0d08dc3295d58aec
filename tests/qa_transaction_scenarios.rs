use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use deal_ledger::config::EngineConfig;
use deal_ledger::transaction::adapters::{
    AccountingAdapter, AtomicSequence, MemoryAuthorization, MemoryCommissionRules,
    MemoryLogistics,
};
use deal_ledger::transaction::{
    Actor, CloseCheckFailure, Collaborators, CommissionRule, ComplianceRegistry, DocumentRef,
    DocumentState, MemoryStore, TransactionEngine, TransactionError, TransactionState,
};

/// Fixed ledger of accounting documents, as an external system would expose it
struct FixedLedger(HashMap<String, DocumentState>);

#[async_trait]
impl AccountingAdapter for FixedLedger {
    async fn document_state(&self, doc_ref: &DocumentRef) -> Option<DocumentState> {
        self.0.get(doc_ref.as_str()).cloned()
    }
}

/// Engine over a fixed ledger, a 10% rule "STD" and one authorized manager
fn build_engine(docs: &[(&str, DocumentState)]) -> TransactionEngine {
    let config = EngineConfig::default();
    let authorization = MemoryAuthorization::new();
    authorization.grant(&manager(), &config.manager_role);
    let rules = MemoryCommissionRules::new();
    rules.upsert(CommissionRule::new("STD", Decimal::new(1, 1)));

    let ledger = docs
        .iter()
        .map(|(doc, state)| (doc.to_string(), state.clone()))
        .collect();
    let collaborators = Collaborators {
        sequence: Arc::new(AtomicSequence::new("DL-", 4)),
        logistics: Arc::new(MemoryLogistics::new()),
        accounting: Arc::new(FixedLedger(ledger)),
        compliance: Arc::new(ComplianceRegistry::new()),
        authorization: Arc::new(authorization),
        commission_rules: Arc::new(rules),
    };
    TransactionEngine::new(Arc::new(MemoryStore::new()), collaborators, config)
}

fn manager() -> Actor {
    Actor::from("ops-manager")
}

fn dec(v: i64) -> Decimal {
    Decimal::from(v)
}

#[tokio::test]
async fn qa_tc_plain_close_nets_margin() {
    let engine = build_engine(&[
        ("INV-1", DocumentState::posted(dec(1000))),
        ("BILL-1", DocumentState::posted(dec(600))),
    ]);

    let tx = engine.on_sale_confirmed("SO-1").await.unwrap();
    assert_eq!(tx.reference, "DL-0001");
    engine.attach_invoice(tx.id, "INV-1").await.unwrap();
    engine.attach_vendor_bill(tx.id, "BILL-1").await.unwrap();

    let closed = engine.close(tx.id, &manager()).await.unwrap();
    assert_eq!(closed.state, TransactionState::Closed);
    assert_eq!(closed.financials.net_margin, dec(400));
    assert_eq!(closed.frozen_amount, Decimal::ZERO);
}

#[tokio::test]
async fn qa_tc_rule_commission_frozen_on_close() {
    let engine = build_engine(&[
        ("INV-1", DocumentState::posted(dec(1000))),
        ("BILL-1", DocumentState::posted(dec(600))),
    ]);
    let tx = engine.on_sale_confirmed("SO-1").await.unwrap();
    engine.attach_invoice(tx.id, "INV-1").await.unwrap();
    engine.attach_vendor_bill(tx.id, "BILL-1").await.unwrap();
    engine.set_commission_rule(tx.id, "STD").await.unwrap();

    let closed = engine.close(tx.id, &manager()).await.unwrap();
    assert_eq!(closed.frozen_amount, dec(40));
    assert_eq!(closed.financials.net_margin, dec(360));

    let snapshot = engine.financial_snapshot(tx.id).await.unwrap();
    assert!(snapshot.frozen);
    assert_eq!(snapshot.commission, dec(40));
}

#[tokio::test]
async fn qa_tc_draft_bill_rejects_close() {
    let engine = build_engine(&[
        ("INV-1", DocumentState::posted(dec(1000))),
        ("BILL-1", DocumentState::draft(dec(600))),
    ]);
    let tx = engine.on_sale_confirmed("SO-1").await.unwrap();
    engine.attach_invoice(tx.id, "INV-1").await.unwrap();
    engine.attach_vendor_bill(tx.id, "BILL-1").await.unwrap();

    let err = engine.close(tx.id, &manager()).await.unwrap_err();
    assert!(matches!(err, TransactionError::Precondition { .. }));
    assert_eq!(
        err.failures(),
        &[CloseCheckFailure::VendorBillNotPosted("BILL-1".into())]
    );
    assert_eq!(
        engine.get(tx.id).await.unwrap().state,
        TransactionState::Active
    );
}

#[tokio::test]
async fn qa_tc_negative_margin_rejects_close() {
    let engine = build_engine(&[
        ("INV-1", DocumentState::posted(dec(1000))),
        ("BILL-1", DocumentState::posted(dec(1050))),
    ]);
    let tx = engine.on_sale_confirmed("SO-1").await.unwrap();
    engine.attach_invoice(tx.id, "INV-1").await.unwrap();
    engine.attach_vendor_bill(tx.id, "BILL-1").await.unwrap();
    engine.set_commission_rule(tx.id, "STD").await.unwrap();

    let err = engine.close(tx.id, &manager()).await.unwrap_err();
    assert_eq!(
        err.failures(),
        &[CloseCheckFailure::NegativeGrossMargin(dec(-50))]
    );
    let record = engine.get(tx.id).await.unwrap();
    assert!(!record.commission_frozen);
    assert_eq!(record.state, TransactionState::Active);
}

#[tokio::test]
async fn qa_tc_closed_record_is_immutable() {
    let engine = build_engine(&[
        ("INV-1", DocumentState::posted(dec(1000))),
        ("INV-2", DocumentState::posted(dec(1200))),
        ("BILL-1", DocumentState::posted(dec(600))),
    ]);
    let tx = engine.on_sale_confirmed("SO-1").await.unwrap();
    engine.attach_invoice(tx.id, "INV-1").await.unwrap();
    engine.attach_vendor_bill(tx.id, "BILL-1").await.unwrap();
    engine.close(tx.id, &manager()).await.unwrap();

    let err = engine.attach_invoice(tx.id, "INV-2").await.unwrap_err();
    assert_eq!(err.code(), "IMMUTABILITY_ERROR");
    assert_eq!(err.http_status(), 422);

    let err = engine.delete(tx.id).await.unwrap_err();
    assert_eq!(err.code(), "IMMUTABILITY_ERROR");

    let err = engine.close(tx.id, &manager()).await.unwrap_err();
    assert_eq!(err, TransactionError::NotCloseable(TransactionState::Closed));

    assert!(engine.audit_integrity().await.unwrap().is_empty());
    assert_eq!(engine.verify_audit_chain(tx.id).await.unwrap(), 5);
}

#[tokio::test]
async fn qa_tc_invoice_owned_by_one_deal() {
    let engine = build_engine(&[("INV-1", DocumentState::posted(dec(1000)))]);
    let a = engine.on_sale_confirmed("SO-A").await.unwrap();
    let b = engine.on_sale_confirmed("SO-B").await.unwrap();

    engine.attach_invoice(a.id, "INV-1").await.unwrap();
    let err = engine.attach_invoice(b.id, "INV-1").await.unwrap_err();
    assert_eq!(err.code(), "LINKAGE_CONFLICT");
    assert!(engine.get(b.id).await.unwrap().customer_invoice.is_none());
}
