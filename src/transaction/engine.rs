//! Transaction Engine
//!
//! Drives the DRAFT -> ACTIVE -> CLOSED lifecycle. Every mutating operation
//! runs under the per-transaction lease: load, guard, mutate, recompute,
//! CAS-commit, append audit event. Document claims take the document lease
//! inside the transaction lease, never the other way round. The sale lease,
//! when taken, comes before both.
//!
//! Audit events are written after the record change has committed. A failed
//! event write is logged at error level and does not undo or fail the
//! operation; the committed record is what the caller gets back.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::money::{Amount, validate_non_negative, validate_percentage};

use super::adapters::{
    AccountingAdapter, AuthorizationAdapter, CommissionRuleSource, ComplianceSource,
    LogisticsAdapter, SequenceGenerator,
};
use super::audit::{self, AuditEvent, AuditEventKind, IntegrityViolation};
use super::commission;
use super::compliance::{ComplianceGate, ComplianceOverride};
use super::error::{CloseCheckFailure, TransactionError};
use super::financials::{self, LinkAmounts};
use super::immutability::{self, ProtectedField};
use super::lease::LeaseManager;
use super::linkage::{ClaimOutcome, LinkageGuard};
use super::state::TransactionState;
use super::store::{StoreError, TransactionStore, constraints};
use super::types::{
    Actor, CommissionRule, ComplianceContext, DocumentRef, DocumentState, FinancialSnapshot,
    Financials, LinkSlot, TransactionId, TransactionRecord,
};

/// Draws per create before a taken reference is reported as an error
const REFERENCE_ATTEMPTS: u32 = 8;

/// External systems the engine consumes
#[derive(Clone)]
pub struct Collaborators {
    pub sequence: Arc<dyn SequenceGenerator>,
    pub logistics: Arc<dyn LogisticsAdapter>,
    pub accounting: Arc<dyn AccountingAdapter>,
    pub compliance: Arc<dyn ComplianceSource>,
    pub authorization: Arc<dyn AuthorizationAdapter>,
    pub commission_rules: Arc<dyn CommissionRuleSource>,
}

/// Everything close-time validation learned about a record
struct CloseEvaluation {
    failures: Vec<CloseCheckFailure>,
    financials: Financials,
    rule: Option<CommissionRule>,
}

pub struct TransactionEngine {
    store: Arc<dyn TransactionStore>,
    sequence: Arc<dyn SequenceGenerator>,
    logistics: Arc<dyn LogisticsAdapter>,
    accounting: Arc<dyn AccountingAdapter>,
    authorization: Arc<dyn AuthorizationAdapter>,
    commission_rules: Arc<dyn CommissionRuleSource>,
    compliance: ComplianceGate,
    linkage: LinkageGuard,
    leases: LeaseManager<TransactionId>,
    /// Serializes sale-confirmation hooks per sale
    sale_leases: LeaseManager<String>,
    config: EngineConfig,
}

impl TransactionEngine {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> Self {
        let timeout = config.lease_timeout();
        Self {
            linkage: LinkageGuard::new(Arc::clone(&store), timeout),
            store,
            sequence: collaborators.sequence,
            logistics: collaborators.logistics,
            accounting: collaborators.accounting,
            authorization: collaborators.authorization,
            commission_rules: collaborators.commission_rules,
            compliance: ComplianceGate::new(collaborators.compliance),
            leases: LeaseManager::new(timeout),
            sale_leases: LeaseManager::new(timeout),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    /// Transaction, sale and document leases currently held or awaited
    pub fn lease_count(&self) -> usize {
        self.leases.len() + self.sale_leases.len() + self.linkage.lease_count()
    }

    // ========================================================================
    // Creation & lifecycle
    // ========================================================================

    /// Create a DRAFT transaction with a freshly assigned reference. A sale
    /// gets at most one transaction; a second create for it is rejected.
    pub async fn create(&self, sale_ref: Option<&str>) -> Result<TransactionRecord, TransactionError> {
        let Some(sale_ref) = sale_ref.map(|s| non_empty("sale_ref", s)).transpose()? else {
            return self.create_locked(None).await;
        };

        let _sale_lease = self.sale_leases.acquire(&sale_ref).await?;
        if let Some(existing) = self.store.find_by_sale(&sale_ref).await? {
            warn!(sale_ref = %sale_ref, reference = %existing.reference, "Create rejected: sale already tracked");
            return Err(TransactionError::Validation(format!(
                "sale {} already has transaction {}",
                sale_ref, existing.reference
            )));
        }
        self.create_locked(Some(sale_ref)).await
    }

    /// Caller holds the sale lease when `sale_ref` is set
    async fn create_locked(
        &self,
        sale_ref: Option<String>,
    ) -> Result<TransactionRecord, TransactionError> {
        // Another instance sharing the store may have issued the same number
        let mut attempt = 1;
        let record = loop {
            let reference = self.sequence.next_reference().await;
            if reference.trim().is_empty() {
                return Err(TransactionError::Store(
                    "sequence generator returned an empty reference".into(),
                ));
            }

            let record = TransactionRecord::new(TransactionId::new(), reference, sale_ref.clone());
            match self.store.insert(&record).await {
                Ok(()) => break record,
                Err(StoreError::Constraint {
                    constraint: constraints::UNIQUE_REFERENCE,
                    ..
                }) if attempt < REFERENCE_ATTEMPTS => {
                    warn!(reference = %record.reference, attempt, "Reference already taken");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };
        self.record_event(
            record.id,
            AuditEventKind::Created {
                reference: record.reference.clone(),
                sale_ref: record.sale_ref.clone(),
            },
        )
        .await;

        info!(
            transaction_id = %record.id,
            reference = %record.reference,
            sale_ref = ?record.sale_ref,
            "Transaction created"
        );
        Ok(record)
    }

    /// DRAFT -> ACTIVE
    pub async fn activate(&self, id: TransactionId) -> Result<TransactionRecord, TransactionError> {
        let _lease = self.leases.acquire(&id).await?;
        self.activate_locked(id).await
    }

    async fn activate_locked(&self, id: TransactionId) -> Result<TransactionRecord, TransactionError> {
        let record = self.load(id).await?;
        if !record.state.can_transition_to(TransactionState::Active) {
            return Err(TransactionError::InvalidStateTransition {
                from: record.state,
                to: TransactionState::Active,
            });
        }

        let mut next = record.clone();
        next.state = TransactionState::Active;
        let next = self.commit(&record, next).await?;
        self.record_event(id, AuditEventKind::Activated).await;

        info!(transaction_id = %id, reference = %next.reference, "Transaction activated");
        Ok(next)
    }

    /// ACTIVE -> CLOSED
    ///
    /// Holds the transaction lease for the whole check-then-commit. Every
    /// failed check is collected into one `Precondition` error and nothing is
    /// written to the record. On success the commission is frozen in the same
    /// commit that sets CLOSED.
    pub async fn close(
        &self,
        id: TransactionId,
        actor: &Actor,
    ) -> Result<TransactionRecord, TransactionError> {
        let _lease = self.leases.acquire(&id).await?;

        let record = self.load(id).await?;
        if record.state != TransactionState::Active {
            warn!(transaction_id = %id, state = %record.state, "Close rejected: not closeable");
            return Err(TransactionError::NotCloseable(record.state));
        }

        let evaluation = self.evaluate_close(&record, actor).await;
        if !evaluation.failures.is_empty() {
            warn!(
                transaction_id = %id,
                reference = %record.reference,
                actor = %actor,
                failures = evaluation.failures.len(),
                "Close rejected: preconditions failed"
            );
            self.record_event(
                id,
                AuditEventKind::CloseRejected {
                    actor: actor.clone(),
                    failures: evaluation
                        .failures
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                },
            )
            .await;
            return Err(TransactionError::Precondition {
                failures: evaluation.failures,
            });
        }

        let now = Utc::now();
        let mut next = record.clone();
        next.financials = evaluation.financials;
        commission::freeze(&mut next, evaluation.rule.as_ref(), now);
        next.state = TransactionState::Closed;
        let next = self.commit(&record, next).await?;

        self.record_event(
            id,
            AuditEventKind::Closed {
                actor: actor.clone(),
                gross_margin: next.financials.gross_margin,
                frozen_amount: next.frozen_amount,
            },
        )
        .await;

        info!(
            transaction_id = %id,
            reference = %next.reference,
            actor = %actor,
            gross_margin = %next.financials.gross_margin,
            commission = %next.frozen_amount,
            net_margin = %next.financials.net_margin,
            "Transaction closed"
        );
        Ok(next)
    }

    /// Run the close checks without the lease and without writing anything.
    /// The answer may be stale by the time `close` runs.
    pub async fn close_readiness(
        &self,
        id: TransactionId,
        actor: &Actor,
    ) -> Result<Vec<CloseCheckFailure>, TransactionError> {
        let record = self.load(id).await?;
        if record.state != TransactionState::Active {
            return Err(TransactionError::NotCloseable(record.state));
        }
        Ok(self.evaluate_close(&record, actor).await.failures)
    }

    /// Delete a DRAFT transaction that holds no accounting links. The
    /// reference stays consumed.
    pub async fn delete(&self, id: TransactionId) -> Result<(), TransactionError> {
        let _lease = self.leases.acquire(&id).await?;
        let record = self.load(id).await?;
        immutability::check_delete(&record)?;

        self.store.delete(id).await?;
        self.record_event(id, AuditEventKind::Deleted).await;
        info!(transaction_id = %id, reference = %record.reference, "Transaction deleted");
        Ok(())
    }

    // ========================================================================
    // Links
    // ========================================================================

    pub async fn attach_invoice(
        &self,
        id: TransactionId,
        invoice_ref: &str,
    ) -> Result<TransactionRecord, TransactionError> {
        self.attach(id, LinkSlot::Invoice, invoice_ref).await
    }

    pub async fn attach_vendor_bill(
        &self,
        id: TransactionId,
        bill_ref: &str,
    ) -> Result<TransactionRecord, TransactionError> {
        self.attach(id, LinkSlot::VendorBill, bill_ref).await
    }

    pub async fn attach_freight_bill(
        &self,
        id: TransactionId,
        bill_ref: &str,
    ) -> Result<TransactionRecord, TransactionError> {
        self.attach(id, LinkSlot::FreightBill, bill_ref).await
    }

    /// Claim a document and link it. Re-attaching a vendor or freight bill the
    /// record already holds is a no-op; the invoice slot is write-once.
    pub async fn attach(
        &self,
        id: TransactionId,
        slot: LinkSlot,
        doc_ref: &str,
    ) -> Result<TransactionRecord, TransactionError> {
        let doc_ref = DocumentRef::new(non_empty("doc_ref", doc_ref)?);

        let _lease = self.leases.acquire(&id).await?;
        let record = self.load(id).await?;
        immutability::check_write(&record, slot_field(slot))?;

        if self.accounting.document_state(&doc_ref).await.is_none() {
            return Err(TransactionError::Validation(format!(
                "unknown accounting document {}",
                doc_ref
            )));
        }

        match self.linkage.claim(&record, slot, &doc_ref).await? {
            ClaimOutcome::AlreadyHeld => return Ok(record),
            ClaimOutcome::Claimed => {}
        }

        let mut next = record.clone();
        match slot {
            LinkSlot::Invoice => next.customer_invoice = Some(doc_ref.clone()),
            LinkSlot::VendorBill => next.vendor_bills.push(doc_ref.clone()),
            LinkSlot::FreightBill => next.freight_bills.push(doc_ref.clone()),
        }
        self.refresh_financials(&mut next).await;

        let next = match self.commit(&record, next).await {
            Ok(next) => next,
            Err(e) => {
                if let Err(release_err) = self.linkage.release(id, slot, &doc_ref).await {
                    error!(
                        transaction_id = %id,
                        doc_ref = %doc_ref,
                        error = %release_err,
                        "Failed to release claim after aborted link"
                    );
                }
                return Err(e);
            }
        };

        self.record_event(
            id,
            AuditEventKind::DocumentLinked {
                slot,
                doc_ref: doc_ref.clone(),
            },
        )
        .await;
        info!(
            transaction_id = %id,
            slot = %slot,
            doc_ref = %doc_ref,
            gross_margin = %next.financials.gross_margin,
            "Document linked"
        );
        Ok(next)
    }

    pub async fn set_load(
        &self,
        id: TransactionId,
        load_ref: &str,
    ) -> Result<TransactionRecord, TransactionError> {
        let load_ref = non_empty("load_ref", load_ref)?;
        self.update_reference(id, ProtectedField::LoadRef, load_ref, |record, value| {
            if record.load_ref.as_deref() == Some(value) {
                return false;
            }
            record.load_ref = Some(value.to_string());
            true
        })
        .await
    }

    pub async fn add_purchase(
        &self,
        id: TransactionId,
        purchase_ref: &str,
    ) -> Result<TransactionRecord, TransactionError> {
        let purchase_ref = non_empty("purchase_ref", purchase_ref)?;
        self.update_reference(id, ProtectedField::PurchaseRefs, purchase_ref, |record, value| {
            if record.purchase_refs.iter().any(|p| p == value) {
                return false;
            }
            record.purchase_refs.push(value.to_string());
            true
        })
        .await
    }

    pub async fn set_sales_rep(
        &self,
        id: TransactionId,
        sales_rep: &Actor,
    ) -> Result<TransactionRecord, TransactionError> {
        let rep = non_empty("sales_rep", sales_rep.as_str())?;
        self.update_reference(id, ProtectedField::SalesRep, rep, |record, value| {
            if record.sales_rep.as_ref().map(Actor::as_str) == Some(value) {
                return false;
            }
            record.sales_rep = Some(Actor::new(value));
            true
        })
        .await
    }

    /// Shared path for plain reference links. `apply` returns false when the
    /// record already carries the value.
    async fn update_reference<F>(
        &self,
        id: TransactionId,
        field: ProtectedField,
        value: String,
        apply: F,
    ) -> Result<TransactionRecord, TransactionError>
    where
        F: FnOnce(&mut TransactionRecord, &str) -> bool + Send,
    {
        let _lease = self.leases.acquire(&id).await?;
        let record = self.load(id).await?;
        immutability::check_write(&record, field)?;

        let mut next = record.clone();
        if !apply(&mut next, &value) {
            return Ok(record);
        }
        let next = self.commit(&record, next).await?;

        self.record_event(
            id,
            AuditEventKind::ReferenceLinked {
                field: field.as_str().to_string(),
                value: value.clone(),
            },
        )
        .await;
        info!(transaction_id = %id, field = %field, value = %value, "Reference linked");
        Ok(next)
    }

    // ========================================================================
    // Commission
    // ========================================================================

    /// Assign an active commission rule
    pub async fn set_commission_rule(
        &self,
        id: TransactionId,
        rule_code: &str,
    ) -> Result<TransactionRecord, TransactionError> {
        let rule_code = non_empty("rule_code", rule_code)?;

        let _lease = self.leases.acquire(&id).await?;
        let record = self.load(id).await?;
        immutability::check_write(&record, ProtectedField::CommissionRule)?;

        match self.commission_rules.rule(&rule_code).await {
            Some(rule) if rule.active => {
                validate_percentage(rule.percentage).map_err(|e| {
                    TransactionError::Validation(format!("commission rule {}: {}", rule_code, e))
                })?;
            }
            Some(_) => {
                return Err(TransactionError::Validation(format!(
                    "commission rule {} is inactive",
                    rule_code
                )));
            }
            None => {
                return Err(TransactionError::Validation(format!(
                    "unknown commission rule {}",
                    rule_code
                )));
            }
        }

        let mut next = record.clone();
        next.commission_rule = Some(rule_code);
        self.commit_commission(record, next).await
    }

    /// Set or clear the flat override. `Some(0)` is an explicit zero; `None`
    /// falls back to the rule.
    pub async fn set_commission_override(
        &self,
        id: TransactionId,
        amount: Option<Amount>,
    ) -> Result<TransactionRecord, TransactionError> {
        let amount = amount.map(validate_non_negative).transpose()?;

        let _lease = self.leases.acquire(&id).await?;
        let record = self.load(id).await?;
        immutability::check_write(&record, ProtectedField::CommissionOverride)?;

        let mut next = record.clone();
        next.commission_override = amount;
        self.commit_commission(record, next).await
    }

    async fn commit_commission(
        &self,
        record: TransactionRecord,
        mut next: TransactionRecord,
    ) -> Result<TransactionRecord, TransactionError> {
        self.refresh_financials(&mut next).await;
        let next = self.commit(&record, next).await?;

        self.record_event(
            next.id,
            AuditEventKind::CommissionConfigured {
                rule: next.commission_rule.clone(),
                override_amount: next.commission_override,
            },
        )
        .await;
        info!(
            transaction_id = %next.id,
            rule = ?next.commission_rule,
            override_amount = ?next.commission_override,
            commission = %next.financials.commission,
            "Commission configured"
        );
        Ok(next)
    }

    // ========================================================================
    // Compliance
    // ========================================================================

    /// Record an explicit exception to a document requirement
    pub async fn record_compliance_override(
        &self,
        id: TransactionId,
        tag_code: &str,
        reason: &str,
        actor: &Actor,
    ) -> Result<(), TransactionError> {
        let tag_code = non_empty("tag_code", tag_code)?;
        let reason = non_empty("reason", reason)?;

        let role = &self.config.compliance_override_role;
        if !self.authorization.has_role(actor, role).await {
            warn!(transaction_id = %id, actor = %actor, "Compliance override refused");
            return Err(TransactionError::Authorization {
                actor: actor.clone(),
                role: role.clone(),
            });
        }

        let _lease = self.leases.acquire(&id).await?;
        let record = self.load(id).await?;
        if record.state.is_terminal() {
            return Err(TransactionError::Immutability(format!(
                "cannot override compliance of closed transaction {}",
                record.reference
            )));
        }

        let context = ComplianceContext::transaction(id);
        let override_record = ComplianceOverride {
            reason: reason.clone(),
            actor: actor.clone(),
            at: Utc::now(),
        };
        self.compliance
            .source()
            .record_override(&context, &tag_code, override_record)
            .await?;

        self.record_event(
            id,
            AuditEventKind::ComplianceOverridden {
                tag_code: tag_code.clone(),
                reason,
                actor: actor.clone(),
            },
        )
        .await;
        info!(transaction_id = %id, tag_code = %tag_code, actor = %actor, "Compliance overridden");
        Ok(())
    }

    /// `Err(Compliance)` naming every unsatisfied tag
    pub async fn ensure_compliant(&self, id: TransactionId) -> Result<(), TransactionError> {
        self.load(id).await?;
        self.compliance
            .ensure_compliant(&ComplianceContext::transaction(id))
            .await
    }

    pub async fn missing_compliance(&self, id: TransactionId) -> Result<Vec<String>, TransactionError> {
        self.load(id).await?;
        Ok(self
            .compliance
            .missing(&ComplianceContext::transaction(id))
            .await)
    }

    // ========================================================================
    // Hooks from upstream systems
    // ========================================================================

    /// A sale was confirmed: make sure it has an ACTIVE transaction
    pub async fn on_sale_confirmed(
        &self,
        sale_ref: &str,
    ) -> Result<TransactionRecord, TransactionError> {
        let sale_ref = non_empty("sale_ref", sale_ref)?;
        let _sale_lease = self.sale_leases.acquire(&sale_ref).await?;

        let record = match self.store.find_by_sale(&sale_ref).await? {
            Some(record) => record,
            None => self.create_locked(Some(sale_ref.clone())).await?,
        };
        if record.state != TransactionState::Draft {
            debug!(transaction_id = %record.id, state = %record.state, "Sale already confirmed");
            return Ok(record);
        }

        let _lease = self.leases.acquire(&record.id).await?;
        let current = self.load(record.id).await?;
        if current.state != TransactionState::Draft {
            return Ok(current);
        }
        self.activate_locked(record.id).await
    }

    /// An accounting document that originated from `sale_ref` was posted.
    /// Links it to the sale's transaction; `None` if the sale has none.
    pub async fn on_document_posted(
        &self,
        sale_ref: &str,
        doc_ref: &str,
        slot: LinkSlot,
    ) -> Result<Option<TransactionRecord>, TransactionError> {
        let Some(record) = self.store.find_by_sale(sale_ref).await? else {
            debug!(sale_ref = %sale_ref, doc_ref = %doc_ref, "No transaction for posted document");
            return Ok(None);
        };
        if record.holds(slot, &DocumentRef::from(doc_ref)) {
            return Ok(Some(record));
        }
        self.attach(record.id, slot, doc_ref).await.map(Some)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get(&self, id: TransactionId) -> Result<TransactionRecord, TransactionError> {
        self.load(id).await
    }

    pub async fn find_by_sale(
        &self,
        sale_ref: &str,
    ) -> Result<Option<TransactionRecord>, TransactionError> {
        Ok(self.store.find_by_sale(sale_ref).await?)
    }

    pub async fn financial_snapshot(
        &self,
        id: TransactionId,
    ) -> Result<FinancialSnapshot, TransactionError> {
        Ok(self.load(id).await?.snapshot())
    }

    // ========================================================================
    // Audit
    // ========================================================================

    pub async fn events(&self, id: TransactionId) -> Result<Vec<AuditEvent>, TransactionError> {
        Ok(self.store.events(id).await?)
    }

    /// Verify the hash chain of `id`'s events; returns the chain length
    pub async fn verify_audit_chain(&self, id: TransactionId) -> Result<usize, TransactionError> {
        let events = self.store.events(id).await?;
        audit::verify_chain(&events).map_err(|e| {
            error!(transaction_id = %id, error = %e, "Audit chain verification failed");
            TransactionError::Integrity(format!("{}: {}", id, e))
        })?;
        Ok(events.len())
    }

    /// Sweep closed transactions for close-time invariant violations
    pub async fn audit_integrity(&self) -> Result<Vec<IntegrityViolation>, TransactionError> {
        let closed = self.store.list_by_state(TransactionState::Closed).await?;
        let violations = audit::audit_closed(&closed);
        for v in &violations {
            warn!(
                transaction_id = %v.transaction_id,
                reference = %v.reference,
                violation = ?v.violation,
                "Integrity violation"
            );
        }
        info!(
            checked = closed.len(),
            violations = violations.len(),
            "Integrity audit complete"
        );
        Ok(violations)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn load(&self, id: TransactionId) -> Result<TransactionRecord, TransactionError> {
        self.store
            .get(id)
            .await?
            .ok_or(TransactionError::NotFound(id))
    }

    /// Guard and CAS-write `next` over `before`
    async fn commit(
        &self,
        before: &TransactionRecord,
        mut next: TransactionRecord,
    ) -> Result<TransactionRecord, TransactionError> {
        immutability::check_update(before, &next)?;
        next.updated_at = Utc::now();
        next.version = self.store.update_if_version(&next, before.version).await?;
        Ok(next)
    }

    /// Append after a committed change; a failure is logged, not returned
    async fn record_event(&self, id: TransactionId, kind: AuditEventKind) {
        let kind_name = kind.name();
        if let Err(e) = self.append_event(id, kind).await {
            error!(
                transaction_id = %id,
                kind = kind_name,
                error = %e,
                "Audit event not recorded"
            );
        }
    }

    async fn append_event(
        &self,
        id: TransactionId,
        kind: AuditEventKind,
    ) -> Result<(), TransactionError> {
        let events = self.store.events(id).await?;
        let event = AuditEvent::chained(events.last(), id, kind, Utc::now());
        debug!(transaction_id = %id, seq = event.seq, kind = event.kind.name(), "Audit event");
        self.store.append_event(&event).await?;
        Ok(())
    }

    async fn document_states(
        &self,
        record: &TransactionRecord,
    ) -> Vec<(LinkSlot, DocumentRef, Option<DocumentState>)> {
        let mut states = Vec::new();
        for (slot, doc_ref) in record.claimed_documents() {
            let state = self.accounting.document_state(&doc_ref).await;
            states.push((slot, doc_ref, state));
        }
        states
    }

    async fn rule_for(&self, record: &TransactionRecord) -> Option<CommissionRule> {
        match record.commission_rule.as_deref() {
            Some(code) => self.commission_rules.rule(code).await,
            None => None,
        }
    }

    /// Recompute every derived figure from the current link set
    async fn refresh_financials(&self, record: &mut TransactionRecord) {
        if record.commission_frozen {
            return;
        }
        let states = self.document_states(record).await;
        let rule = self.rule_for(record).await;
        record.financials = derive_financials(record, &states, rule.as_ref());
        debug!(
            transaction_id = %record.id,
            revenue = %record.financials.revenue,
            cost = %record.financials.cost,
            gross_margin = %record.financials.gross_margin,
            commission = %record.financials.commission,
            "Financials recomputed"
        );
    }

    async fn evaluate_close(&self, record: &TransactionRecord, actor: &Actor) -> CloseEvaluation {
        let mut failures = Vec::new();
        let states = self.document_states(record).await;

        if record.customer_invoice.is_none() {
            failures.push(CloseCheckFailure::InvoiceMissing);
        }
        for (slot, doc_ref, state) in &states {
            match (slot, state) {
                (_, None) => failures.push(CloseCheckFailure::DocumentUnavailable(doc_ref.clone())),
                (LinkSlot::Invoice, Some(s)) if !s.posting_state.is_posted() => {
                    failures.push(CloseCheckFailure::InvoiceNotPosted(doc_ref.clone()))
                }
                (LinkSlot::VendorBill, Some(s)) if !s.posting_state.is_posted() => {
                    failures.push(CloseCheckFailure::VendorBillNotPosted(doc_ref.clone()))
                }
                _ => {}
            }
        }

        if let Some(load_ref) = &record.load_ref
            && !self.logistics.is_load_closed(load_ref).await
        {
            failures.push(CloseCheckFailure::LoadNotClosed(load_ref.clone()));
        }

        let missing = self
            .compliance
            .missing(&ComplianceContext::transaction(record.id))
            .await;
        if !missing.is_empty() {
            failures.push(CloseCheckFailure::MissingDocuments(missing));
        }

        let role = &self.config.manager_role;
        if !self.authorization.has_role(actor, role).await {
            failures.push(CloseCheckFailure::Unauthorized {
                actor: actor.clone(),
                role: role.clone(),
            });
        }

        let rule = self.rule_for(record).await;
        if let Some(rule) = &rule
            && validate_percentage(rule.percentage).is_err()
        {
            failures.push(CloseCheckFailure::InvalidCommissionRule {
                code: rule.code.clone(),
                percentage: rule.percentage,
            });
        }

        let financials = derive_financials(record, &states, rule.as_ref());
        if financials.gross_margin < Decimal::ZERO {
            failures.push(CloseCheckFailure::NegativeGrossMargin(
                financials.gross_margin,
            ));
        }

        CloseEvaluation {
            failures,
            financials,
            rule,
        }
    }
}

fn derive_financials(
    record: &TransactionRecord,
    states: &[(LinkSlot, DocumentRef, Option<DocumentState>)],
    rule: Option<&CommissionRule>,
) -> Financials {
    let mut amounts = LinkAmounts::default();
    for (slot, _, state) in states {
        // Unknown documents count as zero; close reports them separately
        let amount = state
            .as_ref()
            .map(|s| s.amount_total)
            .unwrap_or(Decimal::ZERO);
        match slot {
            LinkSlot::Invoice => amounts.invoice = Some(amount),
            LinkSlot::VendorBill => amounts.vendor_bills.push(amount),
            LinkSlot::FreightBill => amounts.freight_bills.push(amount),
        }
    }
    let base = financials::recompute(&amounts);
    let commission = commission::resolve(record, base.gross_margin, rule);
    financials::apply_commission(base, commission)
}

fn slot_field(slot: LinkSlot) -> ProtectedField {
    match slot {
        LinkSlot::Invoice => ProtectedField::CustomerInvoice,
        LinkSlot::VendorBill => ProtectedField::VendorBills,
        LinkSlot::FreightBill => ProtectedField::FreightBills,
    }
}

fn non_empty(field: &str, value: &str) -> Result<String, TransactionError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TransactionError::Validation(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(value.to_string())
}
