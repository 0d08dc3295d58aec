//! Transaction Core Types
//!
//! Identifiers, link slots, collaborator value types and the persisted
//! transaction record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::money::{AMOUNT_DECIMALS, Amount, format_amount};

use super::state::TransactionState;

/// Transaction ID - ULID-based unique identifier
///
/// The internal key. The human-readable reference is assigned separately
/// by the sequence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(ulid::Ulid);

impl TransactionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Reference to an accounting document (customer invoice, vendor bill, freight bill)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef(String);

impl DocumentRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identity of a caller (user login, service principal)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor(String);

impl Actor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Actor {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Claimable document slot
///
/// A document is claimed per slot category: the same `DocumentRef` may be a
/// vendor bill of one transaction and a freight bill of another, but never a
/// vendor bill of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum LinkSlot {
    Invoice = 1,
    VendorBill = 2,
    FreightBill = 3,
}

impl LinkSlot {
    pub const ALL: [LinkSlot; 3] = [LinkSlot::Invoice, LinkSlot::VendorBill, LinkSlot::FreightBill];

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(LinkSlot::Invoice),
            2 => Some(LinkSlot::VendorBill),
            3 => Some(LinkSlot::FreightBill),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkSlot::Invoice => "invoice",
            LinkSlot::VendorBill => "vendor_bill",
            LinkSlot::FreightBill => "freight_bill",
        }
    }
}

impl fmt::Display for LinkSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Posting state reported by the accounting collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingState {
    Draft,
    Posted,
    Cancelled,
}

impl PostingState {
    #[inline]
    pub fn is_posted(&self) -> bool {
        matches!(self, PostingState::Posted)
    }
}

/// Accounting document as seen through `document_state(doc_ref)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentState {
    pub amount_total: Amount,
    pub posting_state: PostingState,
}

impl DocumentState {
    pub fn new(amount_total: Amount, posting_state: PostingState) -> Self {
        Self {
            amount_total,
            posting_state,
        }
    }

    pub fn posted(amount_total: Amount) -> Self {
        Self::new(amount_total, PostingState::Posted)
    }

    pub fn draft(amount_total: Amount) -> Self {
        Self::new(amount_total, PostingState::Draft)
    }
}

/// Commission rule: a percentage of gross margin owed to a sales rep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRule {
    pub code: String,
    pub sales_rep: Option<Actor>,
    /// Fraction of gross margin (0.1 = 10%)
    pub percentage: Decimal,
    pub active: bool,
}

impl CommissionRule {
    pub fn new(code: impl Into<String>, percentage: Decimal) -> Self {
        Self {
            code: code.into(),
            sales_rep: None,
            percentage,
            active: true,
        }
    }
}

/// Computed financial fields, always derived from the current link set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Financials {
    pub revenue: Amount,
    pub cost: Amount,
    pub gross_margin: Amount,
    pub commission: Amount,
    pub net_margin: Amount,
}

/// Transaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// Human-readable reference, unique and never reassigned
    pub reference: String,
    pub sale_ref: Option<String>,
    pub purchase_refs: Vec<String>,
    pub load_ref: Option<String>,
    pub sales_rep: Option<Actor>,

    pub customer_invoice: Option<DocumentRef>,
    pub vendor_bills: Vec<DocumentRef>,
    pub freight_bills: Vec<DocumentRef>,

    pub commission_rule: Option<String>,
    /// Flat override; `Some(0)` is an explicit zero, `None` means "use the rule"
    pub commission_override: Option<Amount>,

    pub financials: Financials,

    pub commission_frozen: bool,
    pub frozen_amount: Amount,
    pub frozen_at: Option<DateTime<Utc>>,

    pub state: TransactionState,
    /// Optimistic concurrency token, bumped by every store update
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Create a new record in DRAFT state
    pub fn new(id: TransactionId, reference: String, sale_ref: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            reference,
            sale_ref,
            purchase_refs: Vec::new(),
            load_ref: None,
            sales_rep: None,
            customer_invoice: None,
            vendor_bills: Vec::new(),
            freight_bills: Vec::new(),
            commission_rule: None,
            commission_override: None,
            financials: Financials::default(),
            commission_frozen: false,
            frozen_amount: Decimal::ZERO,
            frozen_at: None,
            state: TransactionState::Draft,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Any customer invoice, vendor bill or freight bill linked
    pub fn has_accounting_links(&self) -> bool {
        self.customer_invoice.is_some()
            || !self.vendor_bills.is_empty()
            || !self.freight_bills.is_empty()
    }

    /// Whether this record already holds `doc_ref` in `slot`
    pub fn holds(&self, slot: LinkSlot, doc_ref: &DocumentRef) -> bool {
        match slot {
            LinkSlot::Invoice => self.customer_invoice.as_ref() == Some(doc_ref),
            LinkSlot::VendorBill => self.vendor_bills.contains(doc_ref),
            LinkSlot::FreightBill => self.freight_bills.contains(doc_ref),
        }
    }

    /// Every claimed document with its slot, invoice first
    pub fn claimed_documents(&self) -> Vec<(LinkSlot, DocumentRef)> {
        let mut docs = Vec::with_capacity(1 + self.vendor_bills.len() + self.freight_bills.len());
        if let Some(invoice) = &self.customer_invoice {
            docs.push((LinkSlot::Invoice, invoice.clone()));
        }
        docs.extend(
            self.vendor_bills
                .iter()
                .map(|d| (LinkSlot::VendorBill, d.clone())),
        );
        docs.extend(
            self.freight_bills
                .iter()
                .map(|d| (LinkSlot::FreightBill, d.clone())),
        );
        docs
    }

    pub fn snapshot(&self) -> FinancialSnapshot {
        FinancialSnapshot {
            revenue: self.financials.revenue,
            cost: self.financials.cost,
            gross_margin: self.financials.gross_margin,
            commission: self.financials.commission,
            net_margin: self.financials.net_margin,
            frozen: self.commission_frozen,
        }
    }
}

impl fmt::Display for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction[{}] ref={} state={} revenue={} cost={} gross={}",
            self.id,
            self.reference,
            self.state,
            self.financials.revenue,
            self.financials.cost,
            self.financials.gross_margin
        )
    }
}

/// Read-only view of a transaction's financial outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialSnapshot {
    pub revenue: Amount,
    pub cost: Amount,
    pub gross_margin: Amount,
    pub commission: Amount,
    pub net_margin: Amount,
    pub frozen: bool,
}

impl FinancialSnapshot {
    /// Canonical JSON: fixed key order, every amount at settlement scale
    pub fn canonical_json(&self) -> String {
        serde_json::json!({
            "commission": format_amount(self.commission, AMOUNT_DECIMALS),
            "cost": format_amount(self.cost, AMOUNT_DECIMALS),
            "frozen": self.frozen,
            "gross_margin": format_amount(self.gross_margin, AMOUNT_DECIMALS),
            "net_margin": format_amount(self.net_margin, AMOUNT_DECIMALS),
            "revenue": format_amount(self.revenue, AMOUNT_DECIMALS),
        })
        .to_string()
    }

    /// Hex SHA-256 of [`Self::canonical_json`]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Subject of a compliance check (`res_model` + `res_id`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComplianceContext {
    pub model: String,
    pub record_id: String,
}

impl ComplianceContext {
    pub const TRANSACTION_MODEL: &'static str = "transaction";

    pub fn new(model: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            record_id: record_id.into(),
        }
    }

    pub fn transaction(id: TransactionId) -> Self {
        Self::new(Self::TRANSACTION_MODEL, id.to_string())
    }
}

impl fmt::Display for ComplianceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model, self.record_id)
    }
}
