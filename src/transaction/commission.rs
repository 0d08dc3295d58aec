//! Commission Policy
//!
//! Resolution order:
//! 1. Frozen snapshot (after close, never recomputed)
//! 2. Flat override, an explicit zero included
//! 3. Rule percentage applied to gross margin
//! 4. Zero

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::money::{Amount, round_amount};

use super::types::{CommissionRule, TransactionRecord};

/// Resolve the commission owed on `record`.
///
/// `gross_margin` is passed in rather than read from the record so callers can
/// resolve against a freshly recomputed margin before storing it.
pub fn resolve(
    record: &TransactionRecord,
    gross_margin: Amount,
    rule: Option<&CommissionRule>,
) -> Amount {
    if record.commission_frozen {
        return record.frozen_amount;
    }
    if let Some(flat) = record.commission_override {
        return round_amount(flat);
    }
    match rule {
        Some(rule) => round_amount(gross_margin.saturating_mul(rule.percentage)),
        None => Decimal::ZERO,
    }
}

/// Freeze the commission on `record`.
///
/// Returns `false` without touching the record when it is already frozen.
/// Must run in the same critical section as the transition to CLOSED.
pub fn freeze(
    record: &mut TransactionRecord,
    rule: Option<&CommissionRule>,
    now: DateTime<Utc>,
) -> bool {
    if record.commission_frozen {
        return false;
    }
    let amount = resolve(record, record.financials.gross_margin, rule);
    record.frozen_amount = amount;
    record.commission_frozen = true;
    record.frozen_at = Some(now);
    record.financials.commission = amount;
    record.financials.net_margin = record.financials.gross_margin.saturating_sub(amount);
    true
}
