//! Money Module
//!
//! All monetary values in the engine are `rust_decimal::Decimal`. This module
//! owns the conversions between client-facing strings and `Decimal`, plus the
//! validation rules for amounts and commission percentages.
//!
//! ## Design Principles
//! 1. Explicit Error Handling: No silent truncation
//! 2. Fixed settlement scale: computed amounts are rounded to [`AMOUNT_DECIMALS`]
//!
//! ## Usage
//! ```rust
//! use deal_ledger::money::{parse_amount, format_amount};
//!
//! let amount = parse_amount("1000.50", 2).unwrap();
//! assert_eq!(format_amount(amount, 2), "1000.50");
//! ```

use rust_decimal::prelude::*;
use thiserror::Error;

/// Decimal places carried by every computed amount (revenue, cost, margins, commission).
pub const AMOUNT_DECIMALS: u32 = 2;

/// Fractional digits accepted in a configured commission percentage (0.0725)
pub const PERCENTAGE_DECIMALS: u32 = 4;

/// Monetary amount
pub type Amount = Decimal;

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must not be negative")]
    NegativeAmount,

    #[error("Percentage must be between 0 and 1, got {0}")]
    PercentageOutOfRange(Decimal),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Parse: Client → Decimal
// ============================================================================

/// Parse a client string amount into a non-negative `Decimal`
///
/// # Errors
/// * `PrecisionOverflow` - more fractional digits than `max_decimals`
/// * `NegativeAmount` - leading `-`
/// * `InvalidFormat` - empty input, `.5` / `5.` forms, stray characters
pub fn parse_amount(amount_str: &str, max_decimals: u32) -> Result<Amount, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') {
        return Err(MoneyError::NegativeAmount);
    }
    if amount_str.starts_with('+') {
        return Err(MoneyError::InvalidFormat("explicit sign not allowed".into()));
    }

    let parts: Vec<&str> = amount_str.split('.').collect();
    let frac = match parts.len() {
        1 => "",
        2 => {
            // Both sides of the dot must be present
            if parts[0].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if parts[1].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            parts[1]
        }
        _ => return Err(MoneyError::InvalidFormat("multiple decimal points".into())),
    };

    if !amount_str.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in amount: {}",
            amount_str
        )));
    }

    if frac.len() > max_decimals as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: max_decimals,
        });
    }

    Decimal::from_str(amount_str).map_err(|e| MoneyError::InvalidFormat(e.to_string()))
}

/// Reject negative amounts (commission overrides, document totals)
pub fn validate_non_negative(amount: Amount) -> Result<Amount, MoneyError> {
    if amount < Decimal::ZERO {
        return Err(MoneyError::NegativeAmount);
    }
    Ok(amount)
}

/// Commission percentages are fractions: 0.1 means ten percent.
pub fn validate_percentage(percentage: Decimal) -> Result<Decimal, MoneyError> {
    if percentage < Decimal::ZERO || percentage > Decimal::ONE {
        return Err(MoneyError::PercentageOutOfRange(percentage));
    }
    Ok(percentage)
}

/// Parse a commission percentage written as a fraction ("0.075")
pub fn parse_percentage(percentage_str: &str) -> Result<Decimal, MoneyError> {
    validate_percentage(parse_amount(percentage_str, PERCENTAGE_DECIMALS)?)
}

/// Round a computed amount to the settlement scale.
///
/// Midpoints round away from zero so that replaying the same inputs always
/// yields the same cents.
#[inline]
pub fn round_amount(amount: Amount) -> Amount {
    amount.round_dp_with_strategy(AMOUNT_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
}

// ============================================================================
// Format: Decimal → Client
// ============================================================================

/// Render an amount with exactly `display_decimals` fractional digits
pub fn format_amount(value: Amount, display_decimals: u32) -> String {
    format!("{:.prec$}", value, prec = display_decimals as usize)
}
