//! Financial Computation
//!
//! Pure derivation of revenue, cost and margins from the amounts of the
//! currently linked documents. Never performs I/O and never fails; the engine
//! calls it right after every link mutation so stored figures always match
//! the current link set.

use rust_decimal::Decimal;

use crate::money::{Amount, round_amount};

use super::types::Financials;

/// Amounts of the documents currently linked to a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkAmounts {
    pub invoice: Option<Amount>,
    pub vendor_bills: Vec<Amount>,
    pub freight_bills: Vec<Amount>,
}

/// Compute revenue, cost and gross margin. Commission is left at zero and
/// `net_margin == gross_margin` until [`apply_commission`] runs.
pub fn recompute(links: &LinkAmounts) -> Financials {
    let revenue = round_amount(links.invoice.unwrap_or(Decimal::ZERO));

    let vendor_cost = sum(&links.vendor_bills);
    let freight_cost = sum(&links.freight_bills);
    let cost = round_amount(vendor_cost.saturating_add(freight_cost));

    let gross_margin = revenue.saturating_sub(cost);

    Financials {
        revenue,
        cost,
        gross_margin,
        commission: Decimal::ZERO,
        net_margin: gross_margin,
    }
}

/// Set the commission and derive `net_margin = gross_margin - commission`
pub fn apply_commission(financials: Financials, commission: Amount) -> Financials {
    let commission = round_amount(commission);
    Financials {
        commission,
        net_margin: financials.gross_margin.saturating_sub(commission),
        ..financials
    }
}

fn sum(amounts: &[Amount]) -> Amount {
    amounts
        .iter()
        .fold(Decimal::ZERO, |acc, amount| acc.saturating_add(*amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn test_empty_links_are_zero() {
        let f = recompute(&LinkAmounts::default());
        assert_eq!(f, Financials::default());
    }

    #[test]
    fn test_invoice_and_bills() {
        let f = recompute(&LinkAmounts {
            invoice: Some(d(1000)),
            vendor_bills: vec![d(400), d(200)],
            freight_bills: vec![d(50)],
        });
        assert_eq!(f.revenue, d(1000));
        assert_eq!(f.cost, d(650));
        assert_eq!(f.gross_margin, d(350));
        assert_eq!(f.net_margin, d(350));
    }

    #[test]
    fn test_negative_margin_is_allowed() {
        let f = recompute(&LinkAmounts {
            invoice: Some(d(1000)),
            vendor_bills: vec![d(1050)],
            freight_bills: vec![],
        });
        assert_eq!(f.gross_margin, d(-50));
    }

    #[test]
    fn test_bills_without_invoice() {
        let f = recompute(&LinkAmounts {
            invoice: None,
            vendor_bills: vec![d(10)],
            freight_bills: vec![d(5)],
        });
        assert_eq!(f.revenue, Decimal::ZERO);
        assert_eq!(f.gross_margin, d(-15));
    }

    #[test]
    fn test_apply_commission() {
        let f = recompute(&LinkAmounts {
            invoice: Some(d(1000)),
            vendor_bills: vec![d(600)],
            freight_bills: vec![],
        });
        let f = apply_commission(f, d(40));
        assert_eq!(f.commission, d(40));
        assert_eq!(f.net_margin, d(360));
        assert_eq!(f.gross_margin, d(400));
    }

    #[test]
    fn test_commission_rounded_to_cents() {
        let f = apply_commission(Financials::default(), Decimal::new(33333, 3));
        assert_eq!(f.commission, Decimal::new(3333, 2));
        assert_eq!(f.net_margin, Decimal::new(-3333, 2));
    }
}
