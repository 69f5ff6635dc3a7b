//! rsn-pricing
//!
//! Price computation for order finalization.
//!
//! Deterministic, pure logic. No IO, no time, no store access. Integer-cents
//! semantics throughout; rounding and currency are the caller's problem.

use rsn_domain::{AdjustmentKind, DomainError, DomainResult, PriceAdjustment};

/// Result of pricing an order at finalization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub subtotal_cents: i64,
    pub total_cents: i64,
}

/// Compute the finalization quote for a service type subtotal plus the
/// order's adjustments.
///
/// `total = subtotal + Σ adjustments.amount_cents`. Adjustment amounts are
/// signed by the caller (discounts negative, surcharges positive); the kind
/// tag is descriptive only and no sign is inferred from it.
///
/// # Errors
/// `Validation` when `subtotal_cents <= 0` or the resulting total is `<= 0`.
pub fn price_order(subtotal_cents: i64, adjustments: &[PriceAdjustment]) -> DomainResult<Quote> {
    if subtotal_cents <= 0 {
        return Err(DomainError::validation(
            "subtotal",
            format!("subtotal must be positive, got {subtotal_cents}"),
        ));
    }

    let mut total_cents = subtotal_cents;
    for adj in adjustments {
        total_cents = total_cents
            .checked_add(adj.amount_cents)
            .ok_or_else(|| DomainError::validation("adjustments", "total overflows i64"))?;
    }

    if total_cents <= 0 {
        return Err(DomainError::validation(
            "total",
            format!("total must be positive, got {total_cents}"),
        ));
    }

    Ok(Quote {
        subtotal_cents,
        total_cents,
    })
}

/// Sanity check used when an adjustment is recorded: the stored sign must
/// match the declared kind's effect.
pub fn adjustment_sign_matches(kind: AdjustmentKind, amount_cents: i64) -> bool {
    match kind {
        AdjustmentKind::Discount => amount_cents < 0,
        AdjustmentKind::Surcharge => amount_cents > 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn adj(kind: AdjustmentKind, amount_cents: i64) -> PriceAdjustment {
        PriceAdjustment {
            adjustment_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            amount_cents,
            kind,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn no_adjustments_total_equals_subtotal() {
        let q = price_order(10_000, &[]).unwrap();
        assert_eq!(q.subtotal_cents, 10_000);
        assert_eq!(q.total_cents, 10_000);
    }

    #[test]
    fn discount_reduces_total() {
        // Service type priced at 100, one -20 discount => 80.
        let q = price_order(100, &[adj(AdjustmentKind::Discount, -20)]).unwrap();
        assert_eq!(q.subtotal_cents, 100);
        assert_eq!(q.total_cents, 80);
    }

    #[test]
    fn mixed_adjustments_sum_as_signed() {
        let q = price_order(
            10_000,
            &[
                adj(AdjustmentKind::Discount, -2_500),
                adj(AdjustmentKind::Surcharge, 1_000),
            ],
        )
        .unwrap();
        assert_eq!(q.total_cents, 8_500);
    }

    #[test]
    fn zero_subtotal_rejected() {
        let err = price_order(0, &[]).unwrap_err();
        assert!(matches!(
            err,
            rsn_domain::DomainError::Validation { field: "subtotal", .. }
        ));
    }

    #[test]
    fn negative_subtotal_rejected() {
        assert!(price_order(-500, &[]).is_err());
    }

    #[test]
    fn discount_below_zero_total_rejected() {
        let err = price_order(100, &[adj(AdjustmentKind::Discount, -100)]).unwrap_err();
        assert!(matches!(
            err,
            rsn_domain::DomainError::Validation { field: "total", .. }
        ));
    }

    #[test]
    fn sign_check_per_kind() {
        assert!(adjustment_sign_matches(AdjustmentKind::Discount, -1));
        assert!(!adjustment_sign_matches(AdjustmentKind::Discount, 1));
        assert!(adjustment_sign_matches(AdjustmentKind::Surcharge, 1));
        assert!(!adjustment_sign_matches(AdjustmentKind::Surcharge, 0));
    }
}
