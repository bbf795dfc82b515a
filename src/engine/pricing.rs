//! # Pricing Aggregator
//!
//! Pure arithmetic over resolved cart lines. The discount is capped at the
//! subtotal so the shipping leg is never discounted, and every sum is checked
//! so `total == subtotal + shipping - discount` holds exactly or the cart is
//! refused.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Rupiah;

/// A cart line after variant resolution, with its price frozen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub variant_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: Rupiah,
    pub weight_grams: i64,
}

impl PricedLine {
    pub fn line_total(&self) -> Rupiah {
        self.unit_price.saturating_mul(Rupiah::from(self.quantity))
    }

    pub fn line_weight(&self) -> i64 {
        self.weight_grams.saturating_mul(i64::from(self.quantity))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Rupiah,
    pub shipping_cost: Rupiah,
    /// Discount actually applied, after capping.
    pub discount: Rupiah,
    pub total: Rupiah,
}

pub fn subtotal(lines: &[PricedLine]) -> Rupiah {
    lines
        .iter()
        .map(PricedLine::line_total)
        .fold(0, Rupiah::saturating_add)
}

pub fn total_weight(lines: &[PricedLine]) -> i64 {
    lines
        .iter()
        .map(PricedLine::line_weight)
        .fold(0, i64::saturating_add)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("order amount does not fit in a rupiah value")]
    Overflow,
}

/// Combine item totals, shipping and a requested discount.
///
/// Unlike [`subtotal`], which saturates for quoting, this refuses amounts
/// that cannot be represented exactly.
pub fn compute_totals(
    lines: &[PricedLine],
    shipping_cost: Rupiah,
    discount_amount: Rupiah,
) -> Result<OrderTotals, PricingError> {
    let subtotal = lines.iter().try_fold(0 as Rupiah, |acc, line| {
        line.unit_price
            .checked_mul(Rupiah::from(line.quantity))
            .and_then(|line_total| acc.checked_add(line_total))
    });
    let subtotal = subtotal.ok_or(PricingError::Overflow)?;
    let shipping_cost = shipping_cost.max(0);
    let discount = discount_amount.min(subtotal).max(0);
    let total = subtotal
        .checked_add(shipping_cost)
        .and_then(|gross| gross.checked_sub(discount))
        .ok_or(PricingError::Overflow)?;

    Ok(OrderTotals {
        subtotal,
        shipping_cost,
        discount,
        total,
    })
}

/// `Rp 2.200.000` style formatting for customer-facing text.
pub fn format_rupiah(amount: Rupiah) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        format!("-Rp {grouped}")
    } else {
        format!("Rp {grouped}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, quantity: i32, unit_price: Rupiah) -> PricedLine {
        PricedLine {
            variant_id: id.to_string(),
            product_id: format!("p-{id}"),
            quantity,
            unit_price,
            weight_grams: 250,
        }
    }

    fn sample_cart() -> Vec<PricedLine> {
        vec![line("a", 2, 500_000), line("b", 1, 1_200_000)]
    }

    #[test]
    fn test_subtotal_is_sum_of_line_totals() {
        let cart = sample_cart();
        let totals = compute_totals(&cart, 25_000, 0).unwrap();
        let sum: Rupiah = cart.iter().map(PricedLine::line_total).sum();
        assert_eq!(totals.subtotal, sum);
        assert_eq!(totals.subtotal, 2_200_000);
    }

    #[test]
    fn test_mid_tier_cart_without_discount() {
        let totals = compute_totals(&sample_cart(), 25_000, 0).unwrap();
        assert_eq!(totals.discount, 0);
        assert_eq!(totals.total, 2_225_000);
    }

    #[test]
    fn test_discount_capped_at_subtotal() {
        let totals = compute_totals(&sample_cart(), 25_000, 3_000_000).unwrap();
        assert_eq!(totals.discount, 2_200_000);
        assert_eq!(totals.total, 25_000);
    }

    #[test]
    fn test_negative_discount_ignored() {
        let totals = compute_totals(&sample_cart(), 0, -50_000).unwrap();
        assert_eq!(totals.discount, 0);
        assert_eq!(totals.total, 2_200_000);
    }

    #[test]
    fn test_invariants_hold_across_carts() {
        let carts = [
            vec![],
            vec![line("a", 1, 0)],
            vec![line("a", 3, 19_900), line("b", 7, 1)],
            sample_cart(),
        ];
        for cart in &carts {
            for shipping in [0, 15_000, 165_000] {
                for discount in [0, 1, 50_000, 10_000_000] {
                    let t = compute_totals(cart, shipping, discount).unwrap();
                    assert!(t.total >= 0);
                    assert!(t.discount <= t.subtotal);
                    assert_eq!(t.total, t.subtotal + t.shipping_cost - t.discount);
                }
            }
        }
    }

    #[test]
    fn test_unrepresentable_totals_are_refused() {
        let huge = vec![line("a", 1, Rupiah::MAX)];
        assert_eq!(compute_totals(&huge, 25_000, 0), Err(PricingError::Overflow));

        let wide = vec![line("a", 2, Rupiah::MAX / 2 + 1)];
        assert_eq!(compute_totals(&wide, 0, 0), Err(PricingError::Overflow));

        let edge = vec![line("a", 1, Rupiah::MAX - 25_000)];
        let totals = compute_totals(&edge, 25_000, 0).unwrap();
        assert_eq!(totals.total, Rupiah::MAX);
    }

    #[test]
    fn test_total_weight() {
        assert_eq!(total_weight(&sample_cart()), 750);
    }

    #[test]
    fn test_format_rupiah() {
        assert_eq!(format_rupiah(0), "Rp 0");
        assert_eq!(format_rupiah(15_000), "Rp 15.000");
        assert_eq!(format_rupiah(2_200_000), "Rp 2.200.000");
        assert_eq!(format_rupiah(-999), "-Rp 999");
    }
}
