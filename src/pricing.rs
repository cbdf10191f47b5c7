use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::api::Rupiah;

/// Pre-discount price of a product sold at `price` with `discount` percent
/// off, rounded to whole rupiah. Without a usable discount the price is its
/// own original price.
pub fn original_price(price: Rupiah, discount: u32) -> Rupiah {
    if discount == 0 || discount >= 100 {
        return price;
    }
    let remaining = dec!(1) - Decimal::from(discount) / dec!(100);
    Decimal::from(price)
        .checked_div(remaining)
        .map(|p| p.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|p| p.to_i64())
        .unwrap_or(price)
}

/// Formats an amount the way id-ID currency formatting does: `Rp 1.250.000`.
pub fn format_idr(amount: Rupiah) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    if amount < 0 {
        format!("-Rp {}", grouped)
    } else {
        format!("Rp {}", grouped)
    }
}
