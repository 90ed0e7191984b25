//! Money conversion helpers.
//!
//! Amounts are stored as `f64` and computed as `Decimal`, rounded half away
//! from zero to the configured number of decimal places.

use rust_decimal::prelude::*;

use crate::services::error::BillingError;

/// Convert a stored or requested amount to Decimal for calculation.
#[inline]
pub fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

/// Convert a caller-supplied amount, rejecting values Decimal cannot hold.
///
/// A non-zero input that would come out as zero is rejected as well.
pub fn parse_decimal(value: f64, field: &str) -> Result<Decimal, BillingError> {
    let unrepresentable =
        || BillingError::Validation(format!("{} is out of the supported range", field));
    if !value.is_finite() {
        return Err(unrepresentable());
    }
    let decimal = Decimal::from_f64(value).ok_or_else(unrepresentable)?;
    if value != 0.0 && decimal.is_zero() {
        return Err(unrepresentable());
    }
    Ok(decimal)
}

#[inline]
pub fn round_money(value: Decimal, precision: u32) -> Decimal {
    value.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert Decimal back to f64 for storage, rounded to `precision` places.
#[inline]
pub fn to_f64(value: Decimal, precision: u32) -> f64 {
    round_money(value, precision).to_f64().unwrap_or_default()
}

/// `max(unit_price * quantity - discount, 0)`, rounded.
pub fn line_total(unit_price: Decimal, quantity: i64, discount: Decimal, precision: u32) -> Decimal {
    round_money(
        (unit_price * Decimal::from(quantity) - discount).max(Decimal::ZERO),
        precision,
    )
}
