//! Line-item and order-total arithmetic.
//!
//! Amounts are integer minor units. A line item's unit price is never stored on
//! its own: it is recovered from `amount / quantity`, so quantity-only edits keep
//! the price the customer was quoted. Only items without a recorded amount are
//! priced from the live catalog.

use crate::domain::aggregates::OrderItem;
use crate::domain::value_objects::Quantity;
use crate::Result;

/// Amount for `quantity` units. Negative unit prices are treated as zero so an
/// amount is never negative.
pub fn compute_item_amount(unit_price: i64, quantity: Quantity) -> i64 {
    unit_price.max(0).saturating_mul(i64::from(quantity.value()))
}

/// Unit price recorded in the item, if it can be recovered.
pub fn historical_unit_price(item: &OrderItem) -> Option<i64> {
    match item.amount {
        Some(amount) if item.quantity > 0 => Some(amount / i64::from(item.quantity)),
        _ => None,
    }
}

/// Whether [`set_quantity_preserving_unit_price`] will fall back to the catalog.
pub fn needs_live_price(item: &OrderItem) -> bool {
    historical_unit_price(item).is_none()
}

/// Sets a new quantity while keeping the historical unit price.
///
/// `live_price` is the current catalog price of the item's product; it is only
/// consulted when the item carries no usable price and a missing value counts
/// as zero.
pub fn set_quantity_preserving_unit_price(item: &mut OrderItem, new_quantity: i32, live_price: Option<i64>) -> Result<()> {
    let quantity = Quantity::new(new_quantity)?;
    let unit_price = historical_unit_price(item).unwrap_or_else(|| live_price.unwrap_or(0));
    item.quantity = quantity.value();
    item.amount = Some(compute_item_amount(unit_price, quantity));
    Ok(())
}

pub fn order_total(items: &[OrderItem]) -> i64 {
    items.iter().map(|i| i.amount.unwrap_or(0)).fold(0i64, i64::saturating_add)
}
