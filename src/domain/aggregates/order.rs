//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{BTreeMap, Entry};
use uuid::Uuid;

use crate::domain::events::OrderEvent;
use crate::domain::pricing;
use crate::domain::value_objects::{DeliveryField, DeliveryInfo, OrderStatus, Quantity};
use crate::{OrderError, ProductId, Result};

#[derive(Clone, Debug)]
pub struct Order {
    id: Uuid,
    owner: Uuid,
    status: OrderStatus,
    total_amount: i64,
    delivery: DeliveryInfo,
    created_at: DateTime<Utc>,
    items: Vec<OrderItem>,
    events: Vec<OrderEvent>,
}

/// One line of an order. `amount` is unit price times quantity at the time the
/// line was priced; legacy rows may carry no amount at all.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: ProductId,
    pub quantity: i32,
    pub amount: Option<i64>,
}

/// A validated, priced line ready to be placed in a new order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewLine {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub unit_price: i64,
}

/// Collapses repeated product references into one entry per product, summing
/// quantities. The result is ordered by product id regardless of input order.
pub fn merge_requested_items(items: &[(ProductId, i32)]) -> Result<BTreeMap<ProductId, Quantity>> {
    if items.is_empty() { return Err(OrderError::EmptyItems); }
    let mut merged: BTreeMap<ProductId, Quantity> = BTreeMap::new();
    for &(product_id, qty) in items {
        let qty = Quantity::new(qty)?;
        match merged.entry(product_id) {
            Entry::Vacant(slot) => { slot.insert(qty); }
            Entry::Occupied(mut slot) => {
                let sum = slot.get().checked_add(qty).ok_or_else(|| quantity_overflow(product_id))?;
                slot.insert(sum);
            }
        }
    }
    Ok(merged)
}

fn quantity_overflow(product_id: ProductId) -> OrderError {
    OrderError::Validation(format!("total quantity of product {product_id} exceeds {}", i32::MAX))
}

impl Order {
    pub fn create(owner: Uuid, delivery: DeliveryInfo, lines: Vec<NewLine>) -> Result<Self> {
        if lines.is_empty() { return Err(OrderError::EmptyItems); }
        let mut order = Self {
            id: Uuid::now_v7(), owner, status: OrderStatus::Pending, total_amount: 0,
            delivery, created_at: Utc::now(), items: Vec::with_capacity(lines.len()), events: vec![],
        };
        for line in lines {
            if order.items.iter().any(|i| i.product_id == line.product_id) {
                return Err(OrderError::Validation(format!("duplicate product {} in order lines", line.product_id)));
            }
            order.items.push(OrderItem {
                id: Uuid::now_v7(),
                product_id: line.product_id,
                quantity: line.quantity.value(),
                amount: Some(pricing::compute_item_amount(line.unit_price, line.quantity)),
            });
        }
        order.recalculate();
        order.raise_event(OrderEvent::Created {
            order_id: order.id, owner, total_amount: order.total_amount, items: order.items.len(),
        });
        Ok(order)
    }

    /// Rebuilds a persisted aggregate. The total is derived from the items.
    pub fn restore(
        id: Uuid, owner: Uuid, status: OrderStatus, delivery: DeliveryInfo,
        created_at: DateTime<Utc>, items: Vec<OrderItem>,
    ) -> Self {
        let mut order = Self { id, owner, status, total_amount: 0, delivery, created_at, items, events: vec![] };
        order.recalculate();
        order
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn owner(&self) -> Uuid { self.owner }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn total_amount(&self) -> i64 { self.total_amount }
    pub fn delivery(&self) -> &DeliveryInfo { &self.delivery }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn item(&self, item_id: Uuid) -> Option<&OrderItem> { self.items.iter().find(|i| i.id == item_id) }
    pub fn item_for_product(&self, product_id: ProductId) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    /// Adds `quantity` units of a product. An existing line for the product keeps
    /// its unit price; a new line is priced at `live_price`.
    pub fn add_product(&mut self, product_id: ProductId, quantity: Quantity, live_price: Option<i64>) -> Result<Uuid> {
        let order_id = self.id;
        let (item_id, event) = match self.items.iter_mut().find(|i| i.product_id == product_id) {
            Some(existing) => {
                let new_quantity = existing.quantity.max(0)
                    .checked_add(quantity.value())
                    .ok_or_else(|| quantity_overflow(product_id))?;
                pricing::set_quantity_preserving_unit_price(existing, new_quantity, live_price)?;
                (existing.id, OrderEvent::ItemQuantityChanged {
                    order_id, item_id: existing.id, quantity: existing.quantity, amount: existing.amount.unwrap_or(0),
                })
            }
            None => {
                let amount = pricing::compute_item_amount(live_price.unwrap_or(0), quantity);
                let item = OrderItem { id: Uuid::now_v7(), product_id, quantity: quantity.value(), amount: Some(amount) };
                let event = OrderEvent::ItemAdded { order_id, item_id: item.id, product_id, quantity: item.quantity, amount };
                let item_id = item.id;
                self.items.push(item);
                (item_id, event)
            }
        };
        self.recalculate();
        self.raise_event(event);
        Ok(item_id)
    }

    pub fn set_item_quantity(&mut self, item_id: Uuid, quantity: i32, live_price: Option<i64>) -> Result<()> {
        let item = self.items.iter_mut().find(|i| i.id == item_id).ok_or(OrderError::NotFound("Order item"))?;
        pricing::set_quantity_preserving_unit_price(item, quantity, live_price)?;
        let event = OrderEvent::ItemQuantityChanged {
            order_id: self.id, item_id, quantity: item.quantity, amount: item.amount.unwrap_or(0),
        };
        self.recalculate();
        self.raise_event(event);
        Ok(())
    }

    /// Removes a line. The order may be left without items.
    pub fn remove_item(&mut self, item_id: Uuid) -> Result<OrderItem> {
        let pos = self.items.iter().position(|i| i.id == item_id).ok_or(OrderError::NotFound("Order item"))?;
        let removed = self.items.remove(pos);
        self.recalculate();
        self.raise_event(OrderEvent::ItemRemoved { order_id: self.id, item_id });
        Ok(removed)
    }

    pub fn set_status(&mut self, status: OrderStatus) {
        let from = std::mem::replace(&mut self.status, status);
        self.raise_event(OrderEvent::StatusChanged { order_id: self.id, from, to: status });
    }

    pub fn update_delivery(&mut self, updates: Vec<(DeliveryField, Option<String>)>) {
        if updates.is_empty() { return; }
        let fields = updates.iter().map(|(f, _)| f.as_str().to_string()).collect();
        for (field, value) in updates { self.delivery.set(field, value); }
        self.raise_event(OrderEvent::DeliveryUpdated { order_id: self.id, fields });
    }

    pub fn take_events(&mut self) -> Vec<OrderEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: OrderEvent) { self.events.push(e); }
    fn recalculate(&mut self) { self.total_amount = pricing::order_total(&self.items); }
}
