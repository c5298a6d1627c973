//! Domain events
use serde::Serialize;
use uuid::Uuid;

use crate::domain::value_objects::OrderStatus;
use crate::ProductId;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, owner: Uuid, total_amount: i64, items: usize },
    ItemAdded { order_id: Uuid, item_id: Uuid, product_id: ProductId, quantity: i32, amount: i64 },
    ItemQuantityChanged { order_id: Uuid, item_id: Uuid, quantity: i32, amount: i64 },
    ItemRemoved { order_id: Uuid, item_id: Uuid },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
    DeliveryUpdated { order_id: Uuid, fields: Vec<String> },
    Deleted { order_id: Uuid },
}

impl OrderEvent {
    /// Subject suffix used when publishing.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::ItemAdded { .. } => "item_added",
            Self::ItemQuantityChanged { .. } => "item_quantity_changed",
            Self::ItemRemoved { .. } => "item_removed",
            Self::StatusChanged { .. } => "status_changed",
            Self::DeliveryUpdated { .. } => "delivery_updated",
            Self::Deleted { .. } => "deleted",
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            Self::Created { order_id, .. }
            | Self::ItemAdded { order_id, .. }
            | Self::ItemQuantityChanged { order_id, .. }
            | Self::ItemRemoved { order_id, .. }
            | Self::StatusChanged { order_id, .. }
            | Self::DeliveryUpdated { order_id, .. }
            | Self::Deleted { order_id } => *order_id,
        }
    }
}
