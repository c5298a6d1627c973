//! Request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

use crate::catalog::CatalogProduct;
use crate::domain::{DeliveryInfo, Order, OrderItem, OrderStatus};
use crate::ProductId;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub product_id: ProductId,
    pub quantity: i32,
}

/// All delivery fields must be present when an order is placed.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemRequest>,
    #[validate(required, length(max = 255))]
    pub contact_info: Option<String>,
    #[validate(required, length(max = 100))]
    pub country: Option<String>,
    #[validate(required, length(max = 100))]
    pub city: Option<String>,
    #[validate(required, length(max = 100))]
    pub first_name: Option<String>,
    #[validate(required, length(max = 100))]
    pub last_name: Option<String>,
    #[validate(required, length(max = 500))]
    pub delivery_address: Option<String>,
    #[validate(required, length(max = 20))]
    pub zip_code: Option<String>,
}

impl CreateOrderRequest {
    pub fn item_pairs(&self) -> Vec<(ProductId, i32)> {
        self.items.iter().map(|i| (i.product_id, i.quantity)).collect()
    }

    pub fn delivery(&self) -> DeliveryInfo {
        DeliveryInfo {
            contact_info: self.contact_info.clone(),
            country: self.country.clone(),
            city: self.city.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            delivery_address: self.delivery_address.clone(),
            zip_code: self.zip_code.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: ProductId,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub email: Option<String>,
    pub statuses: Option<String>,
    pub sort: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductOut {
    pub id: ProductId,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub img_url: Option<String>,
}

impl From<&CatalogProduct> for ProductOut {
    fn from(p: &CatalogProduct) -> Self {
        Self { id: p.id, kind: p.kind.clone(), size: p.size.clone(), color: p.color.clone(), img_url: p.img_url.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemOut {
    pub id: Uuid,
    pub quantity: i32,
    pub amount: Option<i64>,
    /// `None` once the product has been removed from the catalog.
    pub product: Option<ProductOut>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderOut {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: OrderStatus,
    pub user_id: Uuid,
    pub total_amount: i64,
    #[serde(flatten)]
    pub delivery: DeliveryInfo,
    pub items: Vec<OrderItemOut>,
}

impl OrderOut {
    pub fn from_order(order: &Order, products: &HashMap<ProductId, CatalogProduct>) -> Self {
        let item = |i: &OrderItem| OrderItemOut {
            id: i.id, quantity: i.quantity, amount: i.amount, product: products.get(&i.product_id).map(ProductOut::from),
        };
        Self {
            id: order.id(),
            created_at: order.created_at(),
            status: order.status(),
            user_id: order.owner(),
            total_amount: order.total_amount(),
            delivery: order.delivery().clone(),
            items: order.items().iter().map(item).collect(),
        }
    }
}
