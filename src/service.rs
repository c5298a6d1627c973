//! Order lifecycle: creation, reads, and administrator edits.
//!
//! Every edit runs inside one `OrderStore::update` call: the store locks and
//! loads the aggregate, the edit validates and mutates it, and the store
//! persists it before releasing the lock. Events raised by the aggregate are
//! published only after that call succeeds.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{CatalogProduct, ProductCatalog};
use crate::domain::aggregates::{merge_requested_items, NewLine};
use crate::domain::authorization::{ensure_administrator, ensure_can_mutate, ensure_can_read};
use crate::domain::{pricing, DeliveryField, DeliveryInfo, Order, OrderEvent, OrderStatus, Principal, Quantity};
use crate::publisher::EventPublisher;
use crate::store::{Mutation, OrderFilter, OrderSort, OrderStore, Page};
use crate::{OrderError, ProductId, Result};

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    catalog: Arc<dyn ProductCatalog>,
    publisher: EventPublisher,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, catalog: Arc<dyn ProductCatalog>, publisher: EventPublisher) -> Self {
        Self { store, catalog, publisher }
    }

    /// Creates an order owned by `requester`. Nothing is written unless every
    /// referenced product exists.
    #[tracing::instrument(skip(self, requester, items, delivery), fields(requester = %requester.id))]
    pub async fn create_order(&self, requester: &Principal, items: &[(ProductId, i32)], delivery: DeliveryInfo) -> Result<Order> {
        let merged = merge_requested_items(items)?;
        let ids: Vec<ProductId> = merged.keys().copied().collect();
        let prices: HashMap<ProductId, Option<i64>> = self.catalog.get_many_by_ids(&ids).await?
            .into_iter().map(|p| (p.id, p.price)).collect();

        let missing: Vec<ProductId> = ids.iter().copied().filter(|id| !prices.contains_key(id)).collect();
        if !missing.is_empty() {
            warn!(?missing, "order references unknown products");
            return Err(OrderError::ProductsNotFound(missing));
        }

        let lines = merged.into_iter()
            .map(|(product_id, quantity)| NewLine {
                product_id, quantity, unit_price: prices.get(&product_id).copied().flatten().unwrap_or(0),
            })
            .collect();
        let mut order = Order::create(requester.id, delivery, lines)?;
        self.store.create(&order).await?;
        info!(order_id = %order.id(), total = order.total_amount(), items = order.items().len(), "order created");
        self.publisher.publish_all(order.take_events()).await;
        Ok(order)
    }

    /// Existence is checked before access, so a stranger learns that the id exists.
    #[tracing::instrument(skip(self, requester), fields(requester = %requester.id))]
    pub async fn get_order_secure(&self, requester: &Principal, order_id: Uuid) -> Result<Order> {
        let order = self.load(order_id).await?;
        ensure_can_read(requester, &order).inspect_err(|_| warn!("read of foreign order refused"))?;
        Ok(order)
    }

    pub async fn list_orders_for_user(&self, requester: &Principal, page: Page) -> Result<Vec<Order>> {
        self.store.list_by_owner(requester.id, page).await
    }

    #[tracing::instrument(skip(self, requester), fields(requester = %requester.id))]
    pub async fn list_all_orders(&self, requester: &Principal, filter: &OrderFilter, sort: OrderSort, page: Page) -> Result<Vec<Order>> {
        ensure_administrator(requester)?;
        self.store.list_all(filter, sort, page).await
    }

    /// Adds units of a product. An existing line keeps its quoted unit price, a
    /// new line is priced from the catalog.
    #[tracing::instrument(skip(self, requester), fields(requester = %requester.id))]
    pub async fn admin_add_item(&self, requester: &Principal, order_id: Uuid, product_id: ProductId, quantity: i32) -> Result<Order> {
        ensure_administrator(requester)?;
        let product = self.catalog.get_by_id(product_id).await?;
        self.apply(requester, order_id, Box::new(move |order: &mut Order| -> Result<()> {
            let quantity = Quantity::new(quantity)?;
            let product = product.ok_or_else(|| OrderError::ProductsNotFound(vec![product_id]))?;
            let item_id = order.add_product(product_id, quantity, product.price)?;
            info!(%item_id, product_id, "item added to order");
            Ok(())
        }))
        .await
    }

    #[tracing::instrument(skip(self, requester), fields(requester = %requester.id))]
    pub async fn admin_update_item_quantity(&self, requester: &Principal, order_id: Uuid, item_id: Uuid, quantity: i32) -> Result<Order> {
        ensure_administrator(requester)?;
        let product_id = self.load(order_id).await?
            .item(item_id)
            .map(|i| i.product_id)
            .ok_or(OrderError::NotFound("Order item"))?;
        let product = self.catalog.get_by_id(product_id).await?;

        self.apply(requester, order_id, Box::new(move |order: &mut Order| -> Result<()> {
            let item = order.item(item_id).ok_or(OrderError::NotFound("Order item"))?;
            Quantity::new(quantity)?;
            let live_price = if pricing::needs_live_price(item) || quantity > item.quantity {
                product.as_ref().ok_or_else(|| OrderError::ProductsNotFound(vec![product_id]))?.price
            } else {
                None
            };
            order.set_item_quantity(item_id, quantity, live_price)?;
            info!(%item_id, quantity, "order item quantity changed");
            Ok(())
        }))
        .await
    }

    #[tracing::instrument(skip(self, requester), fields(requester = %requester.id))]
    pub async fn admin_remove_item(&self, requester: &Principal, order_id: Uuid, item_id: Uuid) -> Result<Order> {
        ensure_administrator(requester)?;
        self.apply(requester, order_id, Box::new(move |order: &mut Order| -> Result<()> {
            order.remove_item(item_id)?;
            info!(%item_id, remaining = order.items().len(), "order item removed");
            Ok(())
        }))
        .await
    }

    #[tracing::instrument(skip(self, requester), fields(requester = %requester.id))]
    pub async fn admin_delete_order(&self, requester: &Principal, order_id: Uuid) -> Result<()> {
        ensure_administrator(requester)?;
        if !self.store.delete(order_id).await? {
            return Err(OrderError::NotFound("Order"));
        }
        info!("order deleted");
        self.publisher.publish_all(vec![OrderEvent::Deleted { order_id }]).await;
        Ok(())
    }

    /// Sets any status from the closed set, whatever the current one is.
    #[tracing::instrument(skip(self, requester), fields(requester = %requester.id))]
    pub async fn admin_update_status(&self, requester: &Principal, order_id: Uuid, status: &str) -> Result<Order> {
        ensure_administrator(requester)?;
        let status: OrderStatus = status.parse()?;
        self.apply(requester, order_id, Box::new(move |order: &mut Order| -> Result<()> {
            info!(from = %order.status(), to = %status, "order status changed");
            order.set_status(status);
            Ok(())
        }))
        .await
    }

    /// Overwrites the allow-listed delivery fields present in `fields`. Other
    /// keys are ignored.
    #[tracing::instrument(skip(self, requester, fields), fields(requester = %requester.id))]
    pub async fn admin_update_delivery(&self, requester: &Principal, order_id: Uuid, fields: &Map<String, Value>) -> Result<Order> {
        ensure_administrator(requester)?;
        self.apply(requester, order_id, Box::new(move |order: &mut Order| -> Result<()> {
            order.update_delivery(delivery_updates(fields)?);
            Ok(())
        }))
        .await
    }

    /// Catalog projections for every product referenced by `orders`.
    pub async fn products_for(&self, orders: &[Order]) -> Result<HashMap<ProductId, CatalogProduct>> {
        let mut ids: Vec<ProductId> = orders.iter().flat_map(|o| o.items().iter().map(|i| i.product_id)).collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(self.catalog.get_many_by_ids(&ids).await?.into_iter().map(|p| (p.id, p)).collect())
    }

    async fn load(&self, order_id: Uuid) -> Result<Order> {
        self.store.get_with_items(order_id).await?.ok_or(OrderError::NotFound("Order"))
    }

    /// Runs `mutation` against the locked order, then publishes what it raised.
    async fn apply(&self, requester: &Principal, order_id: Uuid, mutation: Mutation<'_>) -> Result<Order> {
        let requester = *requester;
        let gated: Mutation<'_> = Box::new(move |order: &mut Order| -> Result<()> {
            ensure_can_mutate(&requester, order)?;
            mutation(order)
        });
        let mut order = self.store.update(order_id, gated).await?;
        self.publisher.publish_all(order.take_events()).await;
        Ok(order)
    }
}

fn delivery_updates(fields: &Map<String, Value>) -> Result<Vec<(DeliveryField, Option<String>)>> {
    let mut updates = Vec::new();
    for (name, value) in fields {
        let Some(field) = DeliveryField::parse(name) else {
            tracing::debug!(field = %name, "ignoring unknown delivery field");
            continue;
        };
        let value = match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Array(_) | Value::Object(_) => {
                return Err(OrderError::Validation(format!("delivery field '{name}' must be text or null")));
            }
        };
        updates.push((field, value));
    }
    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::store::InMemoryOrderStore;
    use serde_json::json;

    struct Fixture {
        service: OrderService,
        store: Arc<InMemoryOrderStore>,
        catalog: Arc<InMemoryCatalog>,
        customer: Principal,
        admin: Principal,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryOrderStore::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        for (id, price) in [(1, 100), (2, 250), (7, 40), (9, 300)] {
            catalog.upsert(CatalogProduct::priced(id, price)).await;
        }
        let service = OrderService::new(store.clone(), catalog.clone(), EventPublisher::disabled());
        Fixture { service, store, catalog, customer: Principal::customer(Uuid::now_v7()), admin: Principal::administrator(Uuid::now_v7()) }
    }

    fn delivery() -> DeliveryInfo {
        DeliveryInfo { city: Some("Oslo".into()), zip_code: Some("0150".into()), ..Default::default() }
    }

    #[tokio::test]
    async fn test_create_merges_and_prices() {
        let f = fixture().await;
        let order = f.service.create_order(&f.customer, &[(7, 2), (1, 1), (7, 3)], delivery()).await.unwrap();
        assert_eq!(order.owner(), f.customer.id);
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.items().len(), 2);
        let seven = order.item_for_product(7).unwrap();
        assert_eq!((seven.quantity, seven.amount), (5, Some(200)));
        assert_eq!(order.total_amount(), 300);
        assert_eq!(order.delivery().country, None);

        let stored = f.store.get_with_items(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.total_amount(), 300);
    }

    #[tokio::test]
    async fn test_create_rejections_write_nothing() {
        let f = fixture().await;
        assert!(matches!(f.service.create_order(&f.customer, &[], delivery()).await, Err(OrderError::EmptyItems)));
        assert!(matches!(f.service.create_order(&f.customer, &[(1, 0)], delivery()).await, Err(OrderError::InvalidQuantity(0))));
        let err = f.service.create_order(&f.customer, &[(1, 1), (999, 1), (998, 2)], delivery()).await.unwrap_err();
        assert!(matches!(err, OrderError::ProductsNotFound(ref ids) if ids == &vec![998, 999]));
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_null_catalog_price_counts_as_zero() {
        let f = fixture().await;
        f.catalog.set_price(2, None).await;
        let order = f.service.create_order(&f.customer, &[(2, 3), (1, 1)], delivery()).await.unwrap();
        assert_eq!(order.item_for_product(2).unwrap().amount, Some(0));
        assert_eq!(order.total_amount(), 100);
    }

    #[tokio::test]
    async fn test_admin_operations_require_admin() {
        let f = fixture().await;
        let order = f.service.create_order(&f.customer, &[(1, 1)], delivery()).await.unwrap();
        let item = order.items()[0].id;
        let c = &f.customer;
        assert!(matches!(f.service.admin_add_item(c, order.id(), 2, 1).await, Err(OrderError::Forbidden)));
        assert!(matches!(f.service.admin_update_item_quantity(c, order.id(), item, 3).await, Err(OrderError::Forbidden)));
        assert!(matches!(f.service.admin_remove_item(c, order.id(), item).await, Err(OrderError::Forbidden)));
        assert!(matches!(f.service.admin_update_status(c, order.id(), "paid").await, Err(OrderError::Forbidden)));
        assert!(matches!(f.service.admin_update_delivery(c, order.id(), &Map::new()).await, Err(OrderError::Forbidden)));
        assert!(matches!(f.service.admin_delete_order(c, order.id()).await, Err(OrderError::Forbidden)));
        assert!(matches!(
            f.service.list_all_orders(c, &OrderFilter::default(), OrderSort::default(), Page::default()).await,
            Err(OrderError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_add_item_existing_keeps_price_new_uses_catalog() {
        let f = fixture().await;
        let order = f.service.create_order(&f.customer, &[(1, 5)], delivery()).await.unwrap();
        f.catalog.set_price(1, Some(999)).await;

        let order = f.service.admin_add_item(&f.admin, order.id(), 1, 3).await.unwrap();
        assert_eq!(order.items().len(), 1);
        assert_eq!(order.items()[0].amount, Some(800));

        let order = f.service.admin_add_item(&f.admin, order.id(), 9, 4).await.unwrap();
        assert_eq!(order.item_for_product(9).unwrap().amount, Some(1200));
        assert_eq!(order.total_amount(), 2000);

        assert!(matches!(f.service.admin_add_item(&f.admin, order.id(), 404, 1).await, Err(OrderError::ProductsNotFound(ref ids)) if ids == &vec![404]));
        assert!(matches!(f.service.admin_add_item(&f.admin, order.id(), 1, 0).await, Err(OrderError::InvalidQuantity(0))));
        assert!(matches!(f.service.admin_add_item(&f.admin, Uuid::now_v7(), 1, 1).await, Err(OrderError::NotFound("Order"))));
        assert_eq!(f.store.get_with_items(order.id()).await.unwrap().unwrap().total_amount(), 2000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_of_same_product_all_land() {
        let f = fixture().await;
        let order = f.service.create_order(&f.customer, &[(1, 1)], delivery()).await.unwrap();
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let (service, admin, id) = (f.service.clone(), f.admin, order.id());
                tokio::spawn(async move { service.admin_add_item(&admin, id, 9, 1).await })
            })
            .collect();
        for task in tasks { task.await.unwrap().unwrap(); }

        let stored = f.store.get_with_items(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.items().len(), 2);
        assert_eq!(stored.item_for_product(9).unwrap().quantity, 16);
        assert_eq!(stored.total_amount(), 100 + 16 * 300);
    }

    #[tokio::test]
    async fn test_concurrent_remove_and_status_change_keep_both() {
        let f = fixture().await;
        let order = f.service.create_order(&f.customer, &[(1, 1), (2, 1)], delivery()).await.unwrap();
        let removed = order.item_for_product(1).unwrap().id;
        let (a, b) = tokio::join!(
            f.service.admin_remove_item(&f.admin, order.id(), removed),
            f.service.admin_update_status(&f.admin, order.id(), "paid"),
        );
        a.unwrap();
        b.unwrap();

        let stored = f.store.get_with_items(order.id()).await.unwrap().unwrap();
        assert!(stored.item(removed).is_none());
        assert_eq!(stored.status(), OrderStatus::Paid);
        assert_eq!(stored.total_amount(), 250);
    }

    #[tokio::test]
    async fn test_negative_catalog_price_counts_as_zero() {
        let f = fixture().await;
        f.catalog.set_price(7, Some(-40)).await;
        let order = f.service.create_order(&f.customer, &[(7, 2), (1, 1)], delivery()).await.unwrap();
        assert_eq!(order.item_for_product(7).unwrap().amount, Some(0));
        let order = f.service.admin_add_item(&f.admin, order.id(), 7, 1).await.unwrap();
        assert_eq!(order.total_amount(), 100);
        assert!(order.items().iter().all(|i| i.amount.unwrap_or(0) >= 0));
    }

    #[tokio::test]
    async fn test_update_quantity_preserves_unit_price() {
        let f = fixture().await;
        let order = f.service.create_order(&f.customer, &[(1, 5)], delivery()).await.unwrap();
        let item = order.items()[0].id;
        f.catalog.set_price(1, Some(7)).await;

        let order = f.service.admin_update_item_quantity(&f.admin, order.id(), item, 8).await.unwrap();
        assert_eq!(order.items()[0].amount, Some(800));
        let order = f.service.admin_update_item_quantity(&f.admin, order.id(), item, 2).await.unwrap();
        assert_eq!(order.total_amount(), 200);

        assert!(matches!(f.service.admin_update_item_quantity(&f.admin, order.id(), item, 0).await, Err(OrderError::InvalidQuantity(0))));
        assert!(matches!(
            f.service.admin_update_item_quantity(&f.admin, order.id(), Uuid::now_v7(), 1).await,
            Err(OrderError::NotFound("Order item"))
        ));
    }

    #[tokio::test]
    async fn test_increase_of_vanished_product_is_rejected() {
        let f = fixture().await;
        let order = f.service.create_order(&f.customer, &[(1, 2)], delivery()).await.unwrap();
        let item = order.items()[0].id;
        f.catalog.remove(1).await;

        assert!(matches!(f.service.admin_update_item_quantity(&f.admin, order.id(), item, 3).await, Err(OrderError::ProductsNotFound(_))));
        let order = f.service.admin_update_item_quantity(&f.admin, order.id(), item, 1).await.unwrap();
        assert_eq!(order.total_amount(), 100);
    }

    #[tokio::test]
    async fn test_remove_last_item_leaves_empty_order() {
        let f = fixture().await;
        let order = f.service.create_order(&f.customer, &[(2, 1)], delivery()).await.unwrap();
        let order = f.service.admin_remove_item(&f.admin, order.id(), order.items()[0].id).await.unwrap();
        assert!(order.items().is_empty());
        assert_eq!(order.total_amount(), 0);
        let stored = f.store.get_with_items(order.id()).await.unwrap().unwrap();
        assert!(stored.items().is_empty());
        assert!(matches!(f.service.admin_remove_item(&f.admin, order.id(), Uuid::now_v7()).await, Err(OrderError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_status_and_delete() {
        let f = fixture().await;
        let order = f.service.create_order(&f.customer, &[(1, 1)], delivery()).await.unwrap();
        assert!(matches!(f.service.admin_update_status(&f.admin, order.id(), "bogus").await, Err(OrderError::UnsupportedStatus(_))));
        for status in ["completed", "shipped", "pending", "refunded"] {
            let o = f.service.admin_update_status(&f.admin, order.id(), status).await.unwrap();
            assert_eq!(o.status().as_str(), status);
        }
        f.service.admin_delete_order(&f.admin, order.id()).await.unwrap();
        assert!(matches!(f.service.get_order_secure(&f.admin, order.id()).await, Err(OrderError::NotFound(_))));
        assert!(matches!(f.service.admin_delete_order(&f.admin, order.id()).await, Err(OrderError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delivery_update_allow_list() {
        let f = fixture().await;
        let order = f.service.create_order(&f.customer, &[(1, 1)], delivery()).await.unwrap();
        let fields = json!({"city": "Bergen", "zip_code": 5003, "contactInfo": "+47 1234", "status": "paid", "owner": "x"});
        let order = f.service.admin_update_delivery(&f.admin, order.id(), fields.as_object().unwrap()).await.unwrap();
        assert_eq!(order.delivery().city.as_deref(), Some("Bergen"));
        assert_eq!(order.delivery().zip_code.as_deref(), Some("5003"));
        assert_eq!(order.delivery().contact_info.as_deref(), Some("+47 1234"));
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.owner(), f.customer.id);

        let cleared = json!({"city": null});
        let order = f.service.admin_update_delivery(&f.admin, order.id(), cleared.as_object().unwrap()).await.unwrap();
        assert_eq!(order.delivery().city, None);

        let bad = json!({"country": ["NO"]});
        assert!(matches!(f.service.admin_update_delivery(&f.admin, order.id(), bad.as_object().unwrap()).await, Err(OrderError::Validation(_))));
    }

    #[tokio::test]
    async fn test_products_for_collects_referenced_products() {
        let f = fixture().await;
        let a = f.service.create_order(&f.customer, &[(1, 1), (2, 1)], delivery()).await.unwrap();
        let b = f.service.create_order(&f.customer, &[(2, 1), (9, 1)], delivery()).await.unwrap();
        let products = f.service.products_for(&[a, b]).await.unwrap();
        let mut ids: Vec<_> = products.keys().copied().collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 9]);
    }
}
