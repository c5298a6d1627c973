use async_trait::async_trait;
use std::cmp::Reverse;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Mutation, OrderFilter, OrderSort, OrderStore, Page};
use crate::domain::Order;
use crate::{OrderError, Result};

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    emails: HashMap<Uuid, String>,
}

/// Order store held in process memory. Each call takes the lock once, so calls
/// are atomic with respect to each other.
#[derive(Default)]
pub struct InMemoryOrderStore {
    state: RwLock<State>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self { Self::default() }

    /// Records the email of a user so `list_all` can filter on it.
    pub async fn register_user(&self, id: Uuid, email: impl Into<String>) {
        self.state.write().await.emails.insert(id, email.into());
    }

    pub async fn len(&self) -> usize { self.state.read().await.orders.len() }

    pub async fn is_empty(&self) -> bool { self.len().await == 0 }
}

fn detached(order: &Order) -> Order {
    let mut copy = order.clone();
    copy.take_events();
    copy
}

fn sort_orders(orders: &mut [Order], sort: OrderSort) {
    match sort {
        OrderSort::TotalAsc => orders.sort_by_key(|o| (o.total_amount(), Reverse(o.id()))),
        OrderSort::TotalDesc => orders.sort_by_key(|o| (Reverse(o.total_amount()), Reverse(o.id()))),
        OrderSort::CreatedAsc => orders.sort_by_key(|o| (o.created_at(), o.id())),
        OrderSort::CreatedDesc => orders.sort_by_key(|o| Reverse((o.created_at(), o.id()))),
        OrderSort::NewestId => orders.sort_by_key(|o| Reverse(o.id())),
    }
}

fn paginate(orders: Vec<Order>, page: Page) -> Vec<Order> {
    orders.into_iter().skip(page.offset as usize).take(page.limit as usize).collect()
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: &Order) -> Result<()> {
        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.id()) {
            return Err(OrderError::StorageUnavailable(format!("duplicate order id {}", order.id())));
        }
        state.orders.insert(order.id(), detached(order));
        Ok(())
    }

    async fn get_with_items(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn list_by_owner(&self, owner: Uuid, page: Page) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state.orders.values().filter(|o| o.owner() == owner).cloned().collect();
        sort_orders(&mut orders, OrderSort::CreatedDesc);
        Ok(paginate(orders, page))
    }

    async fn list_all(&self, filter: &OrderFilter, sort: OrderSort, page: Page) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let needle = filter.email.as_ref().map(|e| e.to_lowercase());
        let mut orders: Vec<Order> = state.orders.values()
            .filter(|o| match &needle {
                Some(needle) => state.emails.get(&o.owner()).is_some_and(|e| e.to_lowercase().contains(needle)),
                None => true,
            })
            .filter(|o| filter.statuses.is_empty() || filter.statuses.iter().any(|s| s == o.status().as_str()))
            .cloned()
            .collect();
        sort_orders(&mut orders, sort);
        Ok(paginate(orders, page))
    }

    async fn update(&self, id: Uuid, mutation: Mutation<'_>) -> Result<Order> {
        let mut state = self.state.write().await;
        let slot = state.orders.get_mut(&id).ok_or(OrderError::NotFound("Order"))?;
        let mut order = slot.clone();
        mutation(&mut order)?;
        *slot = detached(&order);
        Ok(order)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.state.write().await.orders.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::NewLine;
    use crate::domain::{DeliveryInfo, OrderItem, OrderStatus, Quantity};
    use chrono::{Duration, Utc};

    fn order(owner: Uuid, total: i64, minutes_ago: i64, status: OrderStatus) -> Order {
        let item = OrderItem { id: Uuid::now_v7(), product_id: 1, quantity: 1, amount: Some(total) };
        Order::restore(Uuid::now_v7(), owner, status, DeliveryInfo::default(), Utc::now() - Duration::minutes(minutes_ago), vec![item])
    }

    #[tokio::test]
    async fn test_create_strips_pending_events() {
        let store = InMemoryOrderStore::new();
        let line = NewLine { product_id: 1, quantity: Quantity::new(1).unwrap(), unit_price: 5 };
        let created = Order::create(Uuid::now_v7(), DeliveryInfo::default(), vec![line]).unwrap();
        store.create(&created).await.unwrap();
        let mut loaded = store.get_with_items(created.id()).await.unwrap().unwrap();
        assert!(loaded.take_events().is_empty());
        assert!(store.create(&created).await.is_err());
    }

    #[tokio::test]
    async fn test_list_by_owner_is_scoped_and_newest_first() {
        let store = InMemoryOrderStore::new();
        let (alice, bob) = (Uuid::now_v7(), Uuid::now_v7());
        let old = order(alice, 10, 30, OrderStatus::Pending);
        let new = order(alice, 20, 1, OrderStatus::Pending);
        store.create(&old).await.unwrap();
        store.create(&new).await.unwrap();
        store.create(&order(bob, 30, 5, OrderStatus::Pending)).await.unwrap();

        let listed = store.list_by_owner(alice, Page::default()).await.unwrap();
        assert_eq!(listed.iter().map(|o| o.id()).collect::<Vec<_>>(), vec![new.id(), old.id()]);
        let second = store.list_by_owner(alice, Page::new(Some(1), Some(1))).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id(), old.id());
    }

    #[tokio::test]
    async fn test_list_all_filters_and_sorts() {
        let store = InMemoryOrderStore::new();
        let (alice, bob) = (Uuid::now_v7(), Uuid::now_v7());
        store.register_user(alice, "Alice@Example.com").await;
        store.register_user(bob, "bob@example.org").await;
        store.create(&order(alice, 300, 3, OrderStatus::Paid)).await.unwrap();
        store.create(&order(alice, 100, 2, OrderStatus::Shipped)).await.unwrap();
        store.create(&order(bob, 200, 1, OrderStatus::Paid)).await.unwrap();

        let by_email = OrderFilter::from_query(Some("alice@EXAMPLE"), None);
        let totals = |orders: Vec<Order>| orders.iter().map(|o| o.total_amount()).collect::<Vec<_>>();
        assert_eq!(totals(store.list_all(&by_email, OrderSort::TotalAsc, Page::default()).await.unwrap()), vec![100, 300]);

        let paid = OrderFilter::from_query(None, Some("paid"));
        assert_eq!(totals(store.list_all(&paid, OrderSort::TotalDesc, Page::default()).await.unwrap()), vec![300, 200]);

        let all = OrderFilter::default();
        assert_eq!(totals(store.list_all(&all, OrderSort::CreatedAsc, Page::default()).await.unwrap()), vec![300, 100, 200]);
        assert_eq!(totals(store.list_all(&all, OrderSort::CreatedDesc, Page::default()).await.unwrap()), vec![200, 100, 300]);
        assert_eq!(store.list_all(&all, OrderSort::NewestId, Page::default()).await.unwrap().len(), 3);
    }

    fn complete() -> Mutation<'static> {
        Box::new(|o: &mut Order| -> Result<()> {
            o.set_status(OrderStatus::Completed);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = InMemoryOrderStore::new();
        let o = order(Uuid::now_v7(), 100, 0, OrderStatus::Pending);
        assert!(matches!(store.update(o.id(), complete()).await, Err(OrderError::NotFound(_))));
        store.create(&o).await.unwrap();

        let mut updated = store.update(o.id(), complete()).await.unwrap();
        assert_eq!(updated.take_events().len(), 1);
        let mut stored = store.get_with_items(o.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Completed);
        assert!(stored.take_events().is_empty());

        assert!(store.delete(o.id()).await.unwrap());
        assert!(!store.delete(o.id()).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_mutation_writes_nothing() {
        let store = InMemoryOrderStore::new();
        let o = order(Uuid::now_v7(), 100, 0, OrderStatus::Pending);
        store.create(&o).await.unwrap();
        let item = o.items()[0].id;

        let failing: Mutation<'static> = Box::new(move |o: &mut Order| -> Result<()> {
            o.set_status(OrderStatus::Cancelled);
            o.remove_item(item)?;
            Err(OrderError::Validation("rejected".into()))
        });
        assert!(matches!(store.update(o.id(), failing).await, Err(OrderError::Validation(_))));

        let stored = store.get_with_items(o.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Pending);
        assert_eq!(stored.items().len(), 1);
    }
}
