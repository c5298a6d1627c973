//! Persistence of order aggregates.
//!
//! Every call is one atomic unit: an order is written together with its items,
//! read back together with its items, and deleted together with its items.

mod memory;
mod postgres;

pub use memory::InMemoryOrderStore;
pub use postgres::PgOrderStore;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::Order;
use crate::{OrderError, Result};

/// Change applied to a locked order by [`OrderStore::update`].
pub type Mutation<'a> = Box<dyn FnOnce(&mut Order) -> Result<()> + Send + 'a>;

/// Filters accepted by [`OrderStore::list_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    /// Case-insensitive substring of the owner's email.
    pub email: Option<String>,
    /// Allowed status names; empty means any.
    pub statuses: Vec<String>,
}

impl OrderFilter {
    /// Builds a filter from raw query values. `statuses` is comma separated.
    pub fn from_query(email: Option<&str>, statuses: Option<&str>) -> Self {
        let email = email.map(str::trim).filter(|e| !e.is_empty()).map(str::to_string);
        let statuses = statuses
            .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        Self { email, statuses }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderSort {
    TotalAsc,
    TotalDesc,
    CreatedAsc,
    CreatedDesc,
    #[default]
    NewestId,
}

impl OrderSort {
    /// Unknown or missing values select the default ordering.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("total_asc") => Self::TotalAsc,
            Some("total_desc") => Self::TotalDesc,
            Some("created_asc") => Self::CreatedAsc,
            Some("created_desc") => Self::CreatedDesc,
            _ => Self::NewestId,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 200;

    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self { Self::new(None, None) }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order and all of its items.
    async fn create(&self, order: &Order) -> Result<()>;

    async fn get_with_items(&self, id: Uuid) -> Result<Option<Order>>;

    /// Orders owned by `owner`, newest created first.
    async fn list_by_owner(&self, owner: Uuid, page: Page) -> Result<Vec<Order>>;

    async fn list_all(&self, filter: &OrderFilter, sort: OrderSort, page: Page) -> Result<Vec<Order>>;

    /// Loads the order under a write lock, applies `mutation` and persists the
    /// result in the same transaction. Nothing is written when `mutation` fails.
    /// Fails with `NotFound` when the order does not exist.
    async fn update(&self, id: Uuid, mutation: Mutation<'_>) -> Result<Order>;

    /// Deletes the order and its items. Returns `false` if it did not exist.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// Bounds a storage call so an unresponsive database surfaces as an error.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| OrderError::StorageUnavailable(format!("storage call exceeded {timeout:?}")))?
}
