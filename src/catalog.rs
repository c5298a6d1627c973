//! Read-only access to the product catalog owned by the catalog service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::store::with_timeout;
use crate::{ProductId, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CatalogProduct {
    pub id: ProductId,
    /// Current unit price in minor units; `None` prices as zero.
    pub price: Option<i64>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub img_url: Option<String>,
}

impl CatalogProduct {
    pub fn priced(id: ProductId, price: i64) -> Self {
        Self { id, price: Some(price), kind: None, size: None, color: None, img_url: None }
    }
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn get_by_id(&self, id: ProductId) -> Result<Option<CatalogProduct>>;

    /// Products that exist among `ids`; absent ids are simply not returned.
    async fn get_many_by_ids(&self, ids: &[ProductId]) -> Result<Vec<CatalogProduct>>;
}

const PRODUCT_COLUMNS: &str = "id, price, type, size, color, img_url";

pub struct PgCatalog {
    db: PgPool,
    timeout: Duration,
}

impl PgCatalog {
    pub fn new(db: PgPool, timeout: Duration) -> Self { Self { db, timeout } }

    async fn fetch_one(&self, id: ProductId) -> Result<Option<CatalogProduct>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        Ok(sqlx::query_as::<_, CatalogProduct>(&sql).bind(id).fetch_optional(&self.db).await?)
    }

    async fn fetch_many(&self, ids: &[ProductId]) -> Result<Vec<CatalogProduct>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)");
        Ok(sqlx::query_as::<_, CatalogProduct>(&sql).bind(ids).fetch_all(&self.db).await?)
    }
}

#[async_trait]
impl ProductCatalog for PgCatalog {
    async fn get_by_id(&self, id: ProductId) -> Result<Option<CatalogProduct>> {
        with_timeout(self.timeout, self.fetch_one(id)).await
    }

    async fn get_many_by_ids(&self, ids: &[ProductId]) -> Result<Vec<CatalogProduct>> {
        if ids.is_empty() { return Ok(vec![]); }
        with_timeout(self.timeout, self.fetch_many(ids)).await
    }
}

/// Catalog held in process memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, CatalogProduct>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self { Self::default() }

    pub async fn upsert(&self, product: CatalogProduct) {
        self.products.write().await.insert(product.id, product);
    }

    pub async fn set_price(&self, id: ProductId, price: Option<i64>) {
        if let Some(p) = self.products.write().await.get_mut(&id) { p.price = price; }
    }

    pub async fn remove(&self, id: ProductId) {
        self.products.write().await.remove(&id);
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn get_by_id(&self, id: ProductId) -> Result<Option<CatalogProduct>> {
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn get_many_by_ids(&self, ids: &[ProductId]) -> Result<Vec<CatalogProduct>> {
        let products = self.products.read().await;
        Ok(ids.iter().filter_map(|id| products.get(id).cloned()).collect())
    }
}
