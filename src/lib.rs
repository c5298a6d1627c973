//! Storefront Orders
//!
//! Order lifecycle and pricing engine for the storefront backend.
//!
//! ## Features
//! - Order creation from a list of product references, with duplicate merging
//! - Per-line price snapshots preserved across quantity edits
//! - Administrator edits: items, delivery data, status, deletion
//! - Owner/administrator access checks
//! - Postgres persistence and NATS event hand-off

pub mod api;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod publisher;
pub mod service;
pub mod store;

use thiserror::Error;

/// Key of a product in the external catalog.
pub type ProductId = i64;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum OrderError {
    #[error("Order must contain at least one item")]
    EmptyItems,

    #[error("Quantity must be >= 1, got {0}")]
    InvalidQuantity(i32),

    #[error("Products not found: {0:?}")]
    ProductsNotFound(Vec<ProductId>),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Forbidden")]
    Forbidden,

    #[error("Unsupported status '{0}'")]
    UnsupportedStatus(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl OrderError {
    /// Stable machine-readable code for this kind of failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyItems => "empty_items",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::ProductsNotFound(_) => "products_not_found",
            Self::NotFound(_) => "not_found",
            Self::Forbidden => "forbidden",
            Self::UnsupportedStatus(_) => "unsupported_status",
            Self::Validation(_) => "validation_error",
            Self::Unauthenticated => "unauthenticated",
            Self::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

impl From<sqlx::Error> for OrderError {
    fn from(e: sqlx::Error) -> Self { Self::StorageUnavailable(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, OrderError>;
