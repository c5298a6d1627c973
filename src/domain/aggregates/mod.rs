//! Aggregates module
pub mod order;

pub use order::{merge_requested_items, NewLine, Order, OrderItem};
