//! Order domain: the aggregate, its pricing rules and access rules.
pub mod aggregates;
pub mod authorization;
pub mod events;
pub mod pricing;
pub mod value_objects;

pub use aggregates::{Order, OrderItem};
pub use authorization::Principal;
pub use events::OrderEvent;
pub use value_objects::{DeliveryField, DeliveryInfo, OrderStatus, Quantity};
