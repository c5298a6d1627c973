//! Access rules between customers, administrators and orders.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::Order;
use crate::{OrderError, Result};

/// The acting user, as vouched for by the identity layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub is_administrator: bool,
}

impl Principal {
    pub fn customer(id: Uuid) -> Self { Self { id, is_administrator: false } }
    pub fn administrator(id: Uuid) -> Self { Self { id, is_administrator: true } }
}

pub fn can_read(principal: &Principal, order: &Order) -> bool {
    principal.is_administrator || order.owner() == principal.id
}

/// Mutating an existing order is reserved for administrators. Creating one is
/// open to any authenticated principal and is not gated here.
pub fn can_mutate(principal: &Principal, _order: &Order) -> bool {
    principal.is_administrator
}

pub fn ensure_can_read(principal: &Principal, order: &Order) -> Result<()> {
    if can_read(principal, order) { Ok(()) } else { Err(OrderError::Forbidden) }
}

pub fn ensure_can_mutate(principal: &Principal, order: &Order) -> Result<()> {
    if can_mutate(principal, order) { Ok(()) } else { Err(OrderError::Forbidden) }
}

/// Role check for operations that must not reveal whether an order exists.
pub fn ensure_administrator(principal: &Principal) -> Result<()> {
    if principal.is_administrator { Ok(()) } else { Err(OrderError::Forbidden) }
}
