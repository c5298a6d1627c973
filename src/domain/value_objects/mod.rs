//! Value Objects for orders

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::OrderError;

/// Line-item quantity, always at least one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Quantity(i32);

impl Quantity {
    pub fn new(value: i32) -> Result<Self, OrderError> {
        if value < 1 { return Err(OrderError::InvalidQuantity(value)); }
        Ok(Self(value))
    }
    pub fn value(&self) -> i32 { self.0 }
    /// Sum of both quantities, or `None` if it does not fit in an `i32`.
    pub fn checked_add(&self, other: Quantity) -> Option<Self> { self.0.checked_add(other.0).map(Self) }
}

impl TryFrom<i32> for Quantity {
    type Error = OrderError;
    fn try_from(value: i32) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<Quantity> for i32 {
    fn from(q: Quantity) -> Self { q.0 }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Closed set of order states. Any state may follow any other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Paid,
    Shipped,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        Self::Pending, Self::Processing, Self::Paid, Self::Shipped,
        Self::Completed, Self::Cancelled, Self::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.iter().copied().find(|st| st.as_str() == s)
            .ok_or_else(|| OrderError::UnsupportedStatus(s.to_string()))
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Delivery data attached to an order. Absent values stay `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryInfo {
    pub contact_info: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub delivery_address: Option<String>,
    pub zip_code: Option<String>,
}

/// The delivery attributes an administrator is allowed to overwrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryField {
    ContactInfo,
    Country,
    City,
    FirstName,
    LastName,
    DeliveryAddress,
    ZipCode,
}

impl DeliveryField {
    /// Accepts both the camelCase wire name and the snake_case column name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "contactInfo" | "contact_info" => Some(Self::ContactInfo),
            "country" => Some(Self::Country),
            "city" => Some(Self::City),
            "firstName" | "first_name" => Some(Self::FirstName),
            "lastName" | "last_name" => Some(Self::LastName),
            "deliveryAddress" | "delivery_address" => Some(Self::DeliveryAddress),
            "zipCode" | "zip_code" => Some(Self::ZipCode),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContactInfo => "contactInfo",
            Self::Country => "country",
            Self::City => "city",
            Self::FirstName => "firstName",
            Self::LastName => "lastName",
            Self::DeliveryAddress => "deliveryAddress",
            Self::ZipCode => "zipCode",
        }
    }
}

impl DeliveryInfo {
    pub fn set(&mut self, field: DeliveryField, value: Option<String>) {
        let slot = match field {
            DeliveryField::ContactInfo => &mut self.contact_info,
            DeliveryField::Country => &mut self.country,
            DeliveryField::City => &mut self.city,
            DeliveryField::FirstName => &mut self.first_name,
            DeliveryField::LastName => &mut self.last_name,
            DeliveryField::DeliveryAddress => &mut self.delivery_address,
            DeliveryField::ZipCode => &mut self.zip_code,
        };
        *slot = value;
    }
}
