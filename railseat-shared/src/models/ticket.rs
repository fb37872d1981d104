use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::train::SeatClass;

/// One passenger in a purchase batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassengerSeatRequest {
    pub passenger_id: String,
    pub seat_class: SeatClass,
    /// Ordered seat labels such as `01A`; best effort.
    #[serde(default)]
    pub preferred_seats: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub train_id: String,
    pub origin: String,
    pub destination: String,
    pub passengers: Vec<PassengerSeatRequest>,
    /// Batch-level preferences, applied to every seat-class group.
    #[serde(default)]
    pub preferred_seats: Vec<String>,
}

/// Passenger → (carriage, seat label, seat class).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Allocation {
    pub passenger_id: String,
    pub carriage_number: String,
    pub seat_label: String,
    pub seat_class: SeatClass,
}

/// Carriage of one seat class that still has free seats on a segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CarriageRemaining {
    pub carriage_number: String,
    pub remaining: u32,
}

/// Precomputed fare of one seat class on one segment, in cents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatPrice {
    pub seat_class: SeatClass,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatClassAvailability {
    pub seat_class: SeatClass,
    pub price: i64,
    pub remaining: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct OrderReference(pub String);

impl OrderReference {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Unpaid,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Unpaid => "UNPAID",
            OrderStatus::Paid => "PAID",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "UNPAID" => Some(OrderStatus::Unpaid),
            "PAID" => Some(OrderStatus::Paid),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketOrderItem {
    pub allocation: Allocation,
    pub amount: i64,
}

/// What the order-management collaborator receives for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketOrderRequest {
    pub train_id: String,
    pub origin: String,
    pub destination: String,
    pub items: Vec<TicketOrderItem>,
}

impl TicketOrderRequest {
    pub fn total_amount(&self) -> i64 {
        self.items.iter().map(|item| item.amount).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    pub reference: OrderReference,
    pub train_id: String,
    pub origin: String,
    pub destination: String,
    pub status: OrderStatus,
    pub items: Vec<TicketOrderItem>,
    pub created_at: DateTime<Utc>,
}

impl OrderDetail {
    pub fn allocations(&self) -> Vec<Allocation> {
        self.items.iter().map(|item| item.allocation.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseResponse {
    pub order_reference: OrderReference,
    pub items: Vec<TicketOrderItem>,
}
