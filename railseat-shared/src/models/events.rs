use crate::models::ticket::OrderReference;

/// Deferred "cancel if still unpaid" notification, delivered at least once.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct AutoCancelRequested {
    pub order_reference: OrderReference,
    pub train_id: String,
    /// Unix milliseconds after which the order may be closed.
    pub fire_at: i64,
}

impl AutoCancelRequested {
    pub fn new(order_reference: OrderReference, train_id: String, delay_seconds: u64) -> Self {
        let fire_at = chrono::Utc::now().timestamp_millis() + (delay_seconds as i64) * 1000;
        Self {
            order_reference,
            train_id,
            fire_at,
        }
    }

    pub fn remaining_millis(&self, now_millis: i64) -> u64 {
        (self.fire_at - now_millis).max(0) as u64
    }
}
