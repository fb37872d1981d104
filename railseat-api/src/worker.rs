use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use tracing::{error, info, warn};

use railseat_shared::AutoCancelRequested;
use railseat_ticket::TicketService;

/// Consumes auto-cancel requests and closes orders still unpaid at `fire_at`.
///
/// Messages are handled one at a time and the offset is committed only after
/// the cancel has run, so a restart redelivers every request still waiting.
/// Requests share one delay and arrive in `fire_at` order, so waiting on the
/// head of the partition does not delay the ones behind it.
pub async fn start_auto_cancel_worker(
    brokers: String,
    group_id: String,
    topic: String,
    tickets: Arc<TicketService>,
) -> Result<(), KafkaError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .set("group.id", &group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()?;

    consumer.subscribe(&[topic.as_str()])?;

    info!(topic = %topic, "Auto-cancel worker started");

    loop {
        match consumer.recv().await {
            Err(e) => error!("Kafka error: {}", e),
            Ok(m) => {
                if let Some(event) = decode_auto_cancel(m.payload()) {
                    process_auto_cancel(&tickets, event).await;
                }
                // Malformed payloads are committed too; redelivery cannot fix them.
                if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                    error!(offset = m.offset(), error = %e, "Failed to commit auto-cancel offset");
                }
            }
        }
    }
}

/// Parses one message payload; `None` for anything that is not an auto-cancel request.
pub fn decode_auto_cancel(payload: Option<&[u8]>) -> Option<AutoCancelRequested> {
    let Some(payload) = payload else {
        warn!("Auto-cancel message without payload");
        return None;
    };
    match serde_json::from_slice::<AutoCancelRequested>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Skipping malformed auto-cancel payload: {}", e);
            None
        }
    }
}

/// Sleeps until the event is due, then cancels the order if it is still unpaid.
/// Returns whether an order was cancelled.
pub async fn process_auto_cancel(tickets: &TicketService, event: AutoCancelRequested) -> bool {
    let wait = event.remaining_millis(chrono::Utc::now().timestamp_millis());
    if wait > 0 {
        tokio::time::sleep(Duration::from_millis(wait)).await;
    }

    match tickets.cancel_if_unpaid(&event.order_reference).await {
        Ok(true) => {
            info!(order = %event.order_reference, train_id = %event.train_id, "Unpaid order auto-cancelled");
            true
        }
        Ok(false) => false,
        Err(e) => {
            error!(order = %event.order_reference, error = %e, "Auto-cancel failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railseat_shared::OrderReference;

    #[test]
    fn test_decode_auto_cancel() {
        let event = AutoCancelRequested {
            order_reference: OrderReference("T-1".into()),
            train_id: "D12".into(),
            fire_at: 1_700_000_000_000,
        };
        let bytes = serde_json::to_vec(&event).unwrap();
        assert_eq!(decode_auto_cancel(Some(bytes.as_slice())), Some(event));

        assert!(decode_auto_cancel(Some(b"not json".as_slice())).is_none());
        assert!(decode_auto_cancel(None).is_none());
    }
}
