use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use railseat_core::{OrderGateway, StoreError, StoreResult};
use railseat_shared::{
    Allocation, OrderDetail, OrderReference, OrderStatus, SeatClass, TicketOrderItem,
    TicketOrderRequest,
};

use crate::database::db_error;

pub struct PgOrderGateway {
    pool: PgPool,
}

impl PgOrderGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Moves `Unpaid` orders to `to`. Returns the status found when the move was refused.
    async fn transition(
        &self,
        reference: &OrderReference,
        to: OrderStatus,
    ) -> StoreResult<Result<(), OrderStatus>> {
        let updated = sqlx::query(
            "UPDATE ticket_order SET status = $1, updated_at = NOW() WHERE order_reference = $2 AND status = $3",
        )
        .bind(to.as_str())
        .bind(reference.as_str())
        .bind(OrderStatus::Unpaid.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if updated.rows_affected() == 1 {
            return Ok(Ok(()));
        }
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM ticket_order WHERE order_reference = $1")
                .bind(reference.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        match current {
            None => Err(StoreError::NotFound(format!("order {}", reference))),
            Some(status) => Ok(Err(parse_status(&status)?)),
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_reference: String,
    train_id: String,
    departure: String,
    arrival: String,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    passenger_id: String,
    carriage_number: String,
    seat_number: String,
    seat_type: i16,
    amount: i64,
}

fn parse_status(value: &str) -> StoreResult<OrderStatus> {
    OrderStatus::parse(value).ok_or_else(|| StoreError::Backend(format!("unknown order status {}", value)))
}

#[async_trait]
impl OrderGateway for PgOrderGateway {
    async fn create_order(&self, request: &TicketOrderRequest) -> StoreResult<OrderReference> {
        let reference = OrderReference::generate();
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            r#"
            INSERT INTO ticket_order (order_reference, train_id, departure, arrival, status, total_amount)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(reference.as_str())
        .bind(&request.train_id)
        .bind(&request.origin)
        .bind(&request.destination)
        .bind(OrderStatus::Unpaid.as_str())
        .bind(request.total_amount())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        for item in &request.items {
            sqlx::query(
                r#"
                INSERT INTO ticket_order_item (order_reference, passenger_id, carriage_number, seat_number, seat_type, amount)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(reference.as_str())
            .bind(&item.allocation.passenger_id)
            .bind(&item.allocation.carriage_number)
            .bind(&item.allocation.seat_label)
            .bind(item.allocation.seat_class.code())
            .bind(item.amount)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        tracing::info!(order_reference = %reference, items = request.items.len(), "Ticket order created");
        Ok(reference)
    }

    async fn get_order(&self, reference: &OrderReference) -> StoreResult<Option<OrderDetail>> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT order_reference, train_id, departure, arrival, status, created_at
            FROM ticket_order WHERE order_reference = $1
            "#,
        )
        .bind(reference.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT passenger_id, carriage_number, seat_number, seat_type, amount
            FROM ticket_order_item WHERE order_reference = $1 ORDER BY id
            "#,
        )
        .bind(reference.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let items = items
            .into_iter()
            .map(|item| {
                let seat_class = SeatClass::from_code(item.seat_type).ok_or_else(|| {
                    StoreError::Backend(format!("unknown seat type {}", item.seat_type))
                })?;
                Ok(TicketOrderItem {
                    allocation: Allocation {
                        passenger_id: item.passenger_id,
                        carriage_number: item.carriage_number,
                        seat_label: item.seat_number,
                        seat_class,
                    },
                    amount: item.amount,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Some(OrderDetail {
            reference: OrderReference(row.order_reference),
            train_id: row.train_id,
            origin: row.departure,
            destination: row.arrival,
            status: parse_status(&row.status)?,
            items,
            created_at: row.created_at,
        }))
    }

    async fn cancel_order(&self, reference: &OrderReference) -> StoreResult<bool> {
        match self.transition(reference, OrderStatus::Cancelled).await? {
            Ok(()) => Ok(true),
            Err(OrderStatus::Cancelled) => Ok(false),
            Err(from) => Err(StoreError::InvalidTransition {
                from: from.as_str().to_string(),
                to: OrderStatus::Cancelled.as_str().to_string(),
            }),
        }
    }

    async fn mark_paid(&self, reference: &OrderReference) -> StoreResult<()> {
        self.transition(reference, OrderStatus::Paid)
            .await?
            .map_err(|from| StoreError::InvalidTransition {
                from: from.as_str().to_string(),
                to: OrderStatus::Paid.as_str().to_string(),
            })
    }
}
