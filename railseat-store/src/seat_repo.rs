use async_trait::async_trait;
use sqlx::PgPool;

use railseat_core::route::leg_starts;
use railseat_core::{PriceLookup, SeatRepository, StoreError, StoreResult};
use railseat_shared::{
    Allocation, CarriageRemaining, SeatClass, SeatPrice, Segment, Train, VehicleType,
};

use crate::database::db_error;

/// Seats are stored one row per adjacent leg, so a seat is free on a segment
/// when it has a row for every leg and all of them are unsold.
const FREE_SEATS: &str = r#"
    SELECT carriage_number, seat_number
    FROM seat
    WHERE train_id = $1 AND seat_type = $2 AND start_station = ANY($3)
    GROUP BY carriage_number, seat_number
    HAVING COUNT(*) = $4 AND bool_and(seat_status = 0)
"#;

const SEAT_SOLD: i16 = 1;
const SEAT_FREE: i16 = 0;

pub struct PgSeatRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct TrainRow {
    id: String,
    train_number: String,
    vehicle_type: i16,
    start_station: String,
    end_station: String,
}

#[derive(sqlx::FromRow)]
struct CarriageRow {
    carriage_number: String,
    remaining: i64,
}

#[derive(sqlx::FromRow)]
struct PriceRow {
    seat_type: i16,
    price: i64,
}

impl PgSeatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn legs(&self, train_id: &str, segment: &Segment) -> StoreResult<Vec<String>> {
        let stations = self.list_route(train_id).await?;
        leg_starts(&stations, segment).ok_or_else(|| {
            StoreError::NotFound(format!("segment {} on train {}", segment, train_id))
        })
    }
}

#[async_trait]
impl SeatRepository for PgSeatRepository {
    async fn get_train(&self, train_id: &str) -> StoreResult<Option<Train>> {
        let row = sqlx::query_as::<_, TrainRow>(
            "SELECT id, train_number, vehicle_type, start_station, end_station FROM train WHERE id = $1",
        )
        .bind(train_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(|r| {
            let vehicle_type = VehicleType::from_code(r.vehicle_type).ok_or_else(|| {
                StoreError::Backend(format!("unknown vehicle type {} on train {}", r.vehicle_type, r.id))
            })?;
            Ok(Train {
                id: r.id,
                train_number: r.train_number,
                vehicle_type,
                start_station: r.start_station,
                end_station: r.end_station,
            })
        })
        .transpose()
    }

    async fn list_route(&self, train_id: &str) -> StoreResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT station FROM train_station WHERE train_id = $1 ORDER BY sequence",
        )
        .bind(train_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn select_seat_count(
        &self,
        train_id: &str,
        seat_class: SeatClass,
        segment: &Segment,
    ) -> StoreResult<u32> {
        let legs = self.legs(train_id, segment).await?;
        let sql = format!("SELECT COUNT(*) FROM ({}) free", FREE_SEATS);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(train_id)
            .bind(seat_class.code())
            .bind(&legs)
            .bind(legs.len() as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(count as u32)
    }

    async fn list_carriage_remaining(
        &self,
        train_id: &str,
        seat_class: SeatClass,
        segment: &Segment,
    ) -> StoreResult<Vec<CarriageRemaining>> {
        let legs = self.legs(train_id, segment).await?;
        let sql = format!(
            "SELECT carriage_number, COUNT(*) AS remaining FROM ({}) free \
             GROUP BY carriage_number ORDER BY carriage_number",
            FREE_SEATS
        );
        let rows = sqlx::query_as::<_, CarriageRow>(&sql)
            .bind(train_id)
            .bind(seat_class.code())
            .bind(&legs)
            .bind(legs.len() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(rows
            .into_iter()
            .map(|r| CarriageRemaining {
                carriage_number: r.carriage_number,
                remaining: r.remaining as u32,
            })
            .collect())
    }

    async fn list_available_seat_labels(
        &self,
        train_id: &str,
        carriage_number: &str,
        seat_class: SeatClass,
        segment: &Segment,
    ) -> StoreResult<Vec<String>> {
        let legs = self.legs(train_id, segment).await?;
        let sql = format!(
            "SELECT seat_number FROM ({}) free WHERE carriage_number = $5 ORDER BY seat_number",
            FREE_SEATS
        );
        sqlx::query_scalar::<_, String>(&sql)
            .bind(train_id)
            .bind(seat_class.code())
            .bind(&legs)
            .bind(legs.len() as i64)
            .bind(carriage_number)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn lock_seats(
        &self,
        train_id: &str,
        segment: &Segment,
        allocations: &[Allocation],
    ) -> StoreResult<()> {
        let legs = self.legs(train_id, segment).await?;
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        for allocation in allocations {
            let result = sqlx::query(
                r#"
                UPDATE seat SET seat_status = $1, updated_at = NOW()
                WHERE train_id = $2 AND carriage_number = $3 AND seat_number = $4
                  AND seat_type = $5 AND start_station = ANY($6) AND seat_status = $7
                "#,
            )
            .bind(SEAT_SOLD)
            .bind(train_id)
            .bind(&allocation.carriage_number)
            .bind(&allocation.seat_label)
            .bind(allocation.seat_class.code())
            .bind(&legs)
            .bind(SEAT_FREE)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            if result.rows_affected() != legs.len() as u64 {
                // Dropping the transaction rolls back the seats locked so far.
                return Err(StoreError::Conflict(format!(
                    "seat {}-{} no longer free on {}",
                    allocation.carriage_number, allocation.seat_label, segment
                )));
            }
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn release_seats(
        &self,
        train_id: &str,
        segment: &Segment,
        allocations: &[Allocation],
    ) -> StoreResult<()> {
        let legs = self.legs(train_id, segment).await?;
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        for allocation in allocations {
            sqlx::query(
                r#"
                UPDATE seat SET seat_status = $1, updated_at = NOW()
                WHERE train_id = $2 AND carriage_number = $3 AND seat_number = $4
                  AND seat_type = $5 AND start_station = ANY($6) AND seat_status = $7
                "#,
            )
            .bind(SEAT_FREE)
            .bind(train_id)
            .bind(&allocation.carriage_number)
            .bind(&allocation.seat_label)
            .bind(allocation.seat_class.code())
            .bind(&legs)
            .bind(SEAT_SOLD)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }
}

#[async_trait]
impl PriceLookup for PgSeatRepository {
    async fn list_prices(&self, train_id: &str, segment: &Segment) -> StoreResult<Vec<SeatPrice>> {
        let rows = sqlx::query_as::<_, PriceRow>(
            r#"
            SELECT seat_type, price FROM train_station_price
            WHERE train_id = $1 AND departure = $2 AND arrival = $3
            ORDER BY seat_type
            "#,
        )
        .bind(train_id)
        .bind(&segment.origin)
        .bind(&segment.destination)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let seat_class = SeatClass::from_code(r.seat_type);
                if seat_class.is_none() {
                    tracing::warn!(train_id, seat_type = r.seat_type, "Skipping price for unknown seat type");
                }
                seat_class.map(|seat_class| SeatPrice {
                    seat_class,
                    amount: r.price,
                })
            })
            .collect())
    }
}
