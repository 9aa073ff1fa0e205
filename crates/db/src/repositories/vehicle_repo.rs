//! Repository for the `vehicles` table.

use partsync_core::catalog::NormalizedVehicle;
use partsync_core::types::DbId;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::vehicle::{Vehicle, VehicleSummary};

/// Column list for vehicles queries.
const COLUMNS: &str = "id, external_id, reference, make, model, trim_level, year, fuel, \
    vin, plate, color, mileage, power, doors, images, active, active_parts_count, \
    total_parts_count, source_modified_at, last_synced_at, created_at, updated_at";

const SUMMARY_COLUMNS: &str = "id, external_id, make, model, trim_level, year, fuel";

/// Columns written on insert, in bind order.
const WRITE_COLUMNS: &str = "external_id, reference, make, model, trim_level, year, fuel, \
    vin, plate, color, mileage, power, doors, images, active, source_modified_at";

/// `SET` clause applied when the external id already exists.
const UPSERT_SET: &str = "reference = EXCLUDED.reference,
        make = EXCLUDED.make,
        model = EXCLUDED.model,
        trim_level = EXCLUDED.trim_level,
        year = EXCLUDED.year,
        fuel = EXCLUDED.fuel,
        vin = EXCLUDED.vin,
        plate = EXCLUDED.plate,
        color = EXCLUDED.color,
        mileage = EXCLUDED.mileage,
        power = EXCLUDED.power,
        doors = EXCLUDED.doors,
        images = EXCLUDED.images,
        active = EXCLUDED.active,
        source_modified_at = COALESCE(EXCLUDED.source_modified_at, vehicles.source_modified_at),
        last_synced_at = NOW(),
        updated_at = NOW()";

/// Outcome row of an upsert: which external id, and whether it was new.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct UpsertedVehicle {
    pub external_id: i64,
    pub inserted: bool,
}

fn push_vehicle(b: &mut sqlx::query_builder::Separated<'_, '_, Postgres, &'static str>, v: &NormalizedVehicle) {
    b.push_bind(v.external_id)
        .push_bind(v.reference.clone())
        .push_bind(v.make.clone())
        .push_bind(v.model.clone())
        .push_bind(v.trim.clone())
        .push_bind(v.year)
        .push_bind(v.fuel.clone())
        .push_bind(v.vin.clone())
        .push_bind(v.plate.clone())
        .push_bind(v.color.clone())
        .push_bind(v.mileage)
        .push_bind(v.power.clone())
        .push_bind(v.doors)
        .push_bind(v.images.clone())
        .push_bind(v.active)
        .push_bind(v.modified_at);
}

/// Provides persistence operations for vehicles.
pub struct VehicleRepo;

impl VehicleRepo {
    /// Total number of vehicle rows.
    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM vehicles")
            .fetch_one(pool)
            .await
    }

    /// Find a vehicle by its upstream id.
    pub async fn find_by_external_id(
        pool: &PgPool,
        external_id: i64,
    ) -> Result<Option<Vehicle>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM vehicles WHERE external_id = $1");
        sqlx::query_as::<_, Vehicle>(&query)
            .bind(external_id)
            .fetch_optional(pool)
            .await
    }

    /// Which of `external_ids` already exist.
    pub async fn existing_external_ids(
        pool: &PgPool,
        external_ids: &[i64],
    ) -> Result<Vec<i64>, sqlx::Error> {
        if external_ids.is_empty() {
            return Ok(vec![]);
        }
        sqlx::query_scalar("SELECT external_id FROM vehicles WHERE external_id = ANY($1)")
            .bind(external_ids)
            .fetch_all(pool)
            .await
    }

    /// Descriptive fields for the given upstream ids.
    pub async fn find_summaries(
        pool: &PgPool,
        external_ids: &[i64],
    ) -> Result<Vec<VehicleSummary>, sqlx::Error> {
        if external_ids.is_empty() {
            return Ok(vec![]);
        }
        let query =
            format!("SELECT {SUMMARY_COLUMNS} FROM vehicles WHERE external_id = ANY($1)");
        sqlx::query_as::<_, VehicleSummary>(&query)
            .bind(external_ids)
            .fetch_all(pool)
            .await
    }

    /// Insert or update a batch in one statement.
    ///
    /// Callers must not pass the same external id twice in one batch.
    pub async fn upsert_batch(
        pool: &PgPool,
        vehicles: &[NormalizedVehicle],
    ) -> Result<Vec<UpsertedVehicle>, sqlx::Error> {
        if vehicles.is_empty() {
            return Ok(vec![]);
        }
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO vehicles ({WRITE_COLUMNS}) "));
        qb.push_values(vehicles, |mut b, v| push_vehicle(&mut b, v));
        qb.push(format!(
            " ON CONFLICT (external_id) DO UPDATE SET {UPSERT_SET} \
             RETURNING external_id, (xmax = 0) AS inserted"
        ));
        qb.build_query_as::<UpsertedVehicle>().fetch_all(pool).await
    }

    /// Insert a single vehicle.
    pub async fn insert(pool: &PgPool, v: &NormalizedVehicle) -> Result<DbId, sqlx::Error> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO vehicles ({WRITE_COLUMNS}) "));
        qb.push_values(std::iter::once(v), |mut b, v| push_vehicle(&mut b, v));
        qb.push(" RETURNING id");
        qb.build_query_scalar::<DbId>().fetch_one(pool).await
    }

    /// Update a single vehicle by upstream id. Returns `false` when no row
    /// matched.
    pub async fn update(pool: &PgPool, v: &NormalizedVehicle) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE vehicles SET
                reference = $2, make = $3, model = $4, trim_level = $5, year = $6,
                fuel = $7, vin = $8, plate = $9, color = $10, mileage = $11,
                power = $12, doors = $13, images = $14, active = $15,
                source_modified_at = COALESCE($16, source_modified_at),
                last_synced_at = NOW(), updated_at = NOW()
             WHERE external_id = $1",
        )
        .bind(v.external_id)
        .bind(&v.reference)
        .bind(&v.make)
        .bind(&v.model)
        .bind(&v.trim)
        .bind(v.year)
        .bind(&v.fuel)
        .bind(&v.vin)
        .bind(&v.plate)
        .bind(&v.color)
        .bind(v.mileage)
        .bind(&v.power)
        .bind(v.doors)
        .bind(&v.images)
        .bind(v.active)
        .bind(v.modified_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Refresh `last_synced_at` for vehicles seen upstream but not rewritten.
    pub async fn touch_synced(pool: &PgPool, external_ids: &[i64]) -> Result<u64, sqlx::Error> {
        if external_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE vehicles SET last_synced_at = NOW() WHERE external_id = ANY($1)",
        )
        .bind(external_ids)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Recompute `active_parts_count` (active parts with a positive price)
    /// and `total_parts_count` (active parts) for every vehicle. Returns the
    /// number of vehicles whose counters changed.
    pub async fn recompute_part_counters(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "WITH counts AS (
                SELECT v.id,
                       COUNT(p.id) FILTER (
                           WHERE p.active AND CASE
                               WHEN p.price ~ '^-?[0-9]+([.,][0-9]+)?$'
                               THEN REPLACE(p.price, ',', '.')::NUMERIC > 0
                               ELSE FALSE
                           END
                       )::INTEGER AS active_parts,
                       COUNT(p.id) FILTER (WHERE p.active)::INTEGER AS total_parts
                FROM vehicles v
                LEFT JOIN vehicle_parts vp ON vp.vehicle_id = v.id
                LEFT JOIN parts p ON p.id = vp.part_id
                GROUP BY v.id
             )
             UPDATE vehicles v SET
                active_parts_count = c.active_parts,
                total_parts_count = c.total_parts,
                updated_at = NOW()
             FROM counts c
             WHERE v.id = c.id
               AND (v.active_parts_count, v.total_parts_count)
                   IS DISTINCT FROM (c.active_parts, c.total_parts)",
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
