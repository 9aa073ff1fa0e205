//! Repository for the `vehicle_parts` association table.

use partsync_core::types::DbId;
use sqlx::PgPool;

use crate::models::vehicle_part::{ResolvedLink, VehiclePart};

const COLUMNS: &str = "id, vehicle_id, part_id, original_vehicle_id, created_at, updated_at";

/// Provides link operations between parts and vehicles.
pub struct VehiclePartRepo;

impl VehiclePartRepo {
    /// Association for a part, if any.
    pub async fn find_by_part(
        pool: &PgPool,
        part_id: DbId,
    ) -> Result<Option<VehiclePart>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM vehicle_parts WHERE part_id = $1");
        sqlx::query_as::<_, VehiclePart>(&query)
            .bind(part_id)
            .fetch_optional(pool)
            .await
    }

    /// Number of associations.
    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM vehicle_parts")
            .fetch_one(pool)
            .await
    }

    /// Link the given parts to their vehicles where the vehicle exists.
    ///
    /// An existing association pointing at a different vehicle is
    /// re-pointed. Returns the number of rows created or changed.
    pub async fn link_existing(
        pool: &PgPool,
        company_id: i64,
        refs: &[i64],
    ) -> Result<u64, sqlx::Error> {
        if refs.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "INSERT INTO vehicle_parts (vehicle_id, part_id, original_vehicle_id)
             SELECT v.id, p.id, p.external_vehicle_id
             FROM parts p
             JOIN vehicles v ON v.external_id = p.external_vehicle_id
             WHERE p.company_id = $1 AND p.external_ref = ANY($2)
             ON CONFLICT (part_id) DO UPDATE SET
                vehicle_id = EXCLUDED.vehicle_id,
                original_vehicle_id = EXCLUDED.original_vehicle_id,
                updated_at = NOW()
             WHERE vehicle_parts.vehicle_id IS DISTINCT FROM EXCLUDED.vehicle_id",
        )
        .bind(company_id)
        .bind(refs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Drop the associations of the given parts that are waiting for a
    /// vehicle again. Returns the number of associations removed.
    pub async fn unlink_pending(
        pool: &PgPool,
        company_id: i64,
        refs: &[i64],
    ) -> Result<u64, sqlx::Error> {
        if refs.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "DELETE FROM vehicle_parts vp
             USING parts p
             WHERE vp.part_id = p.id
               AND p.company_id = $1
               AND p.external_ref = ANY($2)
               AND p.pending_relation",
        )
        .bind(company_id)
        .bind(refs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Resolve pending parts in one transaction: create (or re-point) each
    /// association, clear the pending flag, apply the decided activation,
    /// and copy vehicle fields into blank part columns.
    pub async fn resolve_batch(pool: &PgPool, links: &[ResolvedLink]) -> Result<u64, sqlx::Error> {
        if links.is_empty() {
            return Ok(0);
        }
        let part_ids: Vec<DbId> = links.iter().map(|l| l.part_id).collect();
        let vehicle_ids: Vec<DbId> = links.iter().map(|l| l.vehicle_id).collect();
        let external_ids: Vec<i64> = links.iter().map(|l| l.external_vehicle_id).collect();
        let active: Vec<bool> = links.iter().map(|l| l.active).collect();

        let mut tx = pool.begin().await?;

        sqlx::query(
            "INSERT INTO vehicle_parts (vehicle_id, part_id, original_vehicle_id)
             SELECT * FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::BIGINT[])
             ON CONFLICT (part_id) DO UPDATE SET
                vehicle_id = EXCLUDED.vehicle_id,
                original_vehicle_id = EXCLUDED.original_vehicle_id,
                updated_at = NOW()
             WHERE vehicle_parts.vehicle_id IS DISTINCT FROM EXCLUDED.vehicle_id",
        )
        .bind(&vehicle_ids)
        .bind(&part_ids)
        .bind(&external_ids)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "UPDATE parts p SET
                pending_relation = FALSE,
                active = u.active,
                vehicle_make = COALESCE(NULLIF(p.vehicle_make, ''), v.make),
                vehicle_model = COALESCE(NULLIF(p.vehicle_model, ''), v.model),
                vehicle_trim = COALESCE(NULLIF(p.vehicle_trim, ''), v.trim_level),
                vehicle_year = COALESCE(p.vehicle_year, v.year),
                vehicle_fuel = COALESCE(NULLIF(p.vehicle_fuel, ''), v.fuel),
                updated_at = NOW()
             FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::BOOLEAN[]) AS u(part_id, vehicle_id, active)
             JOIN vehicles v ON v.id = u.vehicle_id
             WHERE p.id = u.part_id",
        )
        .bind(&part_ids)
        .bind(&vehicle_ids)
        .bind(&active)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
