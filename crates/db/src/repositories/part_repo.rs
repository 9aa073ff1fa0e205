//! Repository for the `parts` table.

use partsync_core::catalog::NormalizedPart;
use partsync_core::types::DbId;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::part::{Part, PendingPart};

/// Column list for parts queries.
const COLUMNS: &str = "id, external_ref, company_id, external_vehicle_id, family_code, \
    family_description, article_code, title, main_ref, year_from, year_to, price, weight, \
    notes, source_status, images, vehicle_make, vehicle_model, vehicle_trim, vehicle_year, \
    vehicle_fuel, active, available_in_source, pending_relation, source_modified_at, \
    last_confirmed_at, created_at, updated_at";

/// Columns written on insert, in bind order.
const WRITE_COLUMNS: &str = "external_ref, company_id, external_vehicle_id, family_code, \
    family_description, article_code, title, main_ref, year_from, year_to, price, weight, \
    notes, source_status, images, vehicle_make, vehicle_model, vehicle_trim, vehicle_year, \
    vehicle_fuel, active, pending_relation, source_modified_at";

/// `SET` clause applied when `(company_id, external_ref)` already exists.
///
/// Vehicle copies keep their stored value when the incoming record has
/// none, so a link-time copy is not wiped by a later sighting.
const UPSERT_SET: &str = "external_vehicle_id = EXCLUDED.external_vehicle_id,
        family_code = EXCLUDED.family_code,
        family_description = EXCLUDED.family_description,
        article_code = EXCLUDED.article_code,
        title = EXCLUDED.title,
        main_ref = EXCLUDED.main_ref,
        year_from = EXCLUDED.year_from,
        year_to = EXCLUDED.year_to,
        price = EXCLUDED.price,
        weight = EXCLUDED.weight,
        notes = EXCLUDED.notes,
        source_status = EXCLUDED.source_status,
        images = EXCLUDED.images,
        vehicle_make = COALESCE(EXCLUDED.vehicle_make, parts.vehicle_make),
        vehicle_model = COALESCE(EXCLUDED.vehicle_model, parts.vehicle_model),
        vehicle_trim = COALESCE(EXCLUDED.vehicle_trim, parts.vehicle_trim),
        vehicle_year = COALESCE(EXCLUDED.vehicle_year, parts.vehicle_year),
        vehicle_fuel = COALESCE(EXCLUDED.vehicle_fuel, parts.vehicle_fuel),
        active = EXCLUDED.active,
        pending_relation = EXCLUDED.pending_relation,
        available_in_source = TRUE,
        source_modified_at = COALESCE(EXCLUDED.source_modified_at, parts.source_modified_at),
        last_confirmed_at = NOW(),
        updated_at = NOW()";

/// Outcome row of an upsert.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct UpsertedPart {
    pub external_ref: i64,
    pub inserted: bool,
}

fn push_part(b: &mut sqlx::query_builder::Separated<'_, '_, Postgres, &'static str>, p: &NormalizedPart) {
    b.push_bind(p.external_ref)
        .push_bind(p.company_id)
        .push_bind(p.external_vehicle_id)
        .push_bind(p.family_code.clone())
        .push_bind(p.family_description.clone())
        .push_bind(p.article_code.clone())
        .push_bind(p.title.clone())
        .push_bind(p.main_ref.clone())
        .push_bind(p.year_from)
        .push_bind(p.year_to)
        .push_bind(p.price.clone())
        .push_bind(p.weight.clone())
        .push_bind(p.notes.clone())
        .push_bind(p.source_status.clone())
        .push_bind(p.images.clone())
        .push_bind(p.vehicle_make.clone())
        .push_bind(p.vehicle_model.clone())
        .push_bind(p.vehicle_trim.clone())
        .push_bind(p.vehicle_year)
        .push_bind(p.vehicle_fuel.clone())
        .push_bind(p.active)
        .push_bind(p.pending_relation)
        .push_bind(p.modified_at);
}

/// Provides persistence operations for parts.
pub struct PartRepo;

impl PartRepo {
    /// Number of parts owned by a company.
    pub async fn count(pool: &PgPool, company_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM parts WHERE company_id = $1")
            .bind(company_id)
            .fetch_one(pool)
            .await
    }

    /// Find a part by company and upstream ref.
    pub async fn find_by_ref(
        pool: &PgPool,
        company_id: i64,
        external_ref: i64,
    ) -> Result<Option<Part>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM parts WHERE company_id = $1 AND external_ref = $2");
        sqlx::query_as::<_, Part>(&query)
            .bind(company_id)
            .bind(external_ref)
            .fetch_optional(pool)
            .await
    }

    /// Which of `refs` already exist for the company.
    pub async fn existing_refs(
        pool: &PgPool,
        company_id: i64,
        refs: &[i64],
    ) -> Result<Vec<i64>, sqlx::Error> {
        if refs.is_empty() {
            return Ok(vec![]);
        }
        sqlx::query_scalar(
            "SELECT external_ref FROM parts WHERE company_id = $1 AND external_ref = ANY($2)",
        )
        .bind(company_id)
        .bind(refs)
        .fetch_all(pool)
        .await
    }

    /// Insert or update a batch in one statement.
    ///
    /// Callers must not pass the same `(company_id, external_ref)` twice in
    /// one batch.
    pub async fn upsert_batch(
        pool: &PgPool,
        parts: &[NormalizedPart],
    ) -> Result<Vec<UpsertedPart>, sqlx::Error> {
        if parts.is_empty() {
            return Ok(vec![]);
        }
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO parts ({WRITE_COLUMNS}) "));
        qb.push_values(parts, |mut b, p| push_part(&mut b, p));
        qb.push(format!(
            " ON CONFLICT (company_id, external_ref) DO UPDATE SET {UPSERT_SET} \
             RETURNING external_ref, (xmax = 0) AS inserted"
        ));
        qb.build_query_as::<UpsertedPart>().fetch_all(pool).await
    }

    /// Insert a single part.
    pub async fn insert(pool: &PgPool, p: &NormalizedPart) -> Result<DbId, sqlx::Error> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO parts ({WRITE_COLUMNS}) "));
        qb.push_values(std::iter::once(p), |mut b, p| push_part(&mut b, p));
        qb.push(" RETURNING id");
        qb.build_query_scalar::<DbId>().fetch_one(pool).await
    }

    /// Update a single part by company and ref. Returns `false` when no row
    /// matched.
    pub async fn update(pool: &PgPool, p: &NormalizedPart) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE parts SET
                external_vehicle_id = $3, family_code = $4, family_description = $5,
                article_code = $6, title = $7, main_ref = $8, year_from = $9, year_to = $10,
                price = $11, weight = $12, notes = $13, source_status = $14, images = $15,
                vehicle_make = COALESCE($16, vehicle_make),
                vehicle_model = COALESCE($17, vehicle_model),
                vehicle_trim = COALESCE($18, vehicle_trim),
                vehicle_year = COALESCE($19, vehicle_year),
                vehicle_fuel = COALESCE($20, vehicle_fuel),
                active = $21, pending_relation = $22, available_in_source = TRUE,
                source_modified_at = COALESCE($23, source_modified_at),
                last_confirmed_at = NOW(), updated_at = NOW()
             WHERE company_id = $1 AND external_ref = $2",
        )
        .bind(p.company_id)
        .bind(p.external_ref)
        .bind(p.external_vehicle_id)
        .bind(&p.family_code)
        .bind(&p.family_description)
        .bind(&p.article_code)
        .bind(&p.title)
        .bind(&p.main_ref)
        .bind(p.year_from)
        .bind(p.year_to)
        .bind(&p.price)
        .bind(&p.weight)
        .bind(&p.notes)
        .bind(&p.source_status)
        .bind(&p.images)
        .bind(&p.vehicle_make)
        .bind(&p.vehicle_model)
        .bind(&p.vehicle_trim)
        .bind(p.vehicle_year)
        .bind(&p.vehicle_fuel)
        .bind(p.active)
        .bind(p.pending_relation)
        .bind(p.modified_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Refresh `last_confirmed_at` for parts seen upstream but not rewritten.
    pub async fn touch_confirmed(
        pool: &PgPool,
        company_id: i64,
        refs: &[i64],
    ) -> Result<u64, sqlx::Error> {
        if refs.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE parts SET last_confirmed_at = NOW(), available_in_source = TRUE
             WHERE company_id = $1 AND external_ref = ANY($2)",
        )
        .bind(company_id)
        .bind(refs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Next page of pending parts after `after_id`, ordered by id.
    pub async fn list_pending(
        pool: &PgPool,
        after_id: DbId,
        limit: i64,
    ) -> Result<Vec<PendingPart>, sqlx::Error> {
        sqlx::query_as::<_, PendingPart>(
            "SELECT id, external_ref, external_vehicle_id, title, price, source_status
             FROM parts
             WHERE pending_relation AND external_vehicle_id IS NOT NULL AND id > $1
             ORDER BY id
             LIMIT $2",
        )
        .bind(after_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Refs of the company's parts that are active and still marked
    /// available in the source.
    pub async fn active_available_refs(
        pool: &PgPool,
        company_id: i64,
    ) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT external_ref FROM parts
             WHERE company_id = $1 AND active AND available_in_source",
        )
        .bind(company_id)
        .fetch_all(pool)
        .await
    }

    /// Flag parts as no longer available in the source. `active` is left
    /// untouched.
    pub async fn mark_unavailable(
        pool: &PgPool,
        company_id: i64,
        refs: &[i64],
    ) -> Result<u64, sqlx::Error> {
        if refs.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE parts SET available_in_source = FALSE, updated_at = NOW()
             WHERE company_id = $1 AND external_ref = ANY($2) AND available_in_source",
        )
        .bind(company_id)
        .bind(refs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
