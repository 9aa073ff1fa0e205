//! Pagination clamping for history listings.

/// Default page size for import history.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: i64 = 200;

/// Clamp a user-provided page size to `[1, max]`.
pub fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).max(1).min(max)
}

/// Convert a 1-based page number and page size into a row offset.
pub fn page_offset(page: Option<i64>, page_size: i64) -> i64 {
    (page.unwrap_or(1).max(1) - 1).saturating_mul(page_size)
}
