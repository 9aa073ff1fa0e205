//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod import_run_repo;
pub mod import_schedule_repo;
pub mod part_repo;
pub mod sync_cursor_repo;
pub mod vehicle_part_repo;
pub mod vehicle_repo;

pub use import_run_repo::ImportRunRepo;
pub use import_schedule_repo::ImportScheduleRepo;
pub use part_repo::PartRepo;
pub use sync_cursor_repo::SyncCursorRepo;
pub use vehicle_part_repo::VehiclePartRepo;
pub use vehicle_repo::VehicleRepo;
