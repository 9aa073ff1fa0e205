/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier assigned by the upstream inventory API to a vehicle.
///
/// Positive ids are physical vehicles, negative ids are virtual
/// placeholders for parts whose vehicle was never exported.
pub type ExternalVehicleId = i64;

/// Identifier assigned by the upstream inventory API to a part.
pub type ExternalPartRef = i64;
