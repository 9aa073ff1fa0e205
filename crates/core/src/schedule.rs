//! Import schedule frequencies.
//!
//! A frequency is a number followed by a unit: `30m`, `12h`, `1d`, `2w`.
//! The number must be between 1 and [`MAX_FREQUENCY_VALUE`].

use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;

use crate::catalog::EntityType;
use crate::types::Timestamp;

/// Largest accepted frequency value (one week in hours).
pub const MAX_FREQUENCY_VALUE: i64 = 168;

static FREQUENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([mhdw])$").expect("valid regex"));

/// Schedules seeded on first start: `(entity_type, frequency, full_import)`.
pub const DEFAULT_SCHEDULES: &[(EntityType, &str, bool)] = &[
    (EntityType::Vehicles, "12h", false),
    (EntityType::Parts, "12h", false),
    (EntityType::Catalog, "24h", false),
];

/// Parse a frequency string into an interval.
pub fn parse_frequency(frequency: &str) -> Result<Duration, String> {
    let trimmed = frequency.trim().to_ascii_lowercase();
    let caps = FREQUENCY_RE
        .captures(&trimmed)
        .ok_or_else(|| format!("Invalid frequency '{frequency}': expected e.g. 30m, 12h, 1d, 1w"))?;

    let value: i64 = caps[1]
        .parse()
        .map_err(|_| format!("Invalid frequency value in '{frequency}'"))?;
    if !(1..=MAX_FREQUENCY_VALUE).contains(&value) {
        return Err(format!(
            "Frequency value must be between 1 and {MAX_FREQUENCY_VALUE}, got {value}"
        ));
    }

    Ok(match &caps[2] {
        "m" => Duration::minutes(value),
        "h" => Duration::hours(value),
        "d" => Duration::days(value),
        _ => Duration::weeks(value),
    })
}

/// Next run time for a schedule that last fired at `from`.
pub fn next_run(from: Timestamp, frequency: &str) -> Result<Timestamp, String> {
    Ok(from + parse_frequency(frequency)?)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(parse_frequency("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_frequency("12h").unwrap(), Duration::hours(12));
        assert_eq!(parse_frequency(" 1D ").unwrap(), Duration::days(1));
        assert_eq!(parse_frequency("2w").unwrap(), Duration::weeks(2));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(parse_frequency("0h").is_err());
        assert!(parse_frequency("169h").is_err());
        assert!(parse_frequency("168h").is_ok());
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(parse_frequency("").is_err());
        assert!(parse_frequency("h12").is_err());
        assert!(parse_frequency("12 hours").is_err());
        assert!(parse_frequency("12s").is_err());
    }

    #[test]
    fn next_run_adds_interval() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = next_run(from, "12h").unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn default_schedules_are_valid() {
        for (_, freq, _) in DEFAULT_SCHEDULES {
            assert!(parse_frequency(freq).is_ok());
        }
    }
}
