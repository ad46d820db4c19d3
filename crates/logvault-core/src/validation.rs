//! Entry and name validation.
//!
//! Everything here is pure: callers pass the reference instant so the
//! timestamp window is deterministic under test.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::model::{
    format_timestamp, parse_timestamp, truncate_to_millis, Level, LogEntry, NewLogEntry,
};

/// How far in the past an explicit timestamp may lie.
pub fn max_past() -> Duration {
    Duration::days(365)
}

/// How far in the future an explicit timestamp may lie.
pub fn max_future() -> Duration {
    Duration::hours(1)
}

/// Validate a caller entry and turn it into a storable record.
///
/// `now` is used for defaulting the timestamp, for the bounds window and
/// as `created_at`.
pub fn validate_entry(
    service: &str,
    entry: NewLogEntry,
    now: DateTime<Utc>,
) -> std::result::Result<LogEntry, ValidationError> {
    let level: Level = match entry.level.as_deref() {
        None => return Err(ValidationError::MissingField("level")),
        Some(raw) if raw.trim().is_empty() => return Err(ValidationError::MissingField("level")),
        Some(raw) => raw.parse()?,
    };

    let message = match entry.message {
        Some(m) if !m.trim().is_empty() => m,
        _ => return Err(ValidationError::MissingField("message")),
    };

    let now = truncate_to_millis(now);
    let timestamp = match entry.timestamp.as_deref() {
        None => now,
        Some(raw) => {
            let ts = truncate_to_millis(parse_timestamp(raw)?);
            check_bounds(ts, now)?;
            ts
        }
    };

    Ok(LogEntry {
        id: Uuid::new_v4(),
        timestamp,
        level,
        service: service.to_string(),
        message,
        context: entry.context.filter(|c| !c.is_null()),
        correlation_id: entry.correlation_id.filter(|c| !c.is_empty()),
        created_at: now,
    })
}

/// Reject timestamps outside `[now - 365d, now + 1h]`.
pub fn check_bounds(
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
) -> std::result::Result<(), ValidationError> {
    let earliest = now - max_past();
    let latest = now + max_future();
    if timestamp < earliest || timestamp > latest {
        return Err(ValidationError::TimestampOutOfBounds {
            timestamp: format_timestamp(&timestamp),
            earliest: format_timestamp(&earliest),
            latest: format_timestamp(&latest),
        });
    }
    Ok(())
}

/// Service names become archive file names, so they must be path-safe.
pub fn validate_service_name(name: &str) -> std::result::Result<(), ValidationError> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidServiceName(name.to_string()))
    }
}
