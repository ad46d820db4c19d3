//! Log entry and service records shared by every tier.

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
    Debug,
}

impl Level {
    /// Lowercase wire/storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Debug => "debug",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ValidationError;

    /// Case-insensitive parse.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Level::Info),
            "warn" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "debug" => Ok(Level::Debug),
            _ => Err(ValidationError::InvalidLevel(s.to_string())),
        }
    }
}

/// A stored log entry. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    #[serde(with = "millis")]
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub service: String,
    pub message: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(with = "millis")]
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    /// UTC calendar date of the event; selects the archive partition.
    pub fn partition_date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Caller-supplied entry before validation (wire shape).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewLogEntry {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl NewLogEntry {
    /// Minimal entry with level and message set.
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: Some(level.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// A tenant identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub api_key: String,
    #[serde(with = "millis")]
    pub created_at: DateTime<Utc>,
}

/// Service listing row; the API key is never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(with = "millis")]
    pub created_at: DateTime<Utc>,
}

impl From<&Service> for ServiceSummary {
    fn from(service: &Service) -> Self {
        Self {
            id: service.id,
            name: service.name.clone(),
            created_at: service.created_at,
        }
    }
}

/// Drop sub-millisecond precision so every tier stores identical instants.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = ts.nanosecond() % 1_000_000_000;
    ts.with_nanosecond(nanos - nanos % 1_000_000).unwrap_or(ts)
}

/// Smallest millisecond instant at or after `ts`.
pub fn ceil_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = truncate_to_millis(ts);
    if truncated == ts {
        ts
    } else {
        truncated + chrono::Duration::milliseconds(1)
    }
}

/// Current instant at millisecond precision.
pub fn now_millis() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

/// Fixed-width RFC 3339 with millisecond precision and `Z` suffix.
///
/// Lexicographic order of the output equals chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| ValidationError::InvalidTimestamp(raw.to_string()))
}

/// 1970-01-01T00:00:00Z.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from(std::time::UNIX_EPOCH)
}

/// Midnight UTC of the given date.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

mod millis {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse_case_insensitive() {
        assert_eq!("INFO".parse::<Level>().unwrap(), Level::Info);
        assert_eq!("Warn".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!("debug".parse::<Level>().unwrap(), Level::Debug);
        assert!(matches!(
            "fatal".parse::<Level>(),
            Err(ValidationError::InvalidLevel(_))
        ));
    }

    #[test]
    fn test_format_timestamp_fixed_width() {
        let ts = parse_timestamp("2024-01-15T10:00:00Z").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-01-15T10:00:00.000Z");

        let ts = parse_timestamp("2024-01-15T12:30:00.123456+02:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-01-15T10:30:00.123Z");
    }

    #[test]
    fn test_ceil_to_millis() {
        let ts = parse_timestamp("2024-01-15T10:00:00.1235Z").unwrap();
        assert_eq!(
            format_timestamp(&ceil_to_millis(ts)),
            "2024-01-15T10:00:00.124Z"
        );
        let exact = parse_timestamp("2024-01-15T10:00:00.123Z").unwrap();
        assert_eq!(ceil_to_millis(exact), exact);
    }

    #[test]
    fn test_truncate_to_millis() {
        let ts = parse_timestamp("2024-01-15T10:00:00.123456789Z").unwrap();
        let truncated = truncate_to_millis(ts);
        assert_eq!(truncated.nanosecond(), 123_000_000);
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = LogEntry {
            id: Uuid::new_v4(),
            timestamp: parse_timestamp("2024-01-15T10:00:00Z").unwrap(),
            level: Level::Error,
            service: "svc-a".into(),
            message: "boom".into(),
            context: Some(serde_json::json!({"user": 42})),
            correlation_id: None,
            created_at: parse_timestamp("2024-01-15T10:00:01Z").unwrap(),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "error");
        assert_eq!(json["timestamp"], "2024-01-15T10:00:00.000Z");
        assert_eq!(json["context"]["user"], 42);

        let decoded: LogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(
            decoded.partition_date(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
    }

    #[test]
    fn test_start_of_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            format_timestamp(&start_of_day(date)),
            "2024-03-01T00:00:00.000Z"
        );
    }
}
