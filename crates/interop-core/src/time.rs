use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Naive date-times some agencies send without an offset.
const NAIVE_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]"),
];

/// Timestamp of a reported incident, always normalized to an offset date-time.
///
/// Accepts RFC 3339, ISO-8601 with an offset, or a naive ISO-8601 date-time,
/// which is taken to be UTC. A bare date has no time of day and is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IncidentTimestamp(pub OffsetDateTime);

impl IncidentTimestamp {
    pub fn new(datetime: OffsetDateTime) -> Self {
        Self(datetime)
    }

    pub fn inner(&self) -> &OffsetDateTime {
        &self.0
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    pub fn unix_timestamp(&self) -> i64 {
        self.0.unix_timestamp()
    }
}

impl fmt::Display for IncidentTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = self.0.format(&Rfc3339).map_err(|_| fmt::Error)?;
        write!(f, "{formatted}")
    }
}

impl FromStr for IncidentTimestamp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        parse_timestamp(s).map(IncidentTimestamp)
    }
}

impl Serialize for IncidentTimestamp {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let formatted = self.0.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }
}

impl<'de> Deserialize<'de> for IncidentTimestamp {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        IncidentTimestamp::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse an ISO-8601 timestamp into a UTC-normalized offset date-time.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CoreError::invalid_timestamp("empty timestamp"));
    }

    if let Ok(dt) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(dt.to_offset(UtcOffset::UTC));
    }
    if let Ok(dt) = OffsetDateTime::parse(value, &Iso8601::DEFAULT) {
        return Ok(dt.to_offset(UtcOffset::UTC));
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = PrimitiveDateTime::parse(value, format) {
            return Ok(dt.assume_utc());
        }
    }

    Err(CoreError::invalid_timestamp(format!(
        "'{value}' is not an ISO-8601 date-time"
    )))
}

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}
