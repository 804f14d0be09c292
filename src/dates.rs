//! Date-string conversion between the hub's ISO-8601 variants and
//! [`chrono`] values.
//!
//! The service emits timestamps in two shapes: UTC with a `Z` suffix and an
//! arbitrary-precision fraction (`2016-06-01T21:22:43.7996883Z`), and an
//! offset form without a fraction (`2016-06-01T21:22:41+00:00`). Fractions
//! are truncated to millisecond precision on parse, and everything is
//! re-emitted in the single canonical form produced by [`format_utc_3`].

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::error::{DtoError, Result};

const DATE_AND_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const OFFSET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";
const MAX_FRACTION_DIGITS: usize = 3;

/// Parse a UTC timestamp of the form `yyyy-MM-ddTHH:mm:ss[.fffffff]Z`.
///
/// The fractional part may carry any number of digits; only the first three
/// (milliseconds) are kept, and shorter fractions are right-padded with
/// zeros, so `21:22:43.7996883Z` and `21:22:43.799Z` parse to the same
/// instant.
pub fn parse_utc(s: &str) -> Result<DateTime<Utc>> {
    let stripped = s
        .strip_suffix('Z')
        .ok_or_else(|| DtoError::InvalidDate(s.to_string()))?;

    let mut parts = stripped.splitn(3, |c| c == '.' || c == ',');
    let date_and_time = parts.next().unwrap_or_default();
    let fraction = parts.next();
    if parts.next().is_some() {
        return Err(DtoError::InvalidDate(s.to_string()));
    }

    let naive = NaiveDateTime::parse_from_str(date_and_time, DATE_AND_TIME_FORMAT)
        .map_err(|_| DtoError::InvalidDate(s.to_string()))?;

    let millis = match fraction {
        None | Some("") => 0,
        Some(digits) => {
            let kept = digits
                .get(..digits.len().min(MAX_FRACTION_DIGITS))
                .ok_or_else(|| DtoError::InvalidDate(s.to_string()))?;
            // str::parse would admit a leading `+` sign
            if !kept.bytes().all(|b| b.is_ascii_digit()) {
                return Err(DtoError::InvalidDate(s.to_string()));
            }
            let value: u32 = kept
                .parse()
                .map_err(|_| DtoError::InvalidDate(s.to_string()))?;
            value * 10u32.pow((MAX_FRACTION_DIGITS - kept.len()) as u32)
        }
    };

    Ok(Utc.from_utc_datetime(&naive) + chrono::Duration::milliseconds(i64::from(millis)))
}

/// Parse an offset timestamp of the form `yyyy-MM-ddTHH:mm:ss±HH:MM`,
/// normalizing to UTC.
pub fn parse_offset(s: &str) -> Result<DateTime<Utc>> {
    if s.is_empty() {
        return Err(DtoError::InvalidDate(s.to_string()));
    }
    DateTime::parse_from_str(s, OFFSET_FORMAT)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DtoError::InvalidDate(s.to_string()))
}

/// Format a timestamp in the canonical wire form
/// `yyyy-MM-ddTHH:mm:ss.SSSZ` (UTC, exactly three fraction digits).
pub fn format_utc_3(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Format a timestamp in the offset wire form `yyyy-MM-ddTHH:mm:ss+00:00`.
pub fn format_offset(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Strict serde adapter for optional UTC timestamp fields.
///
/// Unparseable input fails the whole deserialization, matching the fields
/// the service contract treats as hard errors.
pub mod serde_utc_opt {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize in canonical `.SSSZ` form; `None` should normally be
    /// skipped at the field level with `skip_serializing_if`.
    pub fn serialize<S>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&format_utc_3(dt)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize from the UTC wire form, failing on malformed input.
    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => parse_utc(&s).map(Some).map_err(serde::de::Error::custom),
        }
    }
}

/// Lenient serde adapter for optional UTC timestamp fields.
///
/// Unparseable strings deserialize to `None` with a warning, preserving the
/// catch-and-null behavior the scheduled-job and enrollment responses rely
/// on. Use [`serde_utc_opt`] everywhere else.
pub mod serde_utc_lenient {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize in canonical `.SSSZ` form.
    pub fn serialize<S>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::serde_utc_opt::serialize(value, serializer)
    }

    /// Deserialize from the UTC wire form, mapping malformed input to `None`.
    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.and_then(|s| match parse_utc(&s) {
            Ok(dt) => Some(dt),
            Err(_) => {
                warn!("ignoring unparseable timestamp `{}`", s);
                None
            }
        }))
    }
}

/// Serde adapter for optional offset timestamp fields
/// (`yyyy-MM-ddTHH:mm:ss±HH:MM`).
pub mod serde_offset_opt {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize in the offset wire form with a `+00:00` suffix.
    pub fn serialize<S>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&format_offset(dt)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize from the offset wire form, failing on malformed input.
    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => parse_offset(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
