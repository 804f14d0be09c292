//! Field validation helpers shared by the resource DTOs.
//!
//! The hub rejects identifiers and twin keys outside a narrow 7-bit ASCII
//! repertoire, so every check here fails fast with [`DtoError`] instead of
//! letting a bad value reach the wire.

use serde_json::Value;

use crate::error::{DtoError, Result};

/// Maximum characters in a twin key or resource identifier
pub const MAX_KEY_LENGTH: usize = 128;
/// Maximum characters in a storage blob name
pub const MAX_BLOB_NAME_LENGTH: usize = 1024;
/// Maximum `/`-separated path segments in a storage blob name
pub const MAX_BLOB_PATH_SEGMENTS: usize = 254;
/// Maximum nesting depth of a twin collection
pub const MAX_MAP_DEPTH: usize = 5;
/// Maximum nesting depth when metadata objects are interleaved
pub const MAX_MAP_DEPTH_WITH_METADATA: usize = 7;

/// Check that a string is non-empty and contains only 7-bit ASCII characters.
pub fn validate_string_ascii(s: &str, what: &'static str) -> Result<()> {
    if s.is_empty() {
        return Err(DtoError::invalid_string(what, "is empty"));
    }
    if !s.is_ascii() {
        return Err(DtoError::invalid_string(
            what,
            "contains a non-ASCII character",
        ));
    }
    Ok(())
}

/// Check that a twin key is valid.
///
/// Keys are limited to 128 ASCII characters and may not contain `.`, a space,
/// or `$`. Inside metadata objects the `$` prefix is the point, so
/// `metadata = true` permits it.
pub fn validate_key(key: &str, metadata: bool) -> Result<()> {
    validate_string_ascii(key, "key")?;
    if key.len() > MAX_KEY_LENGTH {
        return Err(DtoError::invalid_string(
            "key",
            format!("exceeds {} characters", MAX_KEY_LENGTH),
        ));
    }
    if key.contains('.') || key.contains(' ') || (key.contains('$') && !metadata) {
        return Err(DtoError::invalid_string(
            "key",
            format!("`{}` contains an illegal character", key),
        ));
    }
    Ok(())
}

fn is_id_char(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            b'-' | b':'
                | b'.'
                | b'+'
                | b'%'
                | b'_'
                | b'#'
                | b'*'
                | b'?'
                | b'!'
                | b'('
                | b')'
                | b','
                | b'='
                | b'@'
                | b';'
                | b'$'
                | b'\''
        )
}

/// Check that a device, module, registration, or job identifier is valid.
///
/// A case-sensitive string of up to 128 ASCII 7-bit alphanumeric characters
/// plus `- : . + % _ # * ? ! ( ) , = @ ; $ '`.
pub fn validate_id(id: &str) -> Result<()> {
    validate_string_ascii(id, "id")?;
    if id.len() > MAX_KEY_LENGTH {
        return Err(DtoError::invalid_string(
            "id",
            format!("exceeds {} characters", MAX_KEY_LENGTH),
        ));
    }
    if !id.bytes().all(is_id_char) {
        return Err(DtoError::invalid_string(
            "id",
            format!("`{}` contains an illegal character", id),
        ));
    }
    Ok(())
}

/// Check that a storage blob name is valid: ASCII, at most 1024 characters,
/// at most 254 path segments.
pub fn validate_blob_name(name: &str) -> Result<()> {
    validate_string_ascii(name, "blob name")?;
    if name.len() > MAX_BLOB_NAME_LENGTH {
        return Err(DtoError::invalid_string(
            "blob name",
            format!("exceeds {} characters", MAX_BLOB_NAME_LENGTH),
        ));
    }
    if name.split('/').count() > MAX_BLOB_PATH_SEGMENTS {
        return Err(DtoError::invalid_string(
            "blob name",
            format!("exceeds {} path segments", MAX_BLOB_PATH_SEGMENTS),
        ));
    }
    Ok(())
}

/// Check that a registry query string is valid: ASCII and containing both
/// `select` and `from` (case-insensitive).
pub fn validate_query(query: &str) -> Result<()> {
    validate_string_ascii(query, "query")?;
    let lower = query.to_lowercase();
    if !lower.contains("select") || !lower.contains("from") {
        return Err(DtoError::invalid_string(
            "query",
            "must contain select and from",
        ));
    }
    Ok(())
}

/// Recursively validate a JSON object destined for a twin collection.
///
/// Every key must pass [`validate_key`], arrays are rejected as values, and
/// nesting may not exceed `max_depth` levels. `metadata` relaxes the key
/// check to admit `$`-prefixed metadata keys.
pub fn validate_map(
    map: &serde_json::Map<String, Value>,
    max_depth: usize,
    metadata: bool,
) -> Result<()> {
    validate_map_at(map, 1, max_depth, metadata)
}

fn validate_map_at(
    map: &serde_json::Map<String, Value>,
    level: usize,
    max_depth: usize,
    metadata: bool,
) -> Result<()> {
    for (key, value) in map {
        validate_key(key, metadata)?;
        match value {
            Value::Array(_) => {
                return Err(DtoError::InvalidMap(format!(
                    "key `{}` holds an array, which twins do not allow",
                    key
                )));
            }
            Value::Object(inner) => {
                if level >= max_depth {
                    return Err(DtoError::InvalidMap(format!(
                        "exceeds {} levels of nesting",
                        max_depth
                    )));
                }
                validate_map_at(inner, level + 1, max_depth, metadata)?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ascii_string_rejects_empty_and_non_ascii() {
        assert!(validate_string_ascii("ok", "test").is_ok());
        assert!(validate_string_ascii("", "test").is_err());
        assert!(validate_string_ascii("bad\u{1234}value", "test").is_err());
    }

    #[test]
    fn key_accepts_plain_names_up_to_128_chars() {
        assert!(validate_key("Color", false).is_ok());
        assert!(validate_key(&"k".repeat(128), false).is_ok());
        assert!(validate_key(&"k".repeat(129), false).is_err());
    }

    #[test]
    fn key_rejects_dot_space_and_dollar() {
        assert!(validate_key("bad.key", false).is_err());
        assert!(validate_key("bad key", false).is_err());
        assert!(validate_key("$version", false).is_err());
        // metadata context admits `$`
        assert!(validate_key("$version", true).is_ok());
        // but never `.` or space
        assert!(validate_key("$bad.key", true).is_err());
    }

    #[test]
    fn id_accepts_documented_symbol_set() {
        assert!(validate_id("device-1:part.A+5%_#*?!(),=@;$'").is_ok());
        assert!(validate_id("no spaces").is_err());
        assert!(validate_id("no/slash").is_err());
        assert!(validate_id(&"d".repeat(129)).is_err());
    }

    #[test]
    fn blob_name_limits() {
        assert!(validate_blob_name("test-device1/image.jpg").is_ok());
        assert!(validate_blob_name(&"b".repeat(1025)).is_err());
        let deep = vec!["d"; 255].join("/");
        assert!(validate_blob_name(&deep).is_err());
        let ok = vec!["d"; 254].join("/");
        assert!(validate_blob_name(&ok).is_ok());
    }

    #[test]
    fn query_needs_select_and_from() {
        assert!(validate_query("SELECT * FROM devices").is_ok());
        assert!(validate_query("select deviceId from devices where x=1").is_ok());
        assert!(validate_query("SELECT *").is_err());
        assert!(validate_query("FROM devices").is_err());
    }

    #[test]
    fn map_depth_is_enforced() {
        let four = json!({"a": {"b": {"c": {"d": 1}}}});
        let six = json!({"a": {"b": {"c": {"d": {"e": {"f": 1}}}}}});
        assert!(validate_map(four.as_object().unwrap(), MAX_MAP_DEPTH, false).is_ok());
        assert!(validate_map(six.as_object().unwrap(), MAX_MAP_DEPTH, false).is_err());
        assert!(validate_map(six.as_object().unwrap(), MAX_MAP_DEPTH_WITH_METADATA, false).is_ok());
    }

    #[test]
    fn map_rejects_arrays_and_bad_keys() {
        let with_array = json!({"a": [1, 2]});
        assert!(validate_map(with_array.as_object().unwrap(), MAX_MAP_DEPTH, false).is_err());
        let with_bad_key = json!({"a.b": 1});
        assert!(validate_map(with_bad_key.as_object().unwrap(), MAX_MAP_DEPTH, false).is_err());
    }
}
