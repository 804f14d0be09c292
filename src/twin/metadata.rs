use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::dates;

pub(crate) const LAST_UPDATED_KEY: &str = "$lastUpdated";
pub(crate) const LAST_UPDATED_VERSION_KEY: &str = "$lastUpdatedVersion";

/// Per-entry metadata the service attaches to twin collections: when the
/// entry last changed and at which collection version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TwinMetadata {
    /// Instant of the last update, from `$lastUpdated`
    pub last_updated: Option<DateTime<Utc>>,
    /// Collection version at the last update, from `$lastUpdatedVersion`
    pub last_updated_version: Option<i64>,
}

impl TwinMetadata {
    /// Extract the metadata pair from a `$metadata` object, ignoring the
    /// nested per-key entries. Returns `None` when neither key is present.
    pub(crate) fn from_metadata_object(object: &Map<String, Value>) -> Option<TwinMetadata> {
        let last_updated = object
            .get(LAST_UPDATED_KEY)
            .and_then(Value::as_str)
            .and_then(|s| dates::parse_utc(s).ok());
        let last_updated_version = object.get(LAST_UPDATED_VERSION_KEY).and_then(Value::as_i64);

        if last_updated.is_none() && last_updated_version.is_none() {
            None
        } else {
            Some(TwinMetadata {
                last_updated,
                last_updated_version,
            })
        }
    }

    /// Render back to the `$lastUpdated`/`$lastUpdatedVersion` JSON pair.
    pub fn to_json_value(&self) -> Value {
        let mut object = Map::new();
        if let Some(dt) = &self.last_updated {
            object.insert(
                LAST_UPDATED_KEY.to_string(),
                Value::String(dates::format_utc_3(dt)),
            );
        }
        if let Some(version) = self.last_updated_version {
            object.insert(LAST_UPDATED_VERSION_KEY.to_string(), Value::from(version));
        }
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_pair_from_metadata_object() {
        let raw = json!({
            "$lastUpdated": "2017-09-21T02:07:44.238Z",
            "$lastUpdatedVersion": 4,
            "Color": {"$lastUpdated": "2017-09-21T02:07:44.238Z"}
        });
        let meta = TwinMetadata::from_metadata_object(raw.as_object().unwrap()).unwrap();
        assert_eq!(meta.last_updated_version, Some(4));
        assert_eq!(
            meta.last_updated.unwrap(),
            crate::dates::parse_utc("2017-09-21T02:07:44.238Z").unwrap()
        );
    }

    #[test]
    fn empty_metadata_object_yields_none() {
        let raw = json!({"Color": {"$lastUpdatedVersion": 2}});
        assert!(TwinMetadata::from_metadata_object(raw.as_object().unwrap()).is_none());
    }
}
