//! The canonical nested-map type behind twin tags and desired/reported
//! properties, including the incremental diff engine.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{DtoError, Result};
use crate::twin::metadata::TwinMetadata;
use crate::validation::{self, MAX_MAP_DEPTH, MAX_MAP_DEPTH_WITH_METADATA};

const VERSION_KEY: &str = "$version";
const METADATA_KEY: &str = "$metadata";

/// A twin collection: a string-keyed tree of scalars and sub-collections,
/// at most five levels deep, carrying an optional `$version` and `$metadata`
/// sidecar.
///
/// Values may be booleans, numbers, strings, or nested objects; arrays and
/// keys containing `.`, space, or `$` are rejected. The `$`-prefixed keys
/// are reserved for the service-supplied version and metadata, which are
/// split out of the entry map on construction.
///
/// [`TwinCollection::update`] is the diff engine: it merges a patch map into
/// the collection and reports only what actually changed, so repeated
/// application of the same patch converges to no-ops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TwinCollection {
    entries: Map<String, Value>,
    version: Option<i64>,
    metadata: Option<Map<String, Value>>,
}

impl TwinCollection {
    /// Create an empty collection.
    pub fn new() -> TwinCollection {
        TwinCollection::default()
    }

    /// Build a collection from a raw JSON object as received from the
    /// service, splitting `$version` and `$metadata` away from the entries.
    ///
    /// Fails if the version is not an integer, a metadata key names an entry
    /// that does not exist, a key is invalid, a value is an array, or the
    /// tree nests deeper than five levels.
    pub fn from_map(raw: Map<String, Value>) -> Result<TwinCollection> {
        let mut entries = Map::new();
        let mut version = None;
        let mut metadata = None;

        for (key, value) in raw {
            match key.as_str() {
                VERSION_KEY => {
                    version = Some(
                        value
                            .as_i64()
                            .ok_or_else(|| DtoError::InvalidMap("$version is not an integer".into()))?,
                    );
                }
                METADATA_KEY => match value {
                    Value::Object(object) => metadata = Some(object),
                    _ => {
                        return Err(DtoError::InvalidMap("$metadata is not an object".into()));
                    }
                },
                _ => {
                    entries.insert(key, value);
                }
            }
        }

        validation::validate_map(&entries, MAX_MAP_DEPTH, false)?;
        if let Some(metadata) = &metadata {
            validation::validate_map(metadata, MAX_MAP_DEPTH_WITH_METADATA, true)?;
            check_metadata_consistency(metadata, &entries)?;
        }

        Ok(TwinCollection {
            entries,
            version,
            metadata,
        })
    }

    /// Build a collection by parsing a JSON document.
    pub fn from_json(json: &str) -> Result<TwinCollection> {
        if json.is_empty() {
            return Err(DtoError::MissingField("json"));
        }
        let raw: Map<String, Value> = serde_json::from_str(json)?;
        TwinCollection::from_map(raw)
    }

    /// Insert or replace a single entry, validating the key and value.
    /// Returns the previous value of the key, if any.
    pub fn insert(&mut self, key: &str, value: Value) -> Result<Option<Value>> {
        validation::validate_key(key, false)?;
        let mut probe = Map::new();
        probe.insert(key.to_string(), value.clone());
        validation::validate_map(&probe, MAX_MAP_DEPTH, false)?;
        Ok(self.entries.insert(key.to_string(), value))
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Number of entries (metadata and version excluded).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the collection holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// The collection `$version`, when the service supplied one.
    pub fn version(&self) -> Option<i64> {
        self.version
    }

    /// Collection-level metadata (`$lastUpdated`/`$lastUpdatedVersion`).
    pub fn metadata(&self) -> Option<TwinMetadata> {
        self.metadata
            .as_ref()
            .and_then(TwinMetadata::from_metadata_object)
    }

    /// Metadata for one entry, when the service supplied it.
    pub fn metadata_for(&self, key: &str) -> Option<TwinMetadata> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(Value::as_object)
            .and_then(TwinMetadata::from_metadata_object)
    }

    /// Merge a patch map into the collection and return the sparse diff.
    ///
    /// Walking the patch against the stored entries:
    /// - a key absent from the collection is inserted and recorded,
    /// - a scalar with a different value overwrites and is recorded,
    /// - a nested object recurses, recording only non-empty sub-diffs,
    /// - a `null` value deletes the key and records the deletion.
    ///
    /// Returns `Ok(None)` when nothing changed.
    pub fn update(&mut self, patch: &Map<String, Value>) -> Result<Option<Value>> {
        validation::validate_map(patch, MAX_MAP_DEPTH, false)?;
        let diff = merge(&mut self.entries, patch);
        trace!("twin collection patch changed {} top-level keys", diff.len());
        if diff.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Value::Object(diff)))
        }
    }

    /// Discard all entries and adopt the provided map wholesale, returning
    /// the JSON of what the collection now holds. Version and metadata are
    /// cleared, since they described the replaced content.
    pub fn reset(&mut self, map: Map<String, Value>) -> Result<Value> {
        validation::validate_map(&map, MAX_MAP_DEPTH, false)?;
        self.entries = without_nulls(&map);
        self.version = None;
        self.metadata = None;
        Ok(Value::Object(self.entries.clone()))
    }

    /// The entries as a JSON object, metadata and version excluded.
    pub fn to_json_value(&self) -> Value {
        Value::Object(self.entries.clone())
    }

    /// The entries plus `$version` and `$metadata`, mirroring the document
    /// the service returns.
    pub fn to_json_value_with_metadata(&self) -> Value {
        let mut object = self.entries.clone();
        if let Some(version) = self.version {
            object.insert(VERSION_KEY.to_string(), Value::from(version));
        }
        if let Some(metadata) = &self.metadata {
            object.insert(METADATA_KEY.to_string(), Value::Object(metadata.clone()));
        }
        Value::Object(object)
    }
}

fn check_metadata_consistency(
    metadata: &Map<String, Value>,
    entries: &Map<String, Value>,
) -> Result<()> {
    for key in metadata.keys() {
        if key.starts_with('$') {
            continue;
        }
        if !entries.contains_key(key) {
            return Err(DtoError::InvalidMap(format!(
                "metadata names `{}` which is not in the collection",
                key
            )));
        }
    }
    Ok(())
}

fn merge(current: &mut Map<String, Value>, patch: &Map<String, Value>) -> Map<String, Value> {
    let mut diff = Map::new();
    for (key, value) in patch {
        match value {
            Value::Null => {
                if current.remove(key).is_some() {
                    diff.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(new_inner) => match current.get_mut(key) {
                Some(Value::Object(old_inner)) => {
                    let sub = merge(old_inner, new_inner);
                    if !sub.is_empty() {
                        diff.insert(key.clone(), Value::Object(sub));
                    }
                }
                _ => {
                    let inserted = without_nulls(new_inner);
                    current.insert(key.clone(), Value::Object(inserted.clone()));
                    diff.insert(key.clone(), Value::Object(inserted));
                }
            },
            scalar => {
                if current.get(key) != Some(scalar) {
                    current.insert(key.clone(), scalar.clone());
                    diff.insert(key.clone(), scalar.clone());
                }
            }
        }
    }
    diff
}

// Null values in a fresh sub-tree are delete markers with nothing to delete.
fn without_nulls(map: &Map<String, Value>) -> Map<String, Value> {
    let mut cleaned = Map::new();
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::Object(inner) => {
                cleaned.insert(key.clone(), Value::Object(without_nulls(inner)));
            }
            other => {
                cleaned.insert(key.clone(), other.clone());
            }
        }
    }
    cleaned
}

impl Serialize for TwinCollection {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TwinCollection {
    fn deserialize<D>(deserializer: D) -> std::result::Result<TwinCollection, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Map<String, Value> = Map::deserialize(deserializer)?;
        TwinCollection::from_map(raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn from_map_splits_version_and_metadata() {
        let collection = TwinCollection::from_map(obj(json!({
            "Color": "White",
            "MaxSpeed": {"Value": 500, "NewValue": 300},
            "$metadata": {
                "$lastUpdated": "2017-09-21T02:07:44.238Z",
                "$lastUpdatedVersion": 4,
                "Color": {
                    "$lastUpdated": "2017-09-21T02:07:44.238Z",
                    "$lastUpdatedVersion": 4
                }
            },
            "$version": 4
        })))
        .unwrap();

        assert_eq!(collection.version(), Some(4));
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.get("Color"), Some(&json!("White")));
        assert_eq!(
            collection.metadata_for("Color").unwrap().last_updated_version,
            Some(4)
        );
        assert_eq!(collection.metadata().unwrap().last_updated_version, Some(4));
    }

    #[test]
    fn from_map_rejects_inconsistent_metadata() {
        let err = TwinCollection::from_map(obj(json!({
            "Color": "White",
            "$metadata": {"Missing": {"$lastUpdatedVersion": 1}}
        })));
        assert!(err.is_err());
    }

    #[test]
    fn from_map_rejects_non_integer_version() {
        assert!(TwinCollection::from_map(obj(json!({"$version": "four"}))).is_err());
    }

    #[test]
    fn update_inserts_and_reports_new_keys() {
        let mut collection = TwinCollection::new();
        let diff = collection.update(&obj(json!({"a": 1}))).unwrap();
        assert_eq!(diff, Some(json!({"a": 1})));
        assert_eq!(collection.get("a"), Some(&json!(1)));
    }

    #[test]
    fn update_is_idempotent_once_converged() {
        let mut collection = TwinCollection::new();
        collection.update(&obj(json!({"a": 1}))).unwrap();
        let second = collection.update(&obj(json!({"a": 1}))).unwrap();
        assert_eq!(second, None);
    }

    #[test]
    fn update_overwrites_changed_scalars() {
        let mut collection = TwinCollection::new();
        collection.update(&obj(json!({"a": 1, "b": "x"}))).unwrap();
        let diff = collection.update(&obj(json!({"a": 2, "b": "x"}))).unwrap();
        assert_eq!(diff, Some(json!({"a": 2})));
    }

    #[test]
    fn update_null_deletes_and_reports() {
        let mut collection = TwinCollection::new();
        collection.update(&obj(json!({"a": 1}))).unwrap();
        let diff = collection.update(&obj(json!({"a": null}))).unwrap();
        assert_eq!(diff, Some(json!({"a": null})));
        assert!(collection.get("a").is_none());
        // deleting a key that never existed is not a change
        let diff = collection.update(&obj(json!({"ghost": null}))).unwrap();
        assert_eq!(diff, None);
    }

    #[test]
    fn update_recurses_into_nested_maps() {
        let mut collection = TwinCollection::new();
        collection
            .update(&obj(json!({"MaxSpeed": {"Value": 500, "NewValue": 300}})))
            .unwrap();
        let diff = collection
            .update(&obj(json!({"MaxSpeed": {"Value": 500, "NewValue": 350}})))
            .unwrap();
        assert_eq!(diff, Some(json!({"MaxSpeed": {"NewValue": 350}})));
        assert_eq!(
            collection.get("MaxSpeed"),
            Some(&json!({"Value": 500, "NewValue": 350}))
        );
    }

    #[test]
    fn update_replaces_scalar_with_map() {
        let mut collection = TwinCollection::new();
        collection.update(&obj(json!({"a": 1}))).unwrap();
        let diff = collection.update(&obj(json!({"a": {"b": 2}}))).unwrap();
        assert_eq!(diff, Some(json!({"a": {"b": 2}})));
    }

    #[test]
    fn update_rejects_deep_or_invalid_patches() {
        let mut collection = TwinCollection::new();
        let deep = obj(json!({"a": {"b": {"c": {"d": {"e": {"f": 1}}}}}}));
        assert!(collection.update(&deep).is_err());
        let dotted = obj(json!({"a.b": 1}));
        assert!(collection.update(&dotted).is_err());
        let array = obj(json!({"a": [1, 2]}));
        assert!(collection.update(&array).is_err());
    }

    #[test]
    fn reset_replaces_everything() {
        let mut collection = TwinCollection::from_map(obj(json!({"a": 1, "$version": 3}))).unwrap();
        let result = collection.reset(obj(json!({"b": 2, "c": null}))).unwrap();
        assert_eq!(result, json!({"b": 2}));
        assert!(collection.get("a").is_none());
        assert_eq!(collection.version(), None);
    }

    #[test]
    fn serializes_without_metadata() {
        let collection = TwinCollection::from_map(obj(json!({
            "Color": "White",
            "$version": 2,
            "$metadata": {"$lastUpdatedVersion": 2}
        })))
        .unwrap();
        assert_eq!(
            serde_json::to_value(&collection).unwrap(),
            json!({"Color": "White"})
        );
        assert_eq!(
            collection.to_json_value_with_metadata(),
            json!({"Color": "White", "$version": 2, "$metadata": {"$lastUpdatedVersion": 2}})
        );
    }
}
