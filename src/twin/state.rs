//! The twin document: registry header plus tag and property collections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dates::serde_utc_opt;
use crate::error::{DtoError, Result};
use crate::twin::TwinCollection;
use crate::validation;

/// Whether the device is allowed to connect to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwinStatus {
    /// The device is authorized to connect
    Enabled,
    /// The device cannot send or receive; `status_reason` should say why
    Disabled,
}

/// Last known connection state reported by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TwinConnectionState {
    /// The device has an open connection
    Connected,
    /// The device is not connected
    Disconnected,
}

/// Optional capabilities advertised for the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// Whether the device is an IoT Edge runtime
    #[serde(rename = "iotEdge", default)]
    pub iot_edge: bool,
}

/// The `properties` envelope holding the desired and reported collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwinProperties {
    /// Properties the back end wants the device to honor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired: Option<TwinCollection>,
    /// Properties the device last reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported: Option<TwinCollection>,
}

/// Sparse diffs produced by [`TwinState::apply_json`], one per section that
/// actually changed.
///
/// This is the explicit replacement for callback wiring: callers inspect the
/// returned delta instead of registering change listeners.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TwinDelta {
    /// Changed tags, if any
    pub tags: Option<Value>,
    /// Changed desired properties, if any
    pub desired: Option<Value>,
    /// Changed reported properties, if any
    pub reported: Option<Value>,
}

impl TwinDelta {
    /// True when no section changed.
    pub fn is_empty(&self) -> bool {
        self.tags.is_none() && self.desired.is_none() && self.reported.is_none()
    }
}

/// A device twin as stored by the hub: identity and status header, `tags`,
/// and `properties.desired`/`properties.reported` collections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwinState {
    /// Device identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Module identifier, for module twins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    /// Weak ETag of the twin document
    #[serde(rename = "etag", skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Generation identifier assigned by the registry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    /// Version of the whole twin document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// enabled/disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TwinStatus>,
    /// Reason for a disabled status, up to 128 characters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    /// When the status last changed
    #[serde(
        with = "serde_utc_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub status_updated_time: Option<DateTime<Utc>>,
    /// Last known connection state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_state: Option<TwinConnectionState>,
    /// When the connection state last changed
    #[serde(
        with = "serde_utc_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_state_updated_time: Option<DateTime<Utc>>,
    /// Last time the device was seen
    #[serde(
        with = "serde_utc_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_activity_time: Option<DateTime<Utc>>,
    /// Number of cloud-to-device messages queued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_to_device_message_count: Option<i64>,
    /// Device capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<DeviceCapabilities>,
    /// The tag collection, service-writable only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<TwinCollection>,
    /// Desired and reported property collections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<TwinProperties>,
}

impl TwinState {
    /// Create a twin from its collections.
    pub fn new(
        tags: Option<TwinCollection>,
        desired: Option<TwinCollection>,
        reported: Option<TwinCollection>,
    ) -> TwinState {
        let properties = if desired.is_some() || reported.is_some() {
            Some(TwinProperties { desired, reported })
        } else {
            None
        };
        TwinState {
            tags,
            properties,
            ..TwinState::default()
        }
    }

    /// Parse a full twin document.
    ///
    /// The JSON must carry `tags` and/or `properties`; a document with
    /// top-level `desired`/`reported` belongs to
    /// [`TwinState::from_properties_json`], and one that mixes the two
    /// shapes is rejected.
    pub fn from_twin_json(json: &str) -> Result<TwinState> {
        let raw = parse_object(json)?;
        let has_sections = raw.contains_key("tags") || raw.contains_key("properties");
        let has_bare_properties = raw.contains_key("desired") || raw.contains_key("reported");
        if has_sections && has_bare_properties {
            return Err(DtoError::InvalidCombination(
                "twin json mixes `properties` with top-level `desired`/`reported`".into(),
            ));
        }
        if !has_sections {
            return Err(DtoError::InvalidCombination(
                "json does not contain twin information".into(),
            ));
        }
        serde_json::from_value(Value::Object(raw)).map_err(DtoError::from)
    }

    /// Parse a bare properties document: `{"desired": {...}, "reported": {...}}`.
    pub fn from_properties_json(json: &str) -> Result<TwinState> {
        let raw = parse_object(json)?;
        let properties: TwinProperties = serde_json::from_value(Value::Object(raw))?;
        Ok(TwinState::new(None, properties.desired, properties.reported))
    }

    /// Parse a document that is itself the desired collection.
    pub fn from_desired_property_json(json: &str) -> Result<TwinState> {
        Ok(TwinState::new(
            None,
            Some(TwinCollection::from_json(json)?),
            None,
        ))
    }

    /// Parse a document that is itself the reported collection.
    pub fn from_reported_property_json(json: &str) -> Result<TwinState> {
        Ok(TwinState::new(
            None,
            None,
            Some(TwinCollection::from_json(json)?),
        ))
    }

    /// Serialize the twin the way it is sent to the service: header fields
    /// plus tags and properties without their metadata sidecars.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(DtoError::from)
    }

    /// The desired collection, if present.
    pub fn desired(&self) -> Option<&TwinCollection> {
        self.properties.as_ref().and_then(|p| p.desired.as_ref())
    }

    /// The reported collection, if present.
    pub fn reported(&self) -> Option<&TwinCollection> {
        self.properties.as_ref().and_then(|p| p.reported.as_ref())
    }

    /// Merge a patch into the desired collection (creating it if absent) and
    /// return the sparse diff, or `None` when already converged.
    pub fn update_desired(&mut self, patch: &Map<String, Value>) -> Result<Option<Value>> {
        self.properties
            .get_or_insert_with(TwinProperties::default)
            .desired
            .get_or_insert_with(TwinCollection::new)
            .update(patch)
    }

    /// Merge a patch into the reported collection, as [`TwinState::update_desired`].
    pub fn update_reported(&mut self, patch: &Map<String, Value>) -> Result<Option<Value>> {
        self.properties
            .get_or_insert_with(TwinProperties::default)
            .reported
            .get_or_insert_with(TwinCollection::new)
            .update(patch)
    }

    /// Merge a patch into the tag collection, as [`TwinState::update_desired`].
    pub fn update_tags(&mut self, patch: &Map<String, Value>) -> Result<Option<Value>> {
        self.tags
            .get_or_insert_with(TwinCollection::new)
            .update(patch)
    }

    /// Set the device identifier, validating it first.
    pub fn set_device_id(&mut self, device_id: &str) -> Result<()> {
        validation::validate_id(device_id)?;
        self.device_id = Some(device_id.to_string());
        Ok(())
    }

    /// Set the ETag, validating it is ASCII.
    pub fn set_etag(&mut self, etag: &str) -> Result<()> {
        validation::validate_string_ascii(etag, "etag")?;
        self.etag = Some(etag.to_string());
        Ok(())
    }

    /// Apply a twin document received from the service, merging its header
    /// fields and running the diff engine over each section it carries.
    ///
    /// The returned [`TwinDelta`] holds the changes per section; an empty
    /// delta means the document matched the stored state.
    pub fn apply_json(&mut self, json: &str) -> Result<TwinDelta> {
        let raw = parse_object(json)?;

        // Accept both the nested `properties` form and the bare
        // `desired`/`reported` form, but never a mix.
        let properties_level = raw.contains_key("properties") || raw.contains_key("tags");
        if properties_level && (raw.contains_key("desired") || raw.contains_key("reported")) {
            return Err(DtoError::InvalidCombination(
                "twin json mixes `properties` with top-level `desired`/`reported`".into(),
            ));
        }

        let header: TwinHeader = serde_json::from_value(Value::Object(raw.clone()))?;
        header.merge_into(self);

        let mut delta = TwinDelta::default();
        if let Some(tags) = raw.get("tags").and_then(Value::as_object) {
            delta.tags = self.update_tags(&strip_service_keys(tags))?;
        }

        let sections = if properties_level {
            raw.get("properties").and_then(Value::as_object).cloned()
        } else {
            Some(raw)
        };
        if let Some(sections) = sections {
            if let Some(desired) = sections.get("desired").and_then(Value::as_object) {
                delta.desired = self.update_desired(&strip_service_keys(desired))?;
            }
            if let Some(reported) = sections.get("reported").and_then(Value::as_object) {
                delta.reported = self.update_reported(&strip_service_keys(reported))?;
            }
        }

        debug!(
            "applied twin document (tags: {}, desired: {}, reported: {})",
            delta.tags.is_some(),
            delta.desired.is_some(),
            delta.reported.is_some()
        );
        Ok(delta)
    }
}

// Header-only view used when applying incoming documents, so unknown
// sections do not disturb the collection merge.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TwinHeader {
    device_id: Option<String>,
    module_id: Option<String>,
    #[serde(rename = "etag")]
    etag: Option<String>,
    generation_id: Option<String>,
    version: Option<i64>,
    status: Option<TwinStatus>,
    status_reason: Option<String>,
    connection_state: Option<TwinConnectionState>,
    cloud_to_device_message_count: Option<i64>,
    capabilities: Option<DeviceCapabilities>,
}

impl TwinHeader {
    fn merge_into(self, twin: &mut TwinState) {
        let TwinHeader {
            device_id,
            module_id,
            etag,
            generation_id,
            version,
            status,
            status_reason,
            connection_state,
            cloud_to_device_message_count,
            capabilities,
        } = self;
        twin.device_id = device_id.or(twin.device_id.take());
        twin.module_id = module_id.or(twin.module_id.take());
        twin.etag = etag.or(twin.etag.take());
        twin.generation_id = generation_id.or(twin.generation_id.take());
        twin.version = version.or(twin.version);
        twin.status = status.or(twin.status);
        twin.status_reason = status_reason.or(twin.status_reason.take());
        twin.connection_state = connection_state.or(twin.connection_state);
        twin.cloud_to_device_message_count =
            cloud_to_device_message_count.or(twin.cloud_to_device_message_count);
        twin.capabilities = capabilities.or(twin.capabilities);
    }
}

fn parse_object(json: &str) -> Result<Map<String, Value>> {
    if json.is_empty() {
        return Err(DtoError::MissingField("json"));
    }
    serde_json::from_str(json).map_err(DtoError::from)
}

// `$version`/`$metadata` ride along in service documents but are not part
// of the patch itself.
fn strip_service_keys(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter(|(k, _)| !k.starts_with('$'))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TWIN_JSON: &str = r#"{
        "deviceId": "device-1",
        "etag": "AAAAAAAAAAU=",
        "version": 5,
        "status": "enabled",
        "connectionState": "connected",
        "tags": {
            "SpeedUnity": "MPH",
            "$version": 4
        },
        "properties": {
            "desired": {
                "MaxSpeed": {"Value": 500, "NewValue": 300},
                "$version": 4
            },
            "reported": {
                "MaxSpeed": {"Value": 500},
                "$version": 6
            }
        }
    }"#;

    #[test]
    fn parses_full_twin_document() {
        let twin = TwinState::from_twin_json(TWIN_JSON).unwrap();
        assert_eq!(twin.device_id.as_deref(), Some("device-1"));
        assert_eq!(twin.status, Some(TwinStatus::Enabled));
        assert_eq!(twin.tags.as_ref().unwrap().version(), Some(4));
        assert_eq!(twin.desired().unwrap().version(), Some(4));
        assert_eq!(
            twin.reported().unwrap().get("MaxSpeed"),
            Some(&json!({"Value": 500}))
        );
    }

    #[test]
    fn rejects_json_without_twin_sections() {
        assert!(TwinState::from_twin_json(r#"{"deviceId": "d"}"#).is_err());
    }

    #[test]
    fn rejects_mixed_properties_levels() {
        let mixed = r#"{"properties": {"desired": {}}, "desired": {"a": 1}}"#;
        assert!(TwinState::from_twin_json(mixed).is_err());
    }

    #[test]
    fn parses_bare_properties_document() {
        let twin =
            TwinState::from_properties_json(r#"{"desired": {"a": 1}, "reported": {"b": 2}}"#)
                .unwrap();
        assert_eq!(twin.desired().unwrap().get("a"), Some(&json!(1)));
        assert_eq!(twin.reported().unwrap().get("b"), Some(&json!(2)));
    }

    #[test]
    fn desired_property_json_becomes_desired_collection() {
        let twin =
            TwinState::from_desired_property_json(r#"{"Speed": 60, "$version": 2}"#).unwrap();
        let desired = twin.desired().unwrap();
        assert_eq!(desired.get("Speed"), Some(&json!(60)));
        assert_eq!(desired.version(), Some(2));
    }

    #[test]
    fn serializer_excludes_metadata() {
        let twin = TwinState::from_twin_json(TWIN_JSON).unwrap();
        let value: Value = serde_json::from_str(&twin.to_json().unwrap()).unwrap();
        assert_eq!(value["tags"], json!({"SpeedUnity": "MPH"}));
        assert!(value["properties"]["desired"].get("$version").is_none());
    }

    #[test]
    fn apply_json_reports_deltas_and_converges() {
        let mut twin = TwinState::from_twin_json(TWIN_JSON).unwrap();
        let delta = twin.apply_json(TWIN_JSON).unwrap();
        // same document again: nothing changes
        assert!(delta.is_empty());

        let patch = r#"{"properties": {"desired": {"MaxSpeed": {"NewValue": 350}}}}"#;
        let delta = twin.apply_json(patch).unwrap();
        assert_eq!(delta.desired, Some(json!({"MaxSpeed": {"NewValue": 350}})));
        assert!(delta.tags.is_none());
        assert_eq!(
            twin.desired().unwrap().get("MaxSpeed"),
            Some(&json!({"Value": 500, "NewValue": 350}))
        );
    }

    #[test]
    fn apply_json_handles_bare_desired_patch() {
        let mut twin = TwinState::default();
        let delta = twin.apply_json(r#"{"desired": {"a": 1}}"#).unwrap();
        assert_eq!(delta.desired, Some(json!({"a": 1})));
        assert!(delta.reported.is_none());
    }

    #[test]
    fn update_tags_null_removes_tag() {
        let mut twin = TwinState::from_twin_json(TWIN_JSON).unwrap();
        let map = json!({"SpeedUnity": null});
        let diff = twin.update_tags(map.as_object().unwrap()).unwrap();
        assert_eq!(diff, Some(json!({"SpeedUnity": null})));
        assert!(twin.tags.as_ref().unwrap().get("SpeedUnity").is_none());
    }

    #[test]
    fn set_device_id_validates() {
        let mut twin = TwinState::default();
        assert!(twin.set_device_id("valid-device").is_ok());
        assert!(twin.set_device_id("bad device").is_err());
    }
}
