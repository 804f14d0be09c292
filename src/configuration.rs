//! Automatic device configuration records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dates::serde_utc_opt;
use crate::error::{DtoError, Result};
use crate::validation;

/// The payload a configuration applies to its targets: per-module content
/// for edge deployments and device twin content for plain devices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationContent {
    /// Desired module twin sections, keyed by module name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub modules_content: HashMap<String, Value>,
    /// Desired device twin section
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub device_content: HashMap<String, Value>,
}

/// Query-driven metric definitions and their last evaluated results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationMetrics {
    /// Latest result per metric name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub results: HashMap<String, i64>,
    /// Query text per metric name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub queries: HashMap<String, String>,
}

/// A configuration record as stored by the service.
///
/// `id` and `schema_version` are required on the wire. The timestamps are
/// service-assigned, so they are read from responses but never sent back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Configuration identifier
    pub id: String,
    /// Version of the configuration schema, currently `1.0`
    pub schema_version: String,
    /// Free-form labels
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Content applied to targeted devices, read from responses only
    #[serde(default, skip_serializing)]
    pub content: Option<ConfigurationContent>,
    /// Media type of the content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Query selecting the devices this configuration targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_condition: Option<String>,
    /// When the record was created, echoed back but never read in
    #[serde(
        with = "serde_utc_opt",
        skip_deserializing,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_time_utc: Option<DateTime<Utc>>,
    /// When the record last changed, echoed back but never read in
    #[serde(
        with = "serde_utc_opt",
        skip_deserializing,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated_time_utc: Option<DateTime<Utc>>,
    /// Relative priority among overlapping configurations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Service-computed rollout metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_metrics: Option<ConfigurationMetrics>,
    /// User-defined metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ConfigurationMetrics>,
    /// Weak ETag of the record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl Configuration {
    /// Create an empty configuration with the required fields, validating
    /// the identifier.
    pub fn new(id: &str) -> Result<Configuration> {
        validation::validate_id(id)?;
        Ok(Configuration {
            id: id.to_string(),
            schema_version: "1.0".to_string(),
            labels: HashMap::new(),
            content: None,
            content_type: None,
            target_condition: None,
            created_time_utc: None,
            last_updated_time_utc: None,
            priority: None,
            system_metrics: None,
            metrics: None,
            etag: None,
        })
    }

    /// Parse a service response, requiring non-empty `id` and
    /// `schemaVersion` fields.
    pub fn from_json(json: &str) -> Result<Configuration> {
        if json.is_empty() {
            return Err(DtoError::MissingField("json"));
        }
        let configuration: Configuration = serde_json::from_str(json)?;
        if configuration.id.is_empty() {
            return Err(DtoError::MissingField("id"));
        }
        if configuration.schema_version.is_empty() {
            return Err(DtoError::MissingField("schemaVersion"));
        }
        Ok(configuration)
    }

    /// Serialize for submission to the service. Timestamps are omitted.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(DtoError::from)
    }

    /// The ETag wrapped in quotes for `If-Match` headers.
    pub fn quoted_etag(&self) -> Option<String> {
        self.etag.as_ref().map(|etag| format!("\"{}\"", etag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CONFIGURATION_JSON: &str = r#"{
        "id": "deployment-1",
        "schemaVersion": "1.0",
        "labels": {"env": "prod"},
        "content": {
            "modulesContent": {
                "$edgeAgent": {"properties.desired": {"schemaVersion": "1.0"}}
            }
        },
        "targetCondition": "tags.building='43'",
        "createdTimeUtc": "2019-05-07T10:13:45.123Z",
        "lastUpdatedTimeUtc": "2019-05-08T10:13:45.123Z",
        "priority": 10,
        "systemMetrics": {
            "results": {"targetedCount": 2, "appliedCount": 1},
            "queries": {}
        },
        "metrics": {
            "results": {},
            "queries": {"warningLimit": "select deviceId from devices"}
        },
        "etag": "MQ=="
    }"#;

    #[test]
    fn parses_service_record() {
        let configuration = Configuration::from_json(CONFIGURATION_JSON).unwrap();
        assert_eq!(configuration.id, "deployment-1");
        assert_eq!(configuration.priority, Some(10));
        assert_eq!(
            configuration.target_condition.as_deref(),
            Some("tags.building='43'")
        );
        assert_eq!(
            configuration
                .system_metrics
                .as_ref()
                .unwrap()
                .results
                .get("targetedCount"),
            Some(&2)
        );
        // service timestamps are write-out only
        assert!(configuration.created_time_utc.is_none());
        assert!(configuration
            .content
            .unwrap()
            .modules_content
            .contains_key("$edgeAgent"));
    }

    #[test]
    fn missing_id_fails() {
        assert!(Configuration::from_json(r#"{"schemaVersion": "1.0"}"#).is_err());
        assert!(Configuration::from_json(r#"{"id": "", "schemaVersion": "1.0"}"#).is_err());
    }

    #[test]
    fn missing_schema_version_fails() {
        assert!(Configuration::from_json(r#"{"id": "c1"}"#).is_err());
        assert!(Configuration::from_json(r#"{"id": "c1", "schemaVersion": ""}"#).is_err());
    }

    #[test]
    fn content_is_not_echoed_back() {
        let mut configuration = Configuration::from_json(CONFIGURATION_JSON).unwrap();
        configuration.created_time_utc =
            Some(crate::dates::parse_utc("2019-05-07T10:13:45.123Z").unwrap());
        let value: Value = serde_json::from_str(&configuration.to_json().unwrap()).unwrap();
        assert!(value.get("content").is_none());
        assert_eq!(value["createdTimeUtc"], json!("2019-05-07T10:13:45.123Z"));
        assert_eq!(value["id"], json!("deployment-1"));
        assert_eq!(value["priority"], json!(10));
    }

    #[test]
    fn new_defaults_schema_version() {
        let configuration = Configuration::new("c1").unwrap();
        assert_eq!(configuration.schema_version, "1.0");
        let value: Value = serde_json::from_str(&configuration.to_json().unwrap()).unwrap();
        assert_eq!(value["schemaVersion"], json!("1.0"));
        assert!(value.get("labels").is_none());
    }

    #[test]
    fn new_rejects_invalid_ids() {
        assert!(Configuration::new("").is_err());
        assert!(Configuration::new("bad id with spaces").is_err());
        assert!(Configuration::new("deployment-1").is_ok());
    }
}
