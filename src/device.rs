//! Device registry records and their authentication material.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dates::serde_utc_opt;
use crate::error::{DtoError, Result};
use crate::twin::DeviceCapabilities;
use crate::validation;

/// How a device authenticates against the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticationType {
    /// Shared access key authentication
    #[serde(rename = "sas")]
    Sas,
    /// Self-signed X.509 certificate thumbprints
    #[serde(rename = "selfSigned")]
    SelfSigned,
    /// Certificates signed by a registered certificate authority
    #[serde(rename = "certificateAuthority")]
    CertificateAuthority,
}

/// Primary and secondary shared access keys, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymmetricKey {
    /// Base64 primary key
    pub primary_key: String,
    /// Base64 secondary key
    pub secondary_key: String,
}

impl SymmetricKey {
    /// Build a key pair, rejecting material that is not valid base64.
    pub fn new(primary_key: String, secondary_key: String) -> Result<SymmetricKey> {
        for key in [&primary_key, &secondary_key].iter() {
            base64::decode(key)
                .map_err(|_| DtoError::invalid_string("symmetric key", "is not valid base64"))?;
        }
        Ok(SymmetricKey {
            primary_key,
            secondary_key,
        })
    }
}

/// Primary and secondary certificate thumbprints for self-signed devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509Thumbprint {
    /// Primary certificate thumbprint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_thumbprint: Option<String>,
    /// Secondary certificate thumbprint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_thumbprint: Option<String>,
}

/// The `authentication` object of a registry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    /// The mechanism in use
    #[serde(rename = "type")]
    pub authentication_type: AuthenticationType,
    /// Key pair, for `sas` devices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symmetric_key: Option<SymmetricKey>,
    /// Thumbprints, for `selfSigned` devices
    #[serde(rename = "x509Thumbprint", skip_serializing_if = "Option::is_none")]
    pub thumbprint: Option<X509Thumbprint>,
}

impl Authentication {
    /// Shared access key authentication with the provided key pair.
    pub fn with_symmetric_key(primary_key: String, secondary_key: String) -> Result<Authentication> {
        Ok(Authentication {
            authentication_type: AuthenticationType::Sas,
            symmetric_key: Some(SymmetricKey::new(primary_key, secondary_key)?),
            thumbprint: None,
        })
    }

    /// Self-signed certificate authentication with the provided thumbprints.
    pub fn with_self_signed(
        primary_thumbprint: String,
        secondary_thumbprint: Option<String>,
    ) -> Authentication {
        Authentication {
            authentication_type: AuthenticationType::SelfSigned,
            symmetric_key: None,
            thumbprint: Some(X509Thumbprint {
                primary_thumbprint: Some(primary_thumbprint),
                secondary_thumbprint,
            }),
        }
    }

    /// Certificate-authority signed authentication; carries no material.
    pub fn certificate_authority() -> Authentication {
        Authentication {
            authentication_type: AuthenticationType::CertificateAuthority,
            symmetric_key: None,
            thumbprint: None,
        }
    }
}

/// A device identity record as stored in the hub registry.
///
/// Mirrors the JSON returned by the registry REST API. `device_id` and
/// `authentication` are required; everything else is optional and omitted
/// from the serialized form when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    /// Weak ETag of the record
    #[serde(rename = "etag", skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Device identifier
    pub device_id: String,
    /// Module identifier, for module records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    /// Registry-assigned generation identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    /// enabled/disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Reason for a disabled status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    /// When the status last changed, echoed back but never read in
    #[serde(
        with = "serde_utc_opt",
        skip_deserializing,
        skip_serializing_if = "Option::is_none"
    )]
    pub status_updated_time: Option<DateTime<Utc>>,
    /// Last known connection state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_state: Option<String>,
    /// When the connection state last changed, echoed back but never read in
    #[serde(
        with = "serde_utc_opt",
        skip_deserializing,
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_state_updated_time: Option<DateTime<Utc>>,
    /// Last time the device was seen, echoed back but never read in
    #[serde(
        with = "serde_utc_opt",
        skip_deserializing,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_activity_time: Option<DateTime<Utc>>,
    /// Number of queued cloud-to-device messages
    #[serde(default)]
    pub cloud_to_device_message_count: i64,
    /// Authentication material
    pub authentication: Authentication,
    /// The entity managing this device, e.g. an IoT Edge parent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_by: Option<String>,
    /// Advertised capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<DeviceCapabilities>,
    /// The scope this device belongs to
    #[serde(rename = "deviceScope", skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Scopes of parent edge devices
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_scopes: Vec<String>,
}

impl DeviceRegistration {
    /// Create a minimal record with the required fields.
    pub fn new(device_id: &str, authentication: Authentication) -> Result<DeviceRegistration> {
        validation::validate_id(device_id)?;
        Ok(DeviceRegistration {
            etag: None,
            device_id: device_id.to_string(),
            module_id: None,
            generation_id: None,
            status: None,
            status_reason: None,
            status_updated_time: None,
            connection_state: None,
            connection_state_updated_time: None,
            last_activity_time: None,
            cloud_to_device_message_count: 0,
            authentication,
            managed_by: None,
            capabilities: None,
            scope: None,
            parent_scopes: Vec::new(),
        })
    }

    /// Parse a registry record, requiring a non-empty `deviceId` and an
    /// `authentication` object.
    pub fn from_json(json: &str) -> Result<DeviceRegistration> {
        if json.is_empty() {
            return Err(DtoError::MissingField("json"));
        }
        let registration: DeviceRegistration = serde_json::from_str(json).map_err(|e| {
            // serde reports a missing `authentication` struct field as a
            // data error; surface the friendlier variant
            if e.to_string().contains("authentication") {
                DtoError::MissingField("authentication")
            } else if e.to_string().contains("deviceId") {
                DtoError::MissingField("deviceId")
            } else {
                DtoError::from(e)
            }
        })?;
        if registration.device_id.is_empty() {
            return Err(DtoError::MissingField("deviceId"));
        }
        Ok(registration)
    }

    /// Serialize back to registry JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(DtoError::from)
    }

    /// Change the device identifier, validating it.
    pub fn set_device_id(&mut self, device_id: &str) -> Result<()> {
        validation::validate_id(device_id)?;
        self.device_id = device_id.to_string();
        Ok(())
    }

    /// Change the module identifier, validating it.
    pub fn set_module_id(&mut self, module_id: &str) -> Result<()> {
        validation::validate_id(module_id)?;
        self.module_id = Some(module_id.to_string());
        Ok(())
    }

    /// The ETag wrapped in quotes, as the service expects in `If-Match`
    /// headers.
    pub fn quoted_etag(&self) -> Option<String> {
        self.etag.as_ref().map(|etag| format!("\"{}\"", etag))
    }
}
