//! Provisioning enrollments: individual records, enrollment groups and the
//! attestation material that proves a device's identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dates::serde_utc_lenient;
use crate::error::{DtoError, Result};
use crate::twin::{DeviceCapabilities, TwinState};
use crate::validation;

/// TPM attestation material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TpmAttestation {
    /// Base64 endorsement key of the TPM
    pub endorsement_key: String,
    /// Base64 storage root key, returned by the service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_root_key: Option<String>,
}

impl TpmAttestation {
    /// Build TPM attestation from an endorsement key.
    pub fn new(endorsement_key: &str) -> Result<TpmAttestation> {
        if endorsement_key.is_empty() {
            return Err(DtoError::MissingField("endorsementKey"));
        }
        Ok(TpmAttestation {
            endorsement_key: endorsement_key.to_string(),
            storage_root_key: None,
        })
    }
}

/// Symmetric key attestation material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymmetricKeyAttestation {
    /// Base64 primary key
    pub primary_key: String,
    /// Base64 secondary key
    pub secondary_key: String,
}

/// A single X.509 certificate, either inline as PEM or described by the
/// service-computed info block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509CertificateWithInfo {
    /// PEM text of the certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// Parsed certificate details, filled in by the service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<X509CertificateInfo>,
}

/// Certificate details the service extracts from an uploaded certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509CertificateInfo {
    /// Certificate subject name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
    /// SHA-1 thumbprint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1_thumbprint: Option<String>,
    /// SHA-256 thumbprint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256_thumbprint: Option<String>,
    /// Certificate issuer name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_name: Option<String>,
    /// Start of the validity window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before_utc: Option<String>,
    /// End of the validity window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after_utc: Option<String>,
    /// Certificate serial number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// X.509 version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
}

/// A primary certificate with an optional secondary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509Certificates {
    /// Primary certificate
    pub primary: X509CertificateWithInfo,
    /// Secondary certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<X509CertificateWithInfo>,
}

/// References to CA certificates already uploaded to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509CaReferences {
    /// Primary CA reference
    pub primary: String,
    /// Secondary CA reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

/// X.509 attestation material. Exactly one of the three certificate sets
/// must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509Attestation {
    /// Client certificates, for individual enrollments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificates: Option<X509Certificates>,
    /// Signing certificates, for enrollment groups
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_certificates: Option<X509Certificates>,
    /// CA references, for enrollment groups
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_references: Option<X509CaReferences>,
}

impl X509Attestation {
    /// Attestation by client certificate.
    pub fn with_client_certificate(
        primary: &str,
        secondary: Option<&str>,
    ) -> Result<X509Attestation> {
        Ok(X509Attestation {
            client_certificates: Some(certificates(primary, secondary)?),
            signing_certificates: None,
            ca_references: None,
        })
    }

    /// Attestation by signing certificate.
    pub fn with_signing_certificate(
        primary: &str,
        secondary: Option<&str>,
    ) -> Result<X509Attestation> {
        Ok(X509Attestation {
            client_certificates: None,
            signing_certificates: Some(certificates(primary, secondary)?),
            ca_references: None,
        })
    }

    /// Attestation by reference to an uploaded CA certificate.
    pub fn with_ca_references(primary: &str, secondary: Option<&str>) -> Result<X509Attestation> {
        if primary.is_empty() {
            return Err(DtoError::MissingField("primary"));
        }
        Ok(X509Attestation {
            client_certificates: None,
            signing_certificates: None,
            ca_references: Some(X509CaReferences {
                primary: primary.to_string(),
                secondary: secondary.map(str::to_string),
            }),
        })
    }

    fn validate(&self) -> Result<()> {
        let populated = self.client_certificates.is_some() as u8
            + self.signing_certificates.is_some() as u8
            + self.ca_references.is_some() as u8;
        match populated {
            0 => Err(DtoError::InvalidCombination(
                "x509 attestation carries no certificate information".to_string(),
            )),
            1 => Ok(()),
            _ => Err(DtoError::InvalidCombination(
                "x509 attestation cannot carry more than one certificate set".to_string(),
            )),
        }
    }
}

fn certificates(primary: &str, secondary: Option<&str>) -> Result<X509Certificates> {
    if primary.is_empty() {
        return Err(DtoError::MissingField("primary"));
    }
    Ok(X509Certificates {
        primary: X509CertificateWithInfo {
            certificate: Some(primary.to_string()),
            info: None,
        },
        secondary: secondary.map(|pem| X509CertificateWithInfo {
            certificate: Some(pem.to_string()),
            info: None,
        }),
    })
}

/// The attestation mechanism of an enrollment, tagged by `type` with the
/// material under the matching sibling key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AttestationMechanism {
    /// TPM endorsement key attestation
    #[serde(rename = "tpm")]
    Tpm {
        /// The TPM material
        tpm: TpmAttestation,
    },
    /// X.509 certificate attestation
    #[serde(rename = "x509")]
    X509 {
        /// The certificate material
        x509: X509Attestation,
    },
    /// Symmetric key attestation
    #[serde(rename = "symmetricKey")]
    SymmetricKey {
        /// The key material
        #[serde(rename = "symmetricKey")]
        symmetric_key: SymmetricKeyAttestation,
    },
}

impl AttestationMechanism {
    fn validate(&self) -> Result<()> {
        match self {
            AttestationMechanism::Tpm { tpm } => {
                if tpm.endorsement_key.is_empty() {
                    return Err(DtoError::MissingField("endorsementKey"));
                }
            }
            AttestationMechanism::X509 { x509 } => x509.validate()?,
            AttestationMechanism::SymmetricKey { .. } => {}
        }
        Ok(())
    }
}

/// Whether an enrollment may provision devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningStatus {
    /// The enrollment is active
    Enabled,
    /// The enrollment is suspended
    Disabled,
}

/// The provisioning state of a device under an enrollment, reported by the
/// service and never sent back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistrationState {
    /// Registration identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<String>,
    /// When the device first registered
    #[serde(
        with = "serde_utc_lenient",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_date_time_utc: Option<DateTime<Utc>>,
    /// Hub the device was assigned to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_hub: Option<String>,
    /// Device identifier in the assigned hub
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Registration status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Service error code, when registration failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
    /// Service error message, when registration failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the state last changed
    #[serde(
        with = "serde_utc_lenient",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated_date_time_utc: Option<DateTime<Utc>>,
    /// Weak ETag of the state record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// An individual enrollment record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualEnrollment {
    /// Registration identifier, required
    pub registration_id: String,
    /// Device identifier to assign at provisioning time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Current provisioning state, service assigned
    #[serde(default, skip_serializing, rename = "registrationState")]
    pub registration_state: Option<DeviceRegistrationState>,
    /// Attestation mechanism, required
    pub attestation: AttestationMechanism,
    /// Hub to provision into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iot_hub_host_name: Option<String>,
    /// Twin applied to the device at provisioning time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_twin: Option<TwinState>,
    /// Whether the enrollment is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_status: Option<ProvisioningStatus>,
    /// When the enrollment was created
    #[serde(
        with = "serde_utc_lenient",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_date_time_utc: Option<DateTime<Utc>>,
    /// When the enrollment last changed
    #[serde(
        with = "serde_utc_lenient",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated_date_time_utc: Option<DateTime<Utc>>,
    /// Weak ETag of the record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Capabilities to grant the device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<DeviceCapabilities>,
}

impl IndividualEnrollment {
    /// Create an enrollment with the required fields.
    pub fn new(
        registration_id: &str,
        attestation: AttestationMechanism,
    ) -> Result<IndividualEnrollment> {
        validation::validate_id(registration_id)?;
        attestation.validate()?;
        Ok(IndividualEnrollment {
            registration_id: registration_id.to_string(),
            device_id: None,
            registration_state: None,
            attestation,
            iot_hub_host_name: None,
            initial_twin: None,
            provisioning_status: None,
            created_date_time_utc: None,
            last_updated_date_time_utc: None,
            etag: None,
            capabilities: None,
        })
    }

    /// Parse a service record, requiring `registrationId` and a valid
    /// `attestation`.
    pub fn from_json(json: &str) -> Result<IndividualEnrollment> {
        if json.is_empty() {
            return Err(DtoError::MissingField("json"));
        }
        let enrollment: IndividualEnrollment = serde_json::from_str(json)?;
        if enrollment.registration_id.is_empty() {
            return Err(DtoError::MissingField("registrationId"));
        }
        validation::validate_id(&enrollment.registration_id)?;
        if let Some(device_id) = &enrollment.device_id {
            validation::validate_id(device_id)?;
        }
        enrollment.attestation.validate()?;
        Ok(enrollment)
    }

    /// Serialize for submission. The registration state is omitted.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(DtoError::from)
    }
}

/// An enrollment group record. Groups attest by X.509 signing certificate
/// or symmetric key; TPM attestation is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentGroup {
    /// Group identifier, required
    pub enrollment_group_id: String,
    /// Attestation mechanism, required
    pub attestation: AttestationMechanism,
    /// Hub to provision into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iot_hub_host_name: Option<String>,
    /// Twin applied to provisioned devices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_twin: Option<TwinState>,
    /// Whether the group is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_status: Option<ProvisioningStatus>,
    /// When the group was created
    #[serde(
        with = "serde_utc_lenient",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_date_time_utc: Option<DateTime<Utc>>,
    /// When the group last changed
    #[serde(
        with = "serde_utc_lenient",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated_date_time_utc: Option<DateTime<Utc>>,
    /// Weak ETag of the record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Capabilities to grant provisioned devices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<DeviceCapabilities>,
}

impl EnrollmentGroup {
    /// Create a group with the required fields.
    pub fn new(
        enrollment_group_id: &str,
        attestation: AttestationMechanism,
    ) -> Result<EnrollmentGroup> {
        validation::validate_id(enrollment_group_id)?;
        EnrollmentGroup::validate_attestation(&attestation)?;
        Ok(EnrollmentGroup {
            enrollment_group_id: enrollment_group_id.to_string(),
            attestation,
            iot_hub_host_name: None,
            initial_twin: None,
            provisioning_status: None,
            created_date_time_utc: None,
            last_updated_date_time_utc: None,
            etag: None,
            capabilities: None,
        })
    }

    /// Parse a service record, requiring `enrollmentGroupId` and a group
    /// compatible `attestation`.
    pub fn from_json(json: &str) -> Result<EnrollmentGroup> {
        if json.is_empty() {
            return Err(DtoError::MissingField("json"));
        }
        let group: EnrollmentGroup = serde_json::from_str(json)?;
        if group.enrollment_group_id.is_empty() {
            return Err(DtoError::MissingField("enrollmentGroupId"));
        }
        validation::validate_id(&group.enrollment_group_id)?;
        EnrollmentGroup::validate_attestation(&group.attestation)?;
        Ok(group)
    }

    /// Serialize for submission.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(DtoError::from)
    }

    fn validate_attestation(attestation: &AttestationMechanism) -> Result<()> {
        if let AttestationMechanism::Tpm { .. } = attestation {
            return Err(DtoError::InvalidCombination(
                "enrollment groups cannot use tpm attestation".to_string(),
            ));
        }
        attestation.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn symmetric_attestation() -> AttestationMechanism {
        AttestationMechanism::SymmetricKey {
            symmetric_key: SymmetricKeyAttestation {
                primary_key: "cHJpbWFyeQ==".to_string(),
                secondary_key: "c2Vjb25kYXJ5".to_string(),
            },
        }
    }

    const ENROLLMENT_JSON: &str = r#"{
        "registrationId": "reg-001",
        "deviceId": "device-001",
        "registrationState": {
            "registrationId": "reg-001",
            "status": "assigned",
            "assignedHub": "hub.azure-devices.net",
            "createdDateTimeUtc": "2017-11-14T12:25:55.123Z",
            "lastUpdatedDateTimeUtc": "2017-11-14T12:26:05.000Z"
        },
        "attestation": {
            "type": "tpm",
            "tpm": {"endorsementKey": "dGVzdC1lbmRvcnNlbWVudA=="}
        },
        "iotHubHostName": "hub.azure-devices.net",
        "provisioningStatus": "enabled",
        "createdDateTimeUtc": "2017-11-14T12:25:55.123Z",
        "lastUpdatedDateTimeUtc": "2017-11-14T12:26:05.000Z",
        "etag": "00000000-0000-0000-0000-00000000000"
    }"#;

    #[test]
    fn parses_individual_enrollment() {
        let enrollment = IndividualEnrollment::from_json(ENROLLMENT_JSON).unwrap();
        assert_eq!(enrollment.registration_id, "reg-001");
        assert_eq!(
            enrollment.provisioning_status,
            Some(ProvisioningStatus::Enabled)
        );
        match &enrollment.attestation {
            AttestationMechanism::Tpm { tpm } => {
                assert_eq!(tpm.endorsement_key, "dGVzdC1lbmRvcnNlbWVudA==")
            }
            other => panic!("unexpected attestation {:?}", other),
        }
        let state = enrollment.registration_state.as_ref().unwrap();
        assert_eq!(state.status.as_deref(), Some("assigned"));
        assert!(state.created_date_time_utc.is_some());
    }

    #[test]
    fn registration_state_is_not_serialized() {
        let enrollment = IndividualEnrollment::from_json(ENROLLMENT_JSON).unwrap();
        let value: Value = serde_json::from_str(&enrollment.to_json().unwrap()).unwrap();
        assert!(value.get("registrationState").is_none());
        assert_eq!(value["registrationId"], json!("reg-001"));
        assert_eq!(value["attestation"]["type"], json!("tpm"));
    }

    #[test]
    fn missing_registration_id_fails() {
        let json = r#"{"attestation": {"type": "symmetricKey", "symmetricKey": {"primaryKey": "YQ==", "secondaryKey": "Yg=="}}}"#;
        assert!(IndividualEnrollment::from_json(json).is_err());
    }

    #[test]
    fn parsed_identifiers_are_charset_checked() {
        let mut value: Value = serde_json::from_str(ENROLLMENT_JSON).unwrap();
        value["registrationId"] = json!("bad id with spaces");
        assert!(IndividualEnrollment::from_json(&value.to_string()).is_err());

        let mut value: Value = serde_json::from_str(ENROLLMENT_JSON).unwrap();
        value["deviceId"] = json!("no/slash");
        assert!(IndividualEnrollment::from_json(&value.to_string()).is_err());

        let group = EnrollmentGroup::new("group-1", symmetric_attestation()).unwrap();
        let mut value: Value = serde_json::from_str(&group.to_json().unwrap()).unwrap();
        value["enrollmentGroupId"] = json!("bad group id");
        assert!(EnrollmentGroup::from_json(&value.to_string()).is_err());
    }

    #[test]
    fn lenient_dates_do_not_fail_the_record() {
        let mut value: Value = serde_json::from_str(ENROLLMENT_JSON).unwrap();
        value["createdDateTimeUtc"] = json!("not a date");
        let enrollment = IndividualEnrollment::from_json(&value.to_string()).unwrap();
        assert!(enrollment.created_date_time_utc.is_none());
        assert!(enrollment.last_updated_date_time_utc.is_some());
    }

    #[test]
    fn x509_requires_exactly_one_certificate_set() {
        assert!(X509Attestation::default().validate().is_err());

        let single = X509Attestation::with_client_certificate("pem", None).unwrap();
        assert!(single.validate().is_ok());

        let mut double = X509Attestation::with_client_certificate("pem", None).unwrap();
        double.ca_references = Some(X509CaReferences {
            primary: "ca".to_string(),
            secondary: None,
        });
        assert!(double.validate().is_err());
    }

    #[test]
    fn attestation_round_trips_tagged_form() {
        let attestation = AttestationMechanism::SymmetricKey {
            symmetric_key: SymmetricKeyAttestation {
                primary_key: "cA==".to_string(),
                secondary_key: "cw==".to_string(),
            },
        };
        let value = serde_json::to_value(&attestation).unwrap();
        assert_eq!(value["type"], json!("symmetricKey"));
        assert_eq!(value["symmetricKey"]["primaryKey"], json!("cA=="));
        let back: AttestationMechanism = serde_json::from_value(value).unwrap();
        assert_eq!(back, attestation);
    }

    #[test]
    fn group_rejects_tpm_attestation() {
        let tpm = AttestationMechanism::Tpm {
            tpm: TpmAttestation::new("a2V5").unwrap(),
        };
        assert!(EnrollmentGroup::new("group-1", tpm).is_err());
        assert!(EnrollmentGroup::new("group-1", symmetric_attestation()).is_ok());
    }

    #[test]
    fn group_round_trips() {
        let group = EnrollmentGroup::new("group-1", symmetric_attestation()).unwrap();
        let again = EnrollmentGroup::from_json(&group.to_json().unwrap()).unwrap();
        assert_eq!(again.enrollment_group_id, "group-1");
        assert_eq!(again.attestation, group.attestation);
    }
}
