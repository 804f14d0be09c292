//! File upload handshake messages and the completion notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dates;
use crate::error::{DtoError, Result};
use crate::validation;

/// The request a device sends to obtain a blob storage SAS URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadRequest {
    /// Name of the blob the device wants to upload
    pub blob_name: String,
}

impl FileUploadRequest {
    /// Build a request, validating the blob name.
    pub fn new(blob_name: &str) -> Result<FileUploadRequest> {
        validation::validate_blob_name(blob_name)?;
        Ok(FileUploadRequest {
            blob_name: blob_name.to_string(),
        })
    }

    /// Serialize to the request body.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(DtoError::from)
    }
}

/// The service answer to a [`FileUploadRequest`]. Every field is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadResponse {
    /// Opaque id to present when completing the upload
    pub correlation_id: String,
    /// Storage account host
    pub host_name: String,
    /// Target container
    pub container_name: String,
    /// Target blob name
    pub blob_name: String,
    /// SAS token granting write access
    pub sas_token: String,
}

impl FileUploadResponse {
    /// Parse the service response, rejecting any missing or empty field.
    pub fn from_json(json: &str) -> Result<FileUploadResponse> {
        if json.is_empty() {
            return Err(DtoError::MissingField("json"));
        }
        let response: FileUploadResponse = serde_json::from_str(json)?;
        for &(value, what) in [
            (&response.correlation_id, "correlationId"),
            (&response.host_name, "hostName"),
            (&response.container_name, "containerName"),
            (&response.blob_name, "blobName"),
            (&response.sas_token, "sasToken"),
        ]
        .iter()
        {
            if value.is_empty() {
                return Err(DtoError::MissingField(what));
            }
            validation::validate_string_ascii(value, what)?;
        }
        validation::validate_blob_name(&response.blob_name)?;
        Ok(response)
    }

    /// The full `https` URI of the blob this response grants access to.
    pub fn blob_uri(&self) -> String {
        format!(
            "https://{}/{}/{}{}",
            self.host_name, self.container_name, self.blob_name, self.sas_token
        )
    }
}

// Wire shape of the notification; dates arrive as strings in two different
// formats and are validated during parse.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileUploadNotificationWire {
    device_id: String,
    blob_uri: String,
    blob_name: String,
    last_updated_time: String,
    enqueued_time_utc: String,
    blob_size_in_bytes: i64,
}

/// The service notification that a device finished uploading a blob.
///
/// Every field is required and validated; a notification with a malformed
/// field is rejected as a whole.
#[derive(Debug, Clone)]
pub struct FileUploadNotification {
    /// Device that performed the upload
    pub device_id: String,
    /// Full URI of the uploaded blob
    pub blob_uri: String,
    /// Name of the uploaded blob
    pub blob_name: String,
    /// When the blob last changed, normalized to UTC
    pub last_updated_time: DateTime<Utc>,
    /// When the notification was enqueued
    pub enqueued_time_utc: DateTime<Utc>,
    /// Size of the uploaded blob
    pub blob_size_in_bytes: i64,
}

impl FileUploadNotification {
    /// Parse a notification body.
    pub fn from_json(json: &str) -> Result<FileUploadNotification> {
        if json.is_empty() {
            return Err(DtoError::MissingField("json"));
        }
        let wire: FileUploadNotificationWire = serde_json::from_str(json)?;

        for &(value, what) in [
            (&wire.device_id, "deviceId"),
            (&wire.blob_uri, "blobUri"),
        ]
        .iter()
        {
            if value.is_empty() {
                return Err(DtoError::MissingField(what));
            }
            validation::validate_string_ascii(value, what)?;
        }
        validation::validate_blob_name(&wire.blob_name)?;

        Ok(FileUploadNotification {
            device_id: wire.device_id,
            blob_uri: wire.blob_uri,
            blob_name: wire.blob_name,
            last_updated_time: dates::parse_offset(&wire.last_updated_time)?,
            enqueued_time_utc: dates::parse_utc(&wire.enqueued_time_utc)?,
            blob_size_in_bytes: wire.blob_size_in_bytes,
        })
    }
}
