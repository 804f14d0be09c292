//! Registry import/export jobs and scheduled device jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dates::{self, serde_utc_opt};
use crate::error::{DtoError, Result};
use crate::method::DirectMethod;
use crate::twin::TwinState;

/// Properties of a registry import or export job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProperties {
    /// Job identifier
    pub job_id: String,
    /// When the job started
    #[serde(
        with = "serde_utc_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time_utc: Option<DateTime<Utc>>,
    /// When the job finished
    #[serde(
        with = "serde_utc_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time_utc: Option<DateTime<Utc>>,
    /// `export` or `import`
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    /// Current job status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Completion percentage
    #[serde(default)]
    pub progress: i32,
    /// SAS URI of the container to import from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_blob_container_uri: Option<String>,
    /// SAS URI of the container to export into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_blob_container_uri: Option<String>,
    /// Whether authentication keys are excluded from export output
    #[serde(default)]
    pub exclude_keys_in_export: bool,
    /// Why the job failed, when it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl JobProperties {
    /// Parse job properties, requiring a non-empty `jobId`.
    pub fn from_json(json: &str) -> Result<JobProperties> {
        if json.is_empty() {
            return Err(DtoError::MissingField("json"));
        }
        let properties: JobProperties = serde_json::from_str(json)
            .map_err(|e| match e.to_string().contains("jobId") {
                true => DtoError::MissingField("jobId"),
                false => DtoError::from(e),
            })?;
        if properties.job_id.is_empty() {
            return Err(DtoError::MissingField("jobId"));
        }
        Ok(properties)
    }

    /// Serialize back to job JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(DtoError::from)
    }

    /// Change the job identifier. An empty identifier is rejected.
    pub fn set_job_id(&mut self, job_id: &str) -> Result<()> {
        if job_id.is_empty() {
            return Err(DtoError::MissingField("jobId"));
        }
        self.job_id = job_id.to_string();
        Ok(())
    }
}

/// Per-device completion counts of a scheduled job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatistics {
    /// Devices the job targeted
    #[serde(default)]
    pub device_count: i32,
    /// Devices where the job failed
    #[serde(default)]
    pub failed_count: i32,
    /// Devices where the job succeeded
    #[serde(default)]
    pub succeeded_count: i32,
    /// Devices still running the job
    #[serde(default)]
    pub running_count: i32,
    /// Devices still waiting for the job
    #[serde(default)]
    pub pending_count: i32,
}

// Scheduled job responses arrive with two naming schemes depending on the
// endpoint: direct responses use createdTime/startTime/endTime and `type`,
// query responses use createdDateTimeUtc/startTimeUtc/endTimeUtc and
// `jobType`. Both names for the same field in one message is an error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduledJobWire {
    job_id: Option<String>,
    query_condition: Option<String>,
    created_time: Option<String>,
    created_date_time_utc: Option<String>,
    start_time: Option<String>,
    start_time_utc: Option<String>,
    end_time: Option<String>,
    end_time_utc: Option<String>,
    last_updated_date_time_utc: Option<String>,
    max_execution_time_in_seconds: Option<i64>,
    #[serde(rename = "type")]
    job_type: Option<String>,
    #[serde(rename = "jobType")]
    query_job_type: Option<String>,
    status: Option<String>,
    cloud_to_device_method: Option<DirectMethod>,
    outcome: Option<Value>,
    update_twin: Option<TwinState>,
    failure_reason: Option<String>,
    status_message: Option<String>,
    device_job_statistics: Option<JobStatistics>,
    device_id: Option<String>,
    parent_job_id: Option<String>,
    error: Option<Value>,
}

/// A scheduled job as reported by the service, either from the job API or
/// from a job query.
#[derive(Debug, Clone)]
pub struct ScheduledJobResponse {
    /// Job identifier
    pub job_id: String,
    /// Device query the job ran against
    pub query_condition: Option<String>,
    /// When the job was created
    pub created_time: Option<DateTime<Utc>>,
    /// When the job started
    pub start_time: Option<DateTime<Utc>>,
    /// When the job stopped processing
    pub end_time: Option<DateTime<Utc>>,
    /// When the job record last changed
    pub last_updated_time: Option<DateTime<Utc>>,
    /// Time-to-live for the job in seconds
    pub max_execution_time_in_seconds: Option<i64>,
    /// `scheduleDeviceMethod` or `scheduleUpdateTwin`
    pub job_type: String,
    /// Current job status
    pub status: String,
    /// The method invocation, for method jobs
    pub cloud_to_device_method: Option<DirectMethod>,
    /// Per-device outcome, for query responses
    pub outcome: Option<Value>,
    /// The twin patch, for twin update jobs
    pub update_twin: Option<TwinState>,
    /// Why the job failed, when it did
    pub failure_reason: Option<String>,
    /// Free-form status message
    pub status_message: Option<String>,
    /// Per-device completion counts
    pub device_job_statistics: Option<JobStatistics>,
    /// Target device, absent on parent orchestrations
    pub device_id: Option<String>,
    /// Parent orchestration, if any
    pub parent_job_id: Option<String>,
    /// Error detail reported by the service
    pub error: Option<Value>,
}

impl ScheduledJobResponse {
    /// Parse a scheduled job response.
    ///
    /// `jobId`, a job type and `status` are required. A message naming the
    /// same field under both the direct and the query spelling is rejected.
    /// Unparseable timestamps are logged and dropped rather than failing
    /// the whole response.
    pub fn from_json(json: &str) -> Result<ScheduledJobResponse> {
        if json.is_empty() {
            return Err(DtoError::MissingField("json"));
        }
        let wire: ScheduledJobWire = serde_json::from_str(json)?;

        let job_id = match wire.job_id {
            Some(ref id) if !id.is_empty() => id.clone(),
            _ => return Err(DtoError::MissingField("jobId")),
        };
        let job_type = match (wire.job_type, wire.query_job_type) {
            (Some(_), Some(_)) => {
                return Err(DtoError::InvalidCombination(
                    "json contains both type and jobType".to_string(),
                ))
            }
            (Some(t), None) | (None, Some(t)) if !t.is_empty() => t,
            _ => return Err(DtoError::MissingField("type")),
        };
        let status = match wire.status {
            Some(ref status) if !status.is_empty() => status.clone(),
            _ => return Err(DtoError::MissingField("status")),
        };

        let created_time = merge_time(wire.created_time, wire.created_date_time_utc, "createdTime")?;
        let start_time = merge_time(wire.start_time, wire.start_time_utc, "startTime")?;
        let end_time = merge_time(wire.end_time, wire.end_time_utc, "endTime")?;
        let last_updated_time = wire
            .last_updated_date_time_utc
            .as_deref()
            .and_then(lenient_parse);

        Ok(ScheduledJobResponse {
            job_id,
            query_condition: wire.query_condition,
            created_time,
            start_time,
            end_time,
            last_updated_time,
            max_execution_time_in_seconds: wire.max_execution_time_in_seconds,
            job_type,
            status,
            cloud_to_device_method: wire.cloud_to_device_method,
            outcome: wire.outcome,
            update_twin: wire.update_twin,
            failure_reason: wire.failure_reason,
            status_message: wire.status_message,
            device_job_statistics: wire.device_job_statistics,
            device_id: wire.device_id,
            parent_job_id: wire.parent_job_id,
            error: wire.error,
        })
    }

    /// For method jobs the `outcome` wraps the device answer under
    /// `deviceMethodResponse`; parse it out when present.
    pub fn method_response(&self) -> Result<Option<DirectMethod>> {
        let response = self
            .outcome
            .as_ref()
            .and_then(|outcome| outcome.get("deviceMethodResponse"));
        match response {
            Some(value) => DirectMethod::from_json(&value.to_string()).map(Some),
            None => Ok(None),
        }
    }
}

fn merge_time(
    direct: Option<String>,
    query: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match (direct, query) {
        (Some(_), Some(_)) => Err(DtoError::InvalidCombination(format!(
            "both {} spellings cannot be sent at the same time",
            field
        ))),
        (Some(s), None) | (None, Some(s)) => Ok(lenient_parse(&s)),
        (None, None) => Ok(None),
    }
}

fn lenient_parse(s: &str) -> Option<DateTime<Utc>> {
    match dates::parse_utc(s) {
        Ok(dt) => Some(dt),
        Err(_) => {
            warn!("discarding unparseable job timestamp {:?}", s);
            None
        }
    }
}
