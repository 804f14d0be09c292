//! Registry and twin query messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DtoError, Result};
use crate::validation;

/// What a query response page contains, from the `x-ms-item-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryResultType {
    /// Unrecognized item type
    Unknown,
    /// Twin documents
    Twin,
    /// Per-device job rows
    DeviceJob,
    /// Scheduled job responses
    JobResponse,
    /// Untyped rows, e.g. aggregations
    Raw,
    /// Individual enrollments
    Enrollment,
    /// Enrollment groups
    EnrollmentGroup,
    /// Provisioning registration states
    DeviceRegistration,
}

impl QueryResultType {
    /// Map the `x-ms-item-type` header value. Unrecognized values fold to
    /// [`QueryResultType::Unknown`].
    pub fn from_header(value: &str) -> QueryResultType {
        match value {
            "twin" => QueryResultType::Twin,
            "deviceJob" => QueryResultType::DeviceJob,
            "jobResponse" => QueryResultType::JobResponse,
            "raw" => QueryResultType::Raw,
            "enrollment" => QueryResultType::Enrollment,
            "enrollmentGroup" => QueryResultType::EnrollmentGroup,
            "deviceRegistration" => QueryResultType::DeviceRegistration,
            _ => QueryResultType::Unknown,
        }
    }
}

/// The body of a query request. The page size and continuation token
/// travel as headers, not in the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// The SQL-like query text
    pub query: String,
    /// Requested page size, sent as `x-ms-max-item-count`
    #[serde(skip)]
    pub page_size: Option<u32>,
}

impl QueryRequest {
    /// Build a request. The query must be ASCII and contain both a
    /// `select` and a `from` clause; a page size of zero is rejected.
    pub fn new(query: &str, page_size: Option<u32>) -> Result<QueryRequest> {
        validation::validate_query(query)?;
        if page_size == Some(0) {
            return Err(DtoError::InvalidCombination(
                "page size cannot be zero".to_string(),
            ));
        }
        Ok(QueryRequest {
            query: query.to_string(),
            page_size,
        })
    }

    /// Serialize to the request body.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(DtoError::from)
    }
}

/// One page of query results together with its framing headers.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    items: Vec<Value>,
    result_type: QueryResultType,
    continuation_token: Option<String>,
}

impl QueryResponse {
    /// Parse a response page. The body must be a JSON array.
    pub fn from_json(
        json: &str,
        result_type: QueryResultType,
        continuation_token: Option<String>,
    ) -> Result<QueryResponse> {
        if json.is_empty() {
            return Err(DtoError::MissingField("json"));
        }
        let value: Value = serde_json::from_str(json)?;
        let items = match value {
            Value::Array(items) => items,
            _ => {
                return Err(DtoError::InvalidCombination(
                    "query response body is not a json array".to_string(),
                ))
            }
        };
        Ok(QueryResponse {
            items,
            result_type,
            continuation_token,
        })
    }

    /// The rows of this page.
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    /// What kind of rows this page carries.
    pub fn result_type(&self) -> QueryResultType {
        self.result_type
    }

    /// Token for the next page, if the query has more results.
    pub fn continuation_token(&self) -> Option<&str> {
        self.continuation_token.as_deref()
    }

    /// Deserialize every row into `T`.
    pub fn parse_items<T>(&self) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        self.items
            .iter()
            .map(|item| serde_json::from_value(item.clone()).map_err(DtoError::from))
            .collect()
    }
}
