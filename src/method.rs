//! Direct method invocations and their responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DtoError, Result};
use crate::validation;

/// Which side of a direct method exchange a [`DirectMethod`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodOperation {
    /// An invocation request with a method name
    Invoke,
    /// A response with a status code
    Response,
    /// A bare payload without request or response framing
    Payload,
    /// Nothing parsed yet
    None,
}

/// A direct method message.
///
/// The same wire shape serves both directions: requests carry `methodName`
/// and the timeouts, responses carry `status`. The two are mutually
/// exclusive in a single message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMethod {
    /// Name of the method to invoke
    #[serde(rename = "methodName", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Maximum time in seconds to wait for the device response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_timeout_in_seconds: Option<i64>,
    /// Maximum time in seconds to wait for the device connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_in_seconds: Option<i64>,
    /// Response status code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    /// Method payload, any JSON value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip)]
    operation: MethodOperationState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MethodOperationState(MethodOperation);

impl Default for MethodOperationState {
    fn default() -> Self {
        MethodOperationState(MethodOperation::None)
    }
}

impl DirectMethod {
    /// Build an invocation request. The method name follows the same rules
    /// as twin keys and the timeouts must not be negative.
    pub fn new_request(
        name: &str,
        response_timeout_in_seconds: Option<i64>,
        connect_timeout_in_seconds: Option<i64>,
        payload: Option<Value>,
    ) -> Result<DirectMethod> {
        validation::validate_key(name, false)?;
        for timeout in [response_timeout_in_seconds, connect_timeout_in_seconds].iter() {
            if let Some(timeout) = timeout {
                if *timeout < 0 {
                    return Err(DtoError::InvalidCombination(format!(
                        "timeout cannot be negative: {}",
                        timeout
                    )));
                }
            }
        }
        Ok(DirectMethod {
            name: Some(name.to_string()),
            response_timeout_in_seconds,
            connect_timeout_in_seconds,
            status: None,
            payload,
            operation: MethodOperationState(MethodOperation::Invoke),
        })
    }

    /// Build a bare payload message.
    pub fn new_payload(payload: Value) -> DirectMethod {
        DirectMethod {
            name: None,
            response_timeout_in_seconds: None,
            connect_timeout_in_seconds: None,
            status: None,
            payload: Some(payload),
            operation: MethodOperationState(MethodOperation::Payload),
        }
    }

    /// Parse a direct method message, classifying it by shape: a
    /// `methodName` key marks a request, a `status` key marks a response,
    /// anything else is treated as a bare payload. A message carrying both
    /// keys is rejected.
    pub fn from_json(json: &str) -> Result<DirectMethod> {
        if json.is_empty() {
            return Err(DtoError::MissingField("json"));
        }
        let value: Value = serde_json::from_str(json)?;
        let keyed = value.as_object();
        let has_name = keyed.map_or(false, |o| o.contains_key("methodName"));
        let has_status = keyed.map_or(false, |o| o.contains_key("status"));

        if has_name && has_status {
            return Err(DtoError::InvalidCombination(
                "method name and status reported in the same json".to_string(),
            ));
        }

        if has_name || has_status {
            let mut method: DirectMethod = serde_json::from_value(value)?;
            if has_name && method.name.as_ref().map_or(true, |n| n.is_empty()) {
                return Err(DtoError::MissingField("methodName"));
            }
            method.operation = MethodOperationState(if has_name {
                MethodOperation::Invoke
            } else {
                MethodOperation::Response
            });
            Ok(method)
        } else {
            Ok(DirectMethod::new_payload(value))
        }
    }

    /// Which side of the exchange this message is.
    pub fn operation(&self) -> MethodOperation {
        self.operation.0
    }

    /// The response status code. Only responses carry one.
    pub fn status(&self) -> Result<Option<i32>> {
        if self.operation.0 != MethodOperation::Response {
            return Err(DtoError::InvalidCombination(
                "status is only available on a method response".to_string(),
            ));
        }
        Ok(self.status)
    }

    /// Serialize as an invocation request.
    pub fn to_request_json(&self) -> Result<String> {
        if self.name.is_none() {
            return Err(DtoError::MissingField("methodName"));
        }
        let request = DirectMethod {
            status: None,
            ..self.clone()
        };
        serde_json::to_string(&request).map_err(DtoError::from)
    }

    /// Serialize as a response: status and payload only.
    pub fn to_response_json(&self) -> Result<String> {
        let response = DirectMethod {
            name: None,
            response_timeout_in_seconds: None,
            connect_timeout_in_seconds: None,
            ..self.clone()
        };
        serde_json::to_string(&response).map_err(DtoError::from)
    }

    /// The payload alone, serialized.
    pub fn payload_json(&self) -> Result<String> {
        match &self.payload {
            Some(payload) => serde_json::to_string(payload).map_err(DtoError::from),
            None => Ok("null".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_request() {
        let method = DirectMethod::new_request(
            "reboot",
            Some(30),
            Some(5),
            Some(json!({"delay": 10})),
        )
        .unwrap();
        assert_eq!(method.operation(), MethodOperation::Invoke);
        let value: Value = serde_json::from_str(&method.to_request_json().unwrap()).unwrap();
        assert_eq!(value["methodName"], json!("reboot"));
        assert_eq!(value["responseTimeoutInSeconds"], json!(30));
        assert_eq!(value["connectTimeoutInSeconds"], json!(5));
        assert_eq!(value["payload"]["delay"], json!(10));
        assert!(value.get("status").is_none());
    }

    #[test]
    fn rejects_bad_method_names() {
        assert!(DirectMethod::new_request("", None, None, None).is_err());
        assert!(DirectMethod::new_request("has space", None, None, None).is_err());
        assert!(DirectMethod::new_request("dotted.name", None, None, None).is_err());
        assert!(DirectMethod::new_request("$system", None, None, None).is_err());
    }

    #[test]
    fn rejects_negative_timeouts() {
        assert!(DirectMethod::new_request("m", Some(-1), None, None).is_err());
        assert!(DirectMethod::new_request("m", None, Some(-1), None).is_err());
        assert!(DirectMethod::new_request("m", Some(0), Some(0), None).is_ok());
    }

    #[test]
    fn parses_request_shape() {
        let method =
            DirectMethod::from_json(r#"{"methodName": "reboot", "payload": {"x": 1}}"#).unwrap();
        assert_eq!(method.operation(), MethodOperation::Invoke);
        assert_eq!(method.name.as_deref(), Some("reboot"));
        assert!(method.status().is_err());
    }

    #[test]
    fn parses_response_shape() {
        let method = DirectMethod::from_json(r#"{"status": 200, "payload": "done"}"#).unwrap();
        assert_eq!(method.operation(), MethodOperation::Response);
        assert_eq!(method.status().unwrap(), Some(200));
        let value: Value = serde_json::from_str(&method.to_response_json().unwrap()).unwrap();
        assert_eq!(value["status"], json!(200));
        assert!(value.get("methodName").is_none());
    }

    #[test]
    fn parses_bare_payload() {
        let method = DirectMethod::from_json(r#"{"input": [1, 2, 3]}"#).unwrap();
        assert_eq!(method.operation(), MethodOperation::Payload);
        assert_eq!(method.payload_json().unwrap(), r#"{"input":[1,2,3]}"#);
    }

    #[test]
    fn name_and_status_together_fail() {
        let err = DirectMethod::from_json(r#"{"methodName": "m", "status": 200}"#);
        assert!(err.is_err());
    }
}
