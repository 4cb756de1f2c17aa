use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::CallError;

/// Exception type the server attaches to application-level failures.
pub const SERVICE_EXCEPTION: &str = "io.kvision.remote.ServiceException";

/// JSON-RPC request envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub url: String,
    pub params: Vec<Option<String>>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, url: impl Into<String>, params: Vec<Option<String>>) -> Self {
        Self {
            id,
            url: url.into(),
            params,
        }
    }
}

/// JSON-RPC reply body, once the id has been checked.
///
/// `null` counts as absent for both fields. When both are present the error
/// wins.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RpcReply {
    Failure {
        #[serde(deserialize_with = "non_null")]
        error: Value,
        #[serde(rename = "exceptionType", default)]
        exception_type: Option<Value>,
    },
    Success {
        #[serde(deserialize_with = "non_null")]
        result: Value,
    },
}

fn non_null<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Err(serde::de::Error::custom("field is null"));
    }
    Ok(value)
}

impl RpcReply {
    /// Settle the reply into the call's outcome
    pub fn into_result(self) -> Result<Value, CallError> {
        match self {
            Self::Success { result } => Ok(result),
            Self::Failure {
                error,
                exception_type,
            } => {
                let message = match error {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                let is_service = matches!(
                    exception_type,
                    Some(Value::String(ref t)) if t == SERVICE_EXCEPTION
                );
                if is_service {
                    Err(CallError::Service(message))
                } else {
                    Err(CallError::Generic(message))
                }
            }
        }
    }
}

/// Numeric ids compare by value, so an echoed `1.0` matches `1`.
fn id_matches(id: Option<&Value>, expected: u64) -> bool {
    let Some(id) = id else {
        return false;
    };
    match id.as_u64() {
        Some(n) => n == expected,
        None => id.as_f64() == Some(expected as f64),
    }
}

/// Decode a JSON-RPC response body for the request with `expected_id`.
pub fn decode_response(body: &[u8], expected_id: u64) -> Result<Value, CallError> {
    let envelope: Value = serde_json::from_slice(body)
        .map_err(|e| CallError::Protocol(format!("Malformed response body: {}", e)))?;

    // Non-objects have no id and fail here
    if !id_matches(envelope.get("id"), expected_id) {
        return Err(CallError::Protocol("Invalid response ID".to_string()));
    }

    let reply = RpcReply::deserialize(envelope)
        .map_err(|_| CallError::Protocol("Invalid response".to_string()))?;

    reply.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serializes_id_url_params() {
        let request = JsonRpcRequest::new(
            7,
            "/api/users",
            vec![Some("alice".to_string()), None],
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({ "id": 7, "url": "/api/users", "params": ["alice", null] })
        );
    }

    #[test]
    fn test_decode_success() {
        let body = br#"{"id":1,"result":["ok"]}"#;
        assert_eq!(decode_response(body, 1).unwrap(), json!(["ok"]));
    }

    #[test]
    fn test_id_mismatch_beats_result() {
        let body = br#"{"id":2,"result":"ok"}"#;
        assert_eq!(
            decode_response(body, 1),
            Err(CallError::Protocol("Invalid response ID".to_string()))
        );
    }

    #[test]
    fn test_missing_id_is_mismatch() {
        let body = br#"{"result":"ok"}"#;
        assert_eq!(
            decode_response(body, 1),
            Err(CallError::Protocol("Invalid response ID".to_string()))
        );
    }

    #[test]
    fn test_non_object_body_is_id_mismatch() {
        for body in [&b"null"[..], &b"[1]"[..], &br#""x""#[..], &b"1"[..]] {
            assert_eq!(
                decode_response(body, 1),
                Err(CallError::Protocol("Invalid response ID".to_string()))
            );
        }
    }

    #[test]
    fn test_float_id_matches() {
        let body = br#"{"id":1.0,"result":"ok"}"#;
        assert_eq!(decode_response(body, 1).unwrap(), json!("ok"));

        let body = br#"{"id":1.5,"result":"ok"}"#;
        assert_eq!(
            decode_response(body, 1),
            Err(CallError::Protocol("Invalid response ID".to_string()))
        );

        let body = br#"{"id":"1","result":"ok"}"#;
        assert_eq!(
            decode_response(body, 1),
            Err(CallError::Protocol("Invalid response ID".to_string()))
        );
    }

    #[test]
    fn test_service_exception() {
        let body = br#"{"id":1,"error":"not found","exceptionType":"io.kvision.remote.ServiceException"}"#;
        assert_eq!(
            decode_response(body, 1),
            Err(CallError::Service("not found".to_string()))
        );
    }

    #[test]
    fn test_other_exception_is_generic() {
        let body = br#"{"id":1,"error":"boom","exceptionType":"java.lang.IllegalStateException"}"#;
        assert_eq!(
            decode_response(body, 1),
            Err(CallError::Generic("boom".to_string()))
        );

        let body = br#"{"id":1,"error":"boom"}"#;
        assert_eq!(
            decode_response(body, 1),
            Err(CallError::Generic("boom".to_string()))
        );
    }

    #[test]
    fn test_error_wins_over_result() {
        let body = br#"{"id":1,"error":"bad","result":"ok"}"#;
        assert_eq!(
            decode_response(body, 1),
            Err(CallError::Generic("bad".to_string()))
        );
    }

    #[test]
    fn test_null_fields_are_absent() {
        let body = br#"{"id":1,"error":null,"result":"ok"}"#;
        assert_eq!(decode_response(body, 1).unwrap(), json!("ok"));

        let body = br#"{"id":1,"error":null,"result":null}"#;
        assert_eq!(
            decode_response(body, 1),
            Err(CallError::Protocol("Invalid response".to_string()))
        );
    }

    #[test]
    fn test_neither_field_present() {
        let body = br#"{"id":1}"#;
        assert_eq!(
            decode_response(body, 1),
            Err(CallError::Protocol("Invalid response".to_string()))
        );
    }

    #[test]
    fn test_structured_error_rendered_as_json() {
        let body = br#"{"id":1,"error":{"code":3}}"#;
        assert_eq!(
            decode_response(body, 1),
            Err(CallError::Generic(r#"{"code":3}"#.to_string()))
        );
    }

    #[test]
    fn test_non_json_body() {
        let err = decode_response(b"<html>", 1).unwrap_err();
        assert!(matches!(err, CallError::Protocol(ref m) if m.starts_with("Malformed response body")));
    }
}
