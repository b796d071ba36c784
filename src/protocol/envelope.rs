use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CorrelationId, Result, RpcError};

/// Untyped key/value payload carried in `message_data`.
pub type MessageData = Map<String, Value>;

/// Key in a reply's `message_data` that marks a handler-level failure.
pub const ERROR_KEY: &str = "error";

/// Request envelope.
///
/// ```json
/// { "id": "...", "message_type": "...", "message_data": {}, "reply_to": "..." }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation identifier, fresh per call.
    pub id: CorrelationId,

    /// Tag selecting the handler on the receiving side.
    pub message_type: String,

    /// Request payload.
    #[serde(default)]
    pub message_data: MessageData,

    /// Queue the reply must be published to.
    ///
    /// Peers that omit it decode to an empty string; the dispatcher drops
    /// such requests since there is nowhere to answer.
    #[serde(default)]
    pub reply_to: String,
}

/// Response envelope.
///
/// ```json
/// { "id": "...", "message_type": "...", "message_data": {} }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Copied verbatim from the request.
    pub id: CorrelationId,

    /// Copied from the request; diagnostics only.
    pub message_type: String,

    /// Result payload, or an `error` key with a failure message.
    #[serde(default)]
    pub message_data: MessageData,
}

impl RequestEnvelope {
    /// Build a request with a freshly generated correlation ID.
    pub fn new(
        message_type: impl Into<String>,
        message_data: MessageData,
        reply_to: impl Into<String>,
    ) -> Self {
        // ---
        Self {
            id: CorrelationId::generate(),
            message_type: message_type.into(),
            message_data,
            reply_to: reply_to.into(),
        }
    }

    /// Build a successful reply to this request.
    pub fn reply_with(&self, message_data: MessageData) -> ResponseEnvelope {
        ResponseEnvelope::success(self.id.clone(), self.message_type.clone(), message_data)
    }

    /// Build an error reply to this request.
    pub fn reply_error(&self, message: impl Into<String>) -> ResponseEnvelope {
        ResponseEnvelope::failure(self.id.clone(), self.message_type.clone(), message)
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse wire bytes. Malformed input is [`RpcError::Decode`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| RpcError::Decode(format!("request envelope: {e}")))
    }
}

impl ResponseEnvelope {
    /// Successful reply carrying `message_data`.
    pub fn success(
        id: CorrelationId,
        message_type: impl Into<String>,
        message_data: MessageData,
    ) -> Self {
        Self {
            id,
            message_type: message_type.into(),
            message_data,
        }
    }

    /// Error reply; `message_data` holds only the `error` key.
    pub fn failure(
        id: CorrelationId,
        message_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        // ---
        let mut message_data = MessageData::new();
        message_data.insert(ERROR_KEY.to_string(), Value::String(message.into()));

        Self {
            id,
            message_type: message_type.into(),
            message_data,
        }
    }

    /// The handler failure message, if the reply carries a non-empty `error`.
    pub fn error_message(&self) -> Option<&str> {
        match self.message_data.get(ERROR_KEY) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Consume the reply: `Ok(message_data)` or [`RpcError::Remote`].
    pub fn into_result(self) -> Result<MessageData> {
        match self.error_message() {
            Some(msg) => Err(RpcError::Remote(msg.to_string())),
            None => Ok(self.message_data),
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse wire bytes. Malformed input is [`RpcError::Decode`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| RpcError::Decode(format!("response envelope: {e}")))
    }
}

/// Encode a typed value as a `message_data` object.
///
/// Unit-like values (`null`) become an empty object. Any other non-object
/// encoding is rejected.
pub fn to_message_data<T: Serialize>(value: &T) -> Result<MessageData> {
    // ---
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(MessageData::new()),
        other => Err(RpcError::Serialization(<serde_json::Error as serde::ser::Error>::custom(
            format!("message_data must be a JSON object, got {}", json_kind(&other)),
        ))),
    }
}

/// Decode a `message_data` object into a typed value.
pub fn from_message_data<T: DeserializeOwned>(data: MessageData) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(data))?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> MessageData {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_request_wire_shape() {
        // ---
        let req = RequestEnvelope {
            id: CorrelationId::from("c-1"),
            message_type: "check_job_exists".into(),
            message_data: data(json!({"job_id": "J1"})),
            reply_to: "sso.reply".into(),
        };

        let value: Value = serde_json::from_slice(&req.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "c-1",
                "message_type": "check_job_exists",
                "message_data": {"job_id": "J1"},
                "reply_to": "sso.reply",
            })
        );
    }

    #[test]
    fn test_response_wire_shape_has_no_reply_to() {
        // ---
        let resp = ResponseEnvelope::success("c-1".into(), "ping", MessageData::new());
        let value: Value = serde_json::from_slice(&resp.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"id": "c-1", "message_type": "ping", "message_data": {}})
        );
    }

    #[test]
    fn test_malformed_is_decode_error() {
        // ---
        let cases: [&[u8]; 4] = [
            b"not json",
            br#"{"message_type":"x"}"#,
            br#"{"id":"1","message_type":"x","message_data":[1,2]}"#,
            b"[]",
        ];
        for raw in cases {
            let err = RequestEnvelope::decode(raw).unwrap_err();
            assert!(matches!(err, RpcError::Decode(_)), "{raw:?} -> {err:?}");
        }
        assert!(matches!(
            ResponseEnvelope::decode(b"{").unwrap_err(),
            RpcError::Decode(_)
        ));
    }

    #[test]
    fn test_missing_reply_to_decodes_empty() {
        // ---
        let req =
            RequestEnvelope::decode(br#"{"id":"1","message_type":"x","message_data":{}}"#).unwrap();
        assert!(req.reply_to.is_empty());
    }

    #[test]
    fn test_reply_copies_id_and_type() {
        // ---
        let req = RequestEnvelope::new("check_job_exists", MessageData::new(), "sso.reply");
        let resp = req.reply_with(data(json!({"exists": true})));
        assert_eq!(resp.id, req.id);
        assert_eq!(resp.message_type, "check_job_exists");

        let err = req.reply_error("job level not found");
        assert_eq!(err.id, req.id);
        assert_eq!(err.error_message(), Some("job level not found"));
    }

    #[test]
    fn test_error_message_rules() {
        // ---
        let id = CorrelationId::from("1");
        let empty = ResponseEnvelope::success(id.clone(), "t", data(json!({"error": ""})));
        assert_eq!(empty.error_message(), None);
        assert!(empty.into_result().is_ok());

        let failed = ResponseEnvelope::success(id, "t", data(json!({"error": "boom"})));
        match failed.into_result() {
            Err(RpcError::Remote(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_typed_payload_boundary() {
        // ---
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct CheckJob {
            job_id: String,
        }

        #[derive(Serialize)]
        struct Unit;

        let map = to_message_data(&CheckJob { job_id: "J1".into() }).unwrap();
        assert_eq!(map.get("job_id"), Some(&json!("J1")));

        let back: CheckJob = from_message_data(map).unwrap();
        assert_eq!(back.job_id, "J1");

        assert!(to_message_data(&Unit).unwrap().is_empty());
        assert!(to_message_data(&42).is_err());
    }
}
