#![forbid(unsafe_code)]

//! JSON messages from the client.
//!
//! Every message is an object with a `type` tag naming the server method the
//! client invokes:
//!
//! ```json
//! {"type": "setParentRequestedRange", "start": 0, "length": 50, "parentKey": "7"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message tags the server understands.
pub const KNOWN_TYPES: [&str; 5] = [
    "setRequestedRange",
    "setParentRequestedRange",
    "updateExpandedState",
    "confirmUpdate",
    "confirmParentUpdate",
];

/// A client-to-server call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientRequest {
    /// The flat window the client wants.
    SetRequestedRange { start: usize, length: usize },
    /// The window the client wants under one parent.
    #[serde(rename_all = "camelCase")]
    SetParentRequestedRange {
        start: usize,
        length: usize,
        parent_key: String,
    },
    /// The user toggled an item.
    UpdateExpandedState { key: String, expanded: bool },
    /// The client applied a root batch.
    ConfirmUpdate { id: u64 },
    /// The client applied a parent batch.
    #[serde(rename_all = "camelCase")]
    ConfirmParentUpdate { id: u64, parent_key: String },
}

impl ClientRequest {
    /// Parse one message.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing \"type\" tag".into()))?;
        if !KNOWN_TYPES.contains(&tag) {
            return Err(ProtocolError::UnknownType(tag.to_owned()));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// The message tag.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SetRequestedRange { .. } => "setRequestedRange",
            Self::SetParentRequestedRange { .. } => "setParentRequestedRange",
            Self::UpdateExpandedState { .. } => "updateExpandedState",
            Self::ConfirmUpdate { .. } => "confirmUpdate",
            Self::ConfirmParentUpdate { .. } => "confirmParentUpdate",
        }
    }
}

/// Errors from decoding client messages or encoding responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not valid JSON, or fields of the wrong shape.
    Malformed(String),
    /// A `type` tag the server does not handle.
    UnknownType(String),
    /// The response could not be serialized.
    Encode(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "malformed client message: {reason}"),
            Self::UnknownType(tag) => write!(f, "unknown client message type: {tag}"),
            Self::Encode(reason) => write!(f, "failed to encode client calls: {reason}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_every_message_type() {
        let cases = [
            (
                r#"{"type":"setRequestedRange","start":10,"length":40}"#,
                ClientRequest::SetRequestedRange {
                    start: 10,
                    length: 40,
                },
            ),
            (
                r#"{"type":"setParentRequestedRange","start":0,"length":50,"parentKey":"3"}"#,
                ClientRequest::SetParentRequestedRange {
                    start: 0,
                    length: 50,
                    parent_key: "3".into(),
                },
            ),
            (
                r#"{"type":"updateExpandedState","key":"3","expanded":true}"#,
                ClientRequest::UpdateExpandedState {
                    key: "3".into(),
                    expanded: true,
                },
            ),
            (
                r#"{"type":"confirmUpdate","id":7}"#,
                ClientRequest::ConfirmUpdate { id: 7 },
            ),
            (
                r#"{"type":"confirmParentUpdate","id":8,"parentKey":"3"}"#,
                ClientRequest::ConfirmParentUpdate {
                    id: 8,
                    parent_key: "3".into(),
                },
            ),
        ];
        for (text, expected) in cases {
            let parsed = ClientRequest::parse(text);
            assert_eq!(parsed.as_ref().map(ClientRequest::type_name), Ok(expected.type_name()));
            assert_eq!(parsed, Ok(expected));
        }
    }

    #[test]
    fn serializes_with_camel_case_tags() {
        let request = ClientRequest::ConfirmParentUpdate {
            id: 2,
            parent_key: "k".into(),
        };
        let text = serde_json::to_string(&request).unwrap();
        assert_eq!(text, r#"{"type":"confirmParentUpdate","id":2,"parentKey":"k"}"#);
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert_eq!(
            ClientRequest::parse(r#"{"type":"selectAll"}"#),
            Err(ProtocolError::UnknownType("selectAll".into()))
        );
        assert!(matches!(
            ClientRequest::parse("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            ClientRequest::parse(r#"{"start":1}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            ClientRequest::parse(r#"{"type":"confirmUpdate","id":"x"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn error_display() {
        assert_eq!(
            ProtocolError::UnknownType("x".into()).to_string(),
            "unknown client message type: x"
        );
    }
}
