// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription push protocol frames.
//!
//! JSON frames of the `graphql-ws` (subscriptions-transport-ws) protocol:
//!
//! ```json
//! // client -> server
//! {"type": "connection_init"}
//! {"id": "1", "type": "start", "payload": {"query": "subscription { .. }"}}
//! {"id": "1", "type": "stop"}
//!
//! // server -> client
//! {"type": "connection_ack"}
//! {"type": "data", "id": "1", "payload": {"data": {"bookAdded": {..}}}}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// WebSocket subprotocol name.
pub const SUBPROTOCOL: &str = "graphql-ws";

/// Client -> Server frames
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Open the protocol session
    ConnectionInit,

    /// Start a subscription
    Start { id: String, payload: StartPayload },

    /// Stop a subscription
    Stop { id: String },

    /// Close the protocol session
    ConnectionTerminate,
}

/// Payload of a start frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartPayload {
    pub query: String,
}

impl ClientFrame {
    /// Create a start frame for `query`.
    pub fn start(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self::Start {
            id: id.into(),
            payload: StartPayload {
                query: query.into(),
            },
        }
    }

    /// Encode as JSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Server frame type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    ConnectionAck,
    ConnectionError,
    KeepAlive,
    Data,
    Error,
    Complete,
    Other(String),
}

impl From<&str> for FrameKind {
    fn from(kind: &str) -> Self {
        match kind {
            "connection_ack" => Self::ConnectionAck,
            "connection_error" => Self::ConnectionError,
            "ka" => Self::KeepAlive,
            "data" => Self::Data,
            "error" => Self::Error,
            "complete" => Self::Complete,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Server -> Client frame
#[derive(Debug, Clone, Deserialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl ServerFrame {
    /// Decode a frame from JSON text.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Frame type.
    pub fn kind(&self) -> FrameKind {
        FrameKind::from(self.kind.as_str())
    }

    /// Decode `payload.data.<entity>` of a data frame.
    ///
    /// Returns `Ok(None)` when the frame carries no such entity (or a null).
    pub fn entity<T: DeserializeOwned>(&self, entity: &str) -> Result<Option<T>, serde_json::Error> {
        let value = self
            .payload
            .as_ref()
            .and_then(|p| p.get("data"))
            .and_then(|d| d.get(entity));
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(value).map(Some),
        }
    }

    /// Error payload as text, for logging.
    pub fn error_text(&self) -> String {
        self.payload
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialize_connection_init() {
        let json = ClientFrame::ConnectionInit.to_json().unwrap();
        assert_eq!(json, r#"{"type":"connection_init"}"#);
    }

    #[test]
    fn serialize_start() {
        let frame = ClientFrame::start("1", "subscription { bookAdded { id } }");
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "1",
                "type": "start",
                "payload": {"query": "subscription { bookAdded { id } }"}
            })
        );
    }

    #[test]
    fn serialize_stop() {
        let value: Value =
            serde_json::from_str(&ClientFrame::Stop { id: "1".into() }.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"id": "1", "type": "stop"}));
    }

    #[test]
    fn parse_data_frame() {
        let frame = ServerFrame::parse(
            r#"{"type":"data","id":"1","payload":{"data":{"bookAdded":{"id":"7","title":"Dune"}}}}"#,
        )
        .unwrap();
        assert_eq!(frame.kind(), FrameKind::Data);
        assert_eq!(frame.id.as_deref(), Some("1"));

        let entity: Value = frame.entity("bookAdded").unwrap().unwrap();
        assert_eq!(entity["title"], "Dune");
        assert!(frame.entity::<Value>("bookRemoved").unwrap().is_none());
    }

    #[test]
    fn parse_control_frames() {
        let ack = ServerFrame::parse(r#"{"type":"connection_ack"}"#).unwrap();
        assert_eq!(ack.kind(), FrameKind::ConnectionAck);
        assert!(ack.payload.is_none());

        let ka = ServerFrame::parse(r#"{"type":"ka"}"#).unwrap();
        assert_eq!(ka.kind(), FrameKind::KeepAlive);

        let other = ServerFrame::parse(r#"{"type":"next"}"#).unwrap();
        assert_eq!(other.kind(), FrameKind::Other("next".into()));
    }

    #[test]
    fn parse_malformed_frame() {
        assert!(ServerFrame::parse("not json").is_err());
        assert!(ServerFrame::parse(r#"{"payload":{}}"#).is_err());
    }

    #[test]
    fn entity_type_mismatch_is_error() {
        #[derive(Debug, Deserialize)]
        struct Strict {
            #[allow(dead_code)]
            id: u32,
        }
        let frame =
            ServerFrame::parse(r#"{"type":"data","payload":{"data":{"bookAdded":{"id":"x"}}}}"#)
                .unwrap();
        assert!(frame.entity::<Strict>("bookAdded").is_err());
    }
}
