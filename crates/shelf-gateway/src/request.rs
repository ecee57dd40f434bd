// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outgoing requests and their wire envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// GraphQL variables.
pub type Variables = Map<String, Value>;

/// An operation to forward: query text (HTTP) or resolver label (queue).
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    operation: String,
    variables: Variables,
}

impl OutgoingRequest {
    /// Create a request without variables.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            variables: Variables::new(),
        }
    }

    /// Create a request with variables.
    pub fn with_variables(operation: impl Into<String>, variables: Variables) -> Self {
        Self {
            operation: operation.into(),
            variables,
        }
    }

    /// Query text or resolver label.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Request variables.
    pub fn variables(&self) -> &Variables {
        &self.variables
    }
}

/// Body published to a service queue.
#[derive(Debug, Serialize)]
pub struct RpcEnvelope<'a> {
    pub variables: &'a Variables,
    #[serde(rename = "requestedResolver")]
    pub requested_resolver: &'a str,
}

/// Body POSTed to an HTTP service.
#[derive(Debug, Serialize)]
pub struct GraphQlBody<'a> {
    pub query: &'a str,
    pub variables: &'a Variables,
}

/// Error envelope returned by GraphQL services on failure.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub errors: Vec<RemoteError>,
}

/// One entry of an [`ErrorEnvelope`].
#[derive(Debug, Deserialize)]
pub struct RemoteError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub extensions: Option<RemoteErrorExtensions>,
}

#[derive(Debug, Deserialize)]
pub struct RemoteErrorExtensions {
    #[serde(default)]
    pub code: Option<String>,
}

impl RemoteError {
    /// Error code from the extensions, if any.
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref().and_then(|e| e.code.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_rpc_envelope_wire_format() {
        let variables = vars(json!({"id": "42"}));
        let envelope = RpcEnvelope {
            variables: &variables,
            requested_resolver: "patron",
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({"variables": {"id": "42"}, "requestedResolver": "patron"})
        );
    }

    #[test]
    fn test_graphql_body_wire_format() {
        let variables = Variables::new();
        let body = GraphQlBody {
            query: "{ books { id } }",
            variables: &variables,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value, json!({"query": "{ books { id } }", "variables": {}}));
    }

    #[test]
    fn test_error_envelope_parse() {
        let body =
            r#"{"errors":[{"message":"bad input","extensions":{"code":"BAD_REQUEST"}}]}"#;
        let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.errors.len(), 1);
        assert_eq!(envelope.errors[0].message, "bad input");
        assert_eq!(envelope.errors[0].code(), Some("BAD_REQUEST"));
    }

    #[test]
    fn test_error_envelope_without_extensions() {
        let envelope: ErrorEnvelope =
            serde_json::from_str(r#"{"errors":[{"message":"boom"}]}"#).unwrap();
        assert_eq!(envelope.errors[0].code(), None);

        let empty: ErrorEnvelope = serde_json::from_str(r#"{"data":null}"#).unwrap();
        assert!(empty.errors.is_empty());
    }

    #[test]
    fn test_outgoing_request_accessors() {
        let request = OutgoingRequest::with_variables("getPatron", vars(json!({"id": 7})));
        assert_eq!(request.operation(), "getPatron");
        assert_eq!(request.variables()["id"], 7);
        assert!(OutgoingRequest::new("q").variables().is_empty());
    }
}
