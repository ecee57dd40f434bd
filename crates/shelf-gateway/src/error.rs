// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway call errors.
//!
//! Every failure of a forwarded call is returned synchronously to the caller
//! as a [`ForwardError`]. Each variant names the step that failed so the
//! caller can log or surface it; [`ForwardError::kind`] collapses the
//! variants into the coarse [`ErrorKind`] classes callers usually branch on.

use crate::broker::BrokerError;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`ForwardError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Broker, HTTP or WebSocket endpoint unreachable.
    ConnectionFailure,
    /// Queue declaration rejected by the broker.
    ResourceDeclarationFailure,
    /// Request body could not be encoded.
    EncodingFailure,
    /// Message could not be published.
    PublishFailure,
    /// Reply consumer could not be started.
    ConsumeSetupFailure,
    /// No matching reply arrived before the deadline.
    Timeout,
    /// Caller cancelled the call.
    Cancelled,
    /// Downstream returned a well-formed error envelope.
    RemoteError,
    /// Downstream returned a non-success status with an unparsable body.
    TransportStatusError,
    /// Inbound frame could not be decoded.
    DecodeFailure,
    /// Stream ended before the operation completed.
    StreamClosed,
    /// No backend configured under that name.
    UnknownService,
}

/// Errors returned by the forwarding paths.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] BrokerError),

    #[error("failed to open channel: {0}")]
    OpenChannel(#[source] BrokerError),

    #[error("failed to declare queue ({queue}): {source}")]
    DeclareQueue {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to declare reply queue: {0}")]
    DeclareReplyQueue(#[source] BrokerError),

    #[error("failed to marshal request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to publish message: {0}")]
    Publish(#[source] BrokerError),

    #[error("failed to consume reply: {0}")]
    Consume(#[source] BrokerError),

    #[error("reply consumer on {queue} closed before a reply arrived")]
    ReplyStreamClosed { queue: String },

    #[error("timeout waiting for reply from service on {queue} after {after:?}")]
    Timeout { queue: String, after: Duration },

    #[error("request cancelled")]
    Cancelled,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to send request: {0}")]
    Send(#[source] reqwest::Error),

    #[error("failed to read response body: {0}")]
    ReadBody(#[source] reqwest::Error),

    #[error("{}", remote_message(.message, .code.as_deref()))]
    Remote {
        message: String,
        code: Option<String>,
    },

    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("websocket error: {0}")]
    WebSocket(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("subscription handshake failed: {0}")]
    Handshake(String),

    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("no subscription configured")]
    NoSubscription,
}

fn remote_message(message: &str, code: Option<&str>) -> String {
    match code {
        Some(code) if !code.is_empty() => format!("{} (code: {})", message, code),
        _ => message.to_string(),
    }
}

impl ForwardError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect(_)
            | Self::OpenChannel(_)
            | Self::HttpClient(_)
            | Self::Send(_)
            | Self::ReadBody(_)
            | Self::WebSocket(_)
            | Self::Handshake(_) => ErrorKind::ConnectionFailure,
            Self::DeclareQueue { .. } | Self::DeclareReplyQueue(_) => {
                ErrorKind::ResourceDeclarationFailure
            }
            Self::Encode(_) => ErrorKind::EncodingFailure,
            Self::Publish(_) => ErrorKind::PublishFailure,
            Self::Consume(_) => ErrorKind::ConsumeSetupFailure,
            Self::ReplyStreamClosed { .. } => ErrorKind::StreamClosed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Remote { .. } => ErrorKind::RemoteError,
            Self::Status { .. } => ErrorKind::TransportStatusError,
            Self::Decode(_) => ErrorKind::DecodeFailure,
            Self::UnknownService(_) | Self::NoSubscription => ErrorKind::UnknownService,
        }
    }

    /// True if the call gave up waiting for a reply.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}
