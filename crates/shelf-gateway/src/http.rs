// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP forwarding to GraphQL services.

use crate::error::ForwardError;
use crate::request::{ErrorEnvelope, GraphQlBody, Variables};
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default per-request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const APPLICATION_JSON: &str = "application/json";

/// POSTs GraphQL operations to services and passes their responses through.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpForwarder {
    /// Create a forwarder whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ForwardError::HttpClient)?;
        Ok(Self { client, timeout })
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forward `query` to `service_url`.
    ///
    /// A success status returns the body untouched. Otherwise the first
    /// entry of a GraphQL error envelope becomes [`ForwardError::Remote`];
    /// if the body carries no such entry the status and raw body are
    /// returned as [`ForwardError::Status`]. Dropping the future aborts the
    /// request.
    pub async fn forward(
        &self,
        query: &str,
        variables: &Variables,
        service_url: &str,
    ) -> Result<Bytes, ForwardError> {
        let body = serde_json::to_vec(&GraphQlBody { query, variables })
            .map_err(ForwardError::Encode)?;

        let response = self
            .client
            .post(service_url)
            .header(CONTENT_TYPE, APPLICATION_JSON)
            .header(ACCEPT, APPLICATION_JSON)
            .body(body)
            .send()
            .await
            .map_err(ForwardError::Send)?;

        let status = response.status();
        let body = response.bytes().await.map_err(ForwardError::ReadBody)?;
        debug!(
            "POST {} -> {} ({} bytes)",
            service_url,
            status.as_u16(),
            body.len()
        );

        if status.is_success() {
            return Ok(body);
        }
        Err(translate_error(status.as_u16(), &body))
    }

    /// Like [`forward`](Self::forward), but aborts with
    /// [`ForwardError::Cancelled`] as soon as `cancel` fires.
    pub async fn forward_until_cancelled(
        &self,
        cancel: &CancellationToken,
        query: &str,
        variables: &Variables,
        service_url: &str,
    ) -> Result<Bytes, ForwardError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ForwardError::Cancelled),
            result = self.forward(query, variables, service_url) => result,
        }
    }
}

/// Build the error for a non-success response.
fn translate_error(status: u16, body: &[u8]) -> ForwardError {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) {
        if let Some(first) = envelope.errors.into_iter().next() {
            let code = first.code().map(str::to_string);
            return ForwardError::Remote {
                message: first.message,
                code,
            };
        }
    }
    ForwardError::Status {
        status,
        body: String::from_utf8_lossy(body).into_owned(),
    }
}
