// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway front.
//!
//! The Gateway maps service names to backends and dispatches each request to
//! the HTTP forwarder or the RPC bridge.

use crate::broker::Connector;
use crate::config::{ConfigError, GatewayConfig, ServiceConfig};
use crate::error::ForwardError;
use crate::http::HttpForwarder;
use crate::model::Book;
use crate::request::OutgoingRequest;
use crate::rpc::RpcBridge;
use crate::stats::CallStatsSnapshot;
use crate::subscription::{RelayHandle, SubscriptionRelay};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Gateway construction errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport setup failed: {0}")]
    Transport(#[from] ForwardError),
}

/// GraphQL forwarding gateway.
pub struct Gateway<C: Connector> {
    config: GatewayConfig,
    http: HttpForwarder,
    rpc: RpcBridge<C>,
    relay: Option<SubscriptionRelay>,
    start_time: Instant,
}

impl<C: Connector> Gateway<C> {
    /// Create a gateway from configuration, reaching queue services through
    /// `connector`.
    pub fn new(config: GatewayConfig, connector: C) -> Result<Self, GatewayError> {
        config.validate()?;

        let http = HttpForwarder::new(config.http_timeout())?;
        let rpc = RpcBridge::new(connector).with_timeout(config.rpc_timeout());
        let relay = config.subscription.as_ref().map(|sub| {
            SubscriptionRelay::new(&sub.url, &sub.query, &sub.entity)
                .with_handshake_timeout(sub.handshake_timeout())
        });

        info!(
            "Gateway {} ready: {} service(s), subscription {}",
            config.name,
            config.services.len(),
            if relay.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            config,
            http,
            rpc,
            relay,
            start_time: Instant::now(),
        })
    }

    /// Get the gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Configured services.
    pub fn services(&self) -> &[ServiceConfig] {
        &self.config.services
    }

    /// Get RPC call statistics.
    pub fn rpc_stats(&self) -> CallStatsSnapshot {
        self.rpc.stats()
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Forward `request` to the service named `service`.
    ///
    /// HTTP services receive the operation as query text, queue services as
    /// the resolver label. Either way the raw response body is returned.
    pub async fn forward(
        &self,
        service: &str,
        request: &OutgoingRequest,
    ) -> Result<Bytes, ForwardError> {
        match self.backend(service)? {
            ServiceConfig::Http { url, .. } => {
                debug!("Forwarding to {} over HTTP ({})", service, url);
                self.http
                    .forward(request.operation(), request.variables(), url)
                    .await
            }
            ServiceConfig::Queue { queue, .. } => {
                debug!("Forwarding to {} over queue {}", service, queue);
                self.rpc
                    .call(queue, request.variables(), request.operation())
                    .await
            }
        }
    }

    /// Like [`forward`](Self::forward), but aborts with
    /// [`ForwardError::Cancelled`] when `cancel` fires.
    pub async fn forward_until_cancelled(
        &self,
        cancel: &CancellationToken,
        service: &str,
        request: &OutgoingRequest,
    ) -> Result<Bytes, ForwardError> {
        match self.backend(service)? {
            ServiceConfig::Http { url, .. } => {
                self.http
                    .forward_until_cancelled(cancel, request.operation(), request.variables(), url)
                    .await
            }
            ServiceConfig::Queue { queue, .. } => {
                self.rpc
                    .call_until_cancelled(cancel, queue, request.variables(), request.operation())
                    .await
            }
        }
    }

    /// Channel sized for the configured subscription.
    pub fn subscription_channel<T>(&self) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
        let capacity = self
            .config
            .subscription
            .as_ref()
            .map_or(crate::subscription::DEFAULT_CHANNEL_CAPACITY, |s| {
                s.channel_capacity
            });
        mpsc::channel(capacity)
    }

    /// Start the configured subscription, relaying events into `out`.
    pub async fn subscribe<T>(&self, out: mpsc::Sender<T>) -> Result<RelayHandle, ForwardError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let relay = self.relay.as_ref().ok_or(ForwardError::NoSubscription)?;
        relay.subscribe(out).await
    }

    /// Start the configured subscription as a stream of books.
    pub async fn subscribe_book_added(
        &self,
        out: mpsc::Sender<Book>,
    ) -> Result<RelayHandle, ForwardError> {
        self.subscribe(out).await
    }

    fn backend(&self, service: &str) -> Result<&ServiceConfig, ForwardError> {
        self.config
            .service(service)
            .ok_or_else(|| ForwardError::UnknownService(service.to_string()))
    }
}
