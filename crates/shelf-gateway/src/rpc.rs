// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/reply over a message queue.
//!
//! [`RpcBridge::call`] turns a queue-based service into a synchronous call:
//!
//! 1. open a connection and a channel (released on every exit path),
//! 2. declare the service queue (durable, shared),
//! 3. declare a private reply queue (exclusive, auto-delete, broker-named),
//! 4. publish `{"variables": .., "requestedResolver": ..}` with a fresh
//!    correlation id and reply-to set to the reply queue,
//! 5. consume the reply queue and wait for the delivery carrying the
//!    correlation id, ignoring any other, until the timeout elapses.
//!
//! Nothing is retried here; every failure names the step that failed.

use crate::broker::{
    BrokerChannel, BrokerConnection, BrokerMessage, Connector, DeliveryStream, QueueOptions,
};
use crate::correlation::{CorrelationTracker, Dispatch};
use crate::error::ForwardError;
use crate::request::{RpcEnvelope, Variables};
use crate::stats::{CallStats, CallStatsSnapshot};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default wait for a reply.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Synchronous calls over a queue-based transport.
pub struct RpcBridge<C: Connector> {
    connector: C,
    timeout: Duration,
    stats: Arc<CallStats>,
}

impl<C: Connector> RpcBridge<C> {
    /// Create a bridge with the default timeout.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            timeout: DEFAULT_RPC_TIMEOUT,
            stats: Arc::new(CallStats::new()),
        }
    }

    /// Set the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reply timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Underlying connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Get call statistics.
    pub fn stats(&self) -> CallStatsSnapshot {
        self.stats.snapshot()
    }

    /// Call `resolver` on the service behind `queue`.
    ///
    /// Returns the raw reply body, or [`ForwardError::Timeout`] if no reply
    /// carrying this call's correlation id arrives in time.
    pub async fn call(
        &self,
        queue: &str,
        variables: &Variables,
        resolver: &str,
    ) -> Result<Bytes, ForwardError> {
        self.track(self.run(queue, variables, resolver, None)).await
    }

    /// Like [`call`](Self::call), but also gives up with
    /// [`ForwardError::Cancelled`] when `cancel` fires.
    pub async fn call_until_cancelled(
        &self,
        cancel: &CancellationToken,
        queue: &str,
        variables: &Variables,
        resolver: &str,
    ) -> Result<Bytes, ForwardError> {
        self.track(self.run(queue, variables, resolver, Some(cancel)))
            .await
    }

    async fn track(
        &self,
        call: impl std::future::Future<Output = Result<Bytes, ForwardError>>,
    ) -> Result<Bytes, ForwardError> {
        self.stats.record_call();
        let result = call.await;
        match &result {
            Ok(_) => self.stats.record_reply(),
            Err(err) if err.is_timeout() => self.stats.record_timeout(),
            Err(_) => self.stats.record_failure(),
        }
        result
    }

    async fn run(
        &self,
        queue: &str,
        variables: &Variables,
        resolver: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Bytes, ForwardError> {
        let connection = self
            .connector
            .connect()
            .await
            .map_err(ForwardError::Connect)?;

        let result = match connection.open_channel().await {
            Ok(channel) => {
                let result = self
                    .exchange(&channel, queue, variables, resolver, cancel)
                    .await;
                if let Err(err) = channel.close().await {
                    debug!("Failed to close channel for {}: {}", queue, err);
                }
                result
            }
            Err(err) => Err(ForwardError::OpenChannel(err)),
        };

        if let Err(err) = connection.close().await {
            debug!("Failed to close connection for {}: {}", queue, err);
        }
        result
    }

    async fn exchange<Ch: BrokerChannel>(
        &self,
        channel: &Ch,
        queue: &str,
        variables: &Variables,
        resolver: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Bytes, ForwardError> {
        channel
            .declare_queue(queue, QueueOptions::service())
            .await
            .map_err(|source| ForwardError::DeclareQueue {
                queue: queue.to_string(),
                source,
            })?;

        let reply_queue = channel
            .declare_queue("", QueueOptions::reply())
            .await
            .map_err(ForwardError::DeclareReplyQueue)?;

        let mut tracker = CorrelationTracker::new();

        let body = serde_json::to_vec(&RpcEnvelope {
            variables,
            requested_resolver: resolver,
        })
        .map_err(ForwardError::Encode)?;

        let request = BrokerMessage::json(body)
            .correlation_id(tracker.id().as_str())
            .reply_to(reply_queue.as_str());
        channel
            .publish(queue, request)
            .await
            .map_err(ForwardError::Publish)?;

        let mut replies = channel
            .consume(&reply_queue)
            .await
            .map_err(ForwardError::Consume)?;

        debug!(
            "Published {} to {} (correlation {}, reply-to {})",
            resolver,
            queue,
            tracker.id(),
            reply_queue
        );

        let result = self
            .await_reply(&mut replies, &mut tracker, queue, &reply_queue, cancel)
            .await;
        self.stats.record_discarded(tracker.discarded());
        result
    }

    async fn await_reply(
        &self,
        replies: &mut DeliveryStream,
        tracker: &mut CorrelationTracker,
        queue: &str,
        reply_queue: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Bytes, ForwardError> {
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(cancelled);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        "No reply from {} within {:?} (correlation {})",
                        queue,
                        self.timeout,
                        tracker.id()
                    );
                    return Err(ForwardError::Timeout {
                        queue: queue.to_string(),
                        after: self.timeout,
                    });
                }
                _ = &mut cancelled => {
                    debug!("Call to {} cancelled (correlation {})", queue, tracker.id());
                    return Err(ForwardError::Cancelled);
                }
                delivery = replies.next() => match delivery {
                    Some(Ok(message)) => match tracker.dispatch(message) {
                        Dispatch::Matched(body) => return Ok(Bytes::from(body)),
                        Dispatch::Mismatched { correlation_id } => {
                            debug!(
                                "Ignoring reply on {} for correlation {:?} (want {})",
                                reply_queue,
                                correlation_id,
                                tracker.id()
                            );
                        }
                        Dispatch::Duplicate => {
                            debug!("Ignoring duplicate reply on {}", reply_queue);
                        }
                    },
                    Some(Err(err)) => return Err(ForwardError::Consume(err)),
                    None => {
                        return Err(ForwardError::ReplyStreamClosed {
                            queue: reply_queue.to_string(),
                        });
                    }
                },
            }
        }
    }
}
