// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message broker abstraction.
//!
//! The RPC bridge only needs a handful of broker operations: open a
//! connection, open a channel on it, declare queues, publish through the
//! default exchange, and consume a queue. These are captured by the
//! [`Connector`], [`BrokerConnection`] and [`BrokerChannel`] traits so the
//! bridge runs unchanged against a real AMQP broker ([`AmqpConnector`]) or
//! the in-process [`MemoryBroker`].
//!
//! ```text
//! Connector ──connect()──> BrokerConnection ──open_channel()──> BrokerChannel
//!                                                             ├── declare_queue()
//!                                                             ├── publish()
//!                                                             └── consume() -> DeliveryStream
//! ```

pub mod amqp;
pub mod memory;

pub use amqp::AmqpConnector;
pub use memory::MemoryBroker;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Broker-level errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("resource locked: {0}")]
    ResourceLocked(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("connection or channel closed")]
    Closed,
}

/// Queue declaration flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueOptions {
    /// Survives a broker restart.
    pub durable: bool,
    /// Owned by the declaring connection; no other connection may use it.
    pub exclusive: bool,
    /// Deleted once its last consumer goes away.
    pub auto_delete: bool,
}

impl QueueOptions {
    /// Shared service queue: durable, non-exclusive, kept when idle.
    pub const fn service() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// Private reply queue: transient, exclusive, auto-deleted.
    pub const fn reply() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// A message as published to or delivered from a queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrokerMessage {
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub body: Vec<u8>,
}

impl BrokerMessage {
    /// JSON message with the given body.
    pub fn json(body: Vec<u8>) -> Self {
        Self {
            content_type: Some("application/json".to_string()),
            body,
            ..Default::default()
        }
    }

    /// Set the correlation id.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the reply-to queue.
    pub fn reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }
}

/// Stream of deliveries from a consumed queue (auto-acknowledged).
pub type DeliveryStream = BoxStream<'static, Result<BrokerMessage, BrokerError>>;

/// Opens broker connections.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: BrokerConnection;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, BrokerError>;
}

/// An open broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    type Channel: BrokerChannel;

    /// Open a channel on this connection.
    async fn open_channel(&self) -> Result<Self::Channel, BrokerError>;

    /// Close the connection. Exclusive queues it owns are deleted.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// An open channel.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a queue and return its name.
    ///
    /// An empty `name` asks the broker to generate a unique one.
    async fn declare_queue(&self, name: &str, options: QueueOptions)
        -> Result<String, BrokerError>;

    /// Publish through the default exchange, routed by queue name.
    async fn publish(&self, queue: &str, message: BrokerMessage) -> Result<(), BrokerError>;

    /// Start an exclusive, auto-acknowledging consumer on `queue`.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError>;

    /// Close the channel, cancelling its consumers.
    async fn close(&self) -> Result<(), BrokerError>;
}
