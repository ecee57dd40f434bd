// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process broker.
//!
//! Implements the subset of AMQP queue semantics the gateway relies on:
//!
//! - broker-generated names for queues declared with an empty name,
//! - redeclaring with different flags fails with a precondition error,
//! - exclusive queues belong to the declaring connection and are deleted
//!   when it closes,
//! - auto-delete queues are deleted once their last consumer goes away,
//! - publishing routes by queue name through the default exchange; messages
//!   to unknown queues are dropped, messages to queues without a consumer
//!   are buffered until one attaches.
//!
//! Closing (or dropping) a channel cancels its consumers; closing (or
//! dropping) a connection closes its channels. Open connection and channel
//! counts are exposed so tests can check that calls release what they open.

use super::{
    BrokerChannel, BrokerConnection, BrokerError, BrokerMessage, Connector, DeliveryStream,
    QueueOptions,
};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type DeliverySender = UnboundedSender<Result<BrokerMessage, BrokerError>>;

struct ConsumerSlot {
    channel: u64,
    tx: DeliverySender,
}

struct QueueState {
    options: QueueOptions,
    /// Owning connection for exclusive queues.
    owner: Option<u64>,
    pending: VecDeque<BrokerMessage>,
    consumers: Vec<ConsumerSlot>,
    next_consumer: usize,
    had_consumer: bool,
}

impl QueueState {
    fn new(options: QueueOptions, owner: Option<u64>) -> Self {
        Self {
            options,
            owner,
            pending: VecDeque::new(),
            consumers: Vec::new(),
            next_consumer: 0,
            had_consumer: false,
        }
    }

    /// Hand the message to a live consumer (round-robin) or buffer it.
    fn deliver(&mut self, message: BrokerMessage) {
        let mut message = message;
        while !self.consumers.is_empty() {
            let idx = self.next_consumer % self.consumers.len();
            match self.consumers[idx].tx.unbounded_send(Ok(message)) {
                Ok(()) => {
                    self.next_consumer = idx + 1;
                    return;
                }
                Err(err) => {
                    // Receiver gone
                    self.consumers.remove(idx);
                    message = match err.into_inner() {
                        Ok(message) => message,
                        Err(_) => return,
                    };
                }
            }
        }
        self.pending.push_back(message);
    }
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    queues: HashMap<String, QueueState>,
    connections: HashSet<u64>,
    /// channel id -> connection id
    channels: HashMap<u64, u64>,
    unavailable: bool,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn close_channel(&mut self, channel: u64) {
        if self.channels.remove(&channel).is_none() {
            return;
        }
        for queue in self.queues.values_mut() {
            queue.consumers.retain(|slot| slot.channel != channel);
        }
        self.queues.retain(|name, queue| {
            let delete = queue.options.auto_delete && queue.had_consumer && queue.consumers.is_empty();
            if delete {
                debug!("Auto-deleting queue {}", name);
            }
            !delete
        });
    }

    fn close_connection(&mut self, connection: u64) {
        if !self.connections.remove(&connection) {
            return;
        }
        let owned: Vec<u64> = self
            .channels
            .iter()
            .filter(|(_, conn)| **conn == connection)
            .map(|(channel, _)| *channel)
            .collect();
        for channel in owned {
            self.close_channel(channel);
        }
        self.queues.retain(|name, queue| {
            let delete = queue.owner == Some(connection);
            if delete {
                debug!("Deleting exclusive queue {}", name);
            }
            !delete
        });
    }

    fn check_channel(&self, channel: u64) -> Result<u64, BrokerError> {
        self.channels.get(&channel).copied().ok_or(BrokerError::Closed)
    }
}

/// In-process broker shared by every connection cloned from it.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Refuse (or accept again) new connections.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Number of open connections.
    pub fn open_connections(&self) -> usize {
        self.lock().connections.len()
    }

    /// Number of open channels.
    pub fn open_channels(&self) -> usize {
        self.lock().channels.len()
    }

    /// Check whether a queue currently exists.
    pub fn queue_exists(&self, name: &str) -> bool {
        self.lock().queues.contains_key(name)
    }

    /// Names of all existing queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of messages waiting for a consumer on `name`.
    pub fn pending(&self, name: &str) -> usize {
        self.lock()
            .queues
            .get(name)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }

    /// Serve `queue` with `handler`, replying to each request's reply-to
    /// queue under the request's correlation id.
    ///
    /// Requests without reply-to are dropped; a `None` from the handler
    /// sends no reply.
    pub async fn spawn_responder<F>(
        &self,
        queue: &str,
        handler: F,
    ) -> Result<JoinHandle<()>, BrokerError>
    where
        F: Fn(&BrokerMessage) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        let connection = self.connect().await?;
        let channel = connection.open_channel().await?;
        channel.declare_queue(queue, QueueOptions::service()).await?;
        let mut requests = channel.consume(queue).await?;
        let queue = queue.to_string();

        Ok(tokio::spawn(async move {
            while let Some(request) = requests.next().await {
                let request = match request {
                    Ok(request) => request,
                    Err(err) => {
                        warn!("Responder on {} stopped: {}", queue, err);
                        break;
                    }
                };
                let Some(reply_to) = request.reply_to.clone() else {
                    debug!("Dropping request on {} without reply-to", queue);
                    continue;
                };
                let Some(body) = handler(&request) else {
                    continue;
                };
                let mut reply = BrokerMessage::json(body);
                reply.correlation_id = request.correlation_id.clone();
                if let Err(err) = channel.publish(&reply_to, reply).await {
                    warn!("Responder on {} failed to reply: {}", queue, err);
                }
            }
            let _ = channel.close().await;
            let _ = connection.close().await;
        }))
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, BrokerError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(BrokerError::Unavailable("memory broker refuses connections".into()));
        }
        let id = state.next_id();
        state.connections.insert(id);
        Ok(MemoryConnection {
            broker: self.clone(),
            id,
        })
    }
}

/// Connection to a [`MemoryBroker`].
pub struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    type Channel = MemoryChannel;

    async fn open_channel(&self) -> Result<MemoryChannel, BrokerError> {
        let mut state = self.broker.lock();
        if !state.connections.contains(&self.id) {
            return Err(BrokerError::Closed);
        }
        let id = state.next_id();
        state.channels.insert(id, self.id);
        Ok(MemoryChannel {
            broker: self.broker.clone(),
            id,
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker.lock().close_connection(self.id);
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.broker.lock().close_connection(self.id);
    }
}

/// Channel on a [`MemoryConnection`].
pub struct MemoryChannel {
    broker: MemoryBroker,
    id: u64,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<String, BrokerError> {
        let mut state = self.broker.lock();
        let connection = state.check_channel(self.id)?;

        let name = if name.is_empty() {
            format!("amq.gen-{}", uuid::Uuid::new_v4().simple())
        } else {
            name.to_string()
        };

        if let Some(existing) = state.queues.get(&name) {
            if existing.owner.is_some_and(|owner| owner != connection) {
                return Err(BrokerError::ResourceLocked(format!(
                    "queue '{}' is exclusive to another connection",
                    name
                )));
            }
            if existing.options != options {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arguments for queue '{}'",
                    name
                )));
            }
            return Ok(name);
        }

        let owner = options.exclusive.then_some(connection);
        state.queues.insert(name.clone(), QueueState::new(options, owner));
        debug!("Declared queue {} ({:?})", name, options);
        Ok(name)
    }

    async fn publish(&self, queue: &str, message: BrokerMessage) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.check_channel(self.id)?;
        match state.queues.get_mut(queue) {
            Some(target) => target.deliver(message),
            None => debug!("Dropping unroutable message for {}", queue),
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let mut state = self.broker.lock();
        let connection = state.check_channel(self.id)?;
        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{}'", queue)))?;

        if target.owner.is_some_and(|owner| owner != connection) {
            return Err(BrokerError::ResourceLocked(format!(
                "queue '{}' is exclusive to another connection",
                queue
            )));
        }
        if !target.consumers.is_empty() {
            return Err(BrokerError::ResourceLocked(format!(
                "queue '{}' already has a consumer",
                queue
            )));
        }

        let (tx, rx) = unbounded();
        while let Some(message) = target.pending.pop_front() {
            // rx is alive, send cannot fail
            let _ = tx.unbounded_send(Ok(message));
        }
        target.consumers.push(ConsumerSlot {
            channel: self.id,
            tx,
        });
        target.had_consumer = true;

        Ok(rx.boxed())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker.lock().close_channel(self.id);
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.broker.lock().close_channel(self.id);
    }
}
