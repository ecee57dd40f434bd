// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription relay.
//!
//! Holds one WebSocket connection to a GraphQL service and republishes the
//! entities of its `data` frames onto a bounded channel:
//!
//! ```text
//! Connecting -> HandshakeSent -> Streaming -> Closed
//!     |              |               |
//!  connect      connection_init   data frames -> mpsc::Sender<T>
//!               <ack discarded>
//!               start {query}
//! ```
//!
//! [`SubscriptionRelay::subscribe`] returns once the handshake is done; the
//! read loop then runs on its own task, which is the only owner of the
//! sender. The channel closes exactly once, when that task ends: on read
//! error, server close, receiver drop or cancellation. A full channel
//! blocks the read loop (backpressure) but never past a cancellation.

use crate::error::ForwardError;
use crate::model::{BOOK_ADDED_ENTITY, BOOK_ADDED_SUBSCRIPTION};
use crate::protocol::{ClientFrame, FrameKind, ServerFrame, SUBPROTOCOL};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default capacity of subscription output channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default bound on connect + handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const SUBSCRIPTION_ID: &str = "1";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a relay stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Cancelled through its handle.
    Cancelled,
    /// The server closed the connection.
    ServerClosed,
    /// Reading from the connection failed.
    ReadFailed(String),
    /// The output receiver was dropped.
    ReceiverDropped,
    /// The relay task panicked or was aborted.
    Aborted(String),
}

/// Control handle for a running relay.
///
/// Dropping the handle detaches the relay; it keeps running until the
/// stream ends or the receiver is dropped.
#[derive(Debug)]
pub struct RelayHandle {
    cancel: CancellationToken,
    task: JoinHandle<RelayOutcome>,
}

impl RelayHandle {
    /// Stop the relay. The output channel closes once the task exits.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that stops this relay when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Check if the relay task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the relay to exit.
    pub async fn join(self) -> RelayOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => RelayOutcome::Aborted(err.to_string()),
        }
    }
}

/// Relays one subscription from a WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct SubscriptionRelay {
    url: String,
    query: String,
    entity: String,
    handshake_timeout: Duration,
}

impl SubscriptionRelay {
    /// Relay `query` from `url`, extracting `payload.data.<entity>`.
    pub fn new(url: impl Into<String>, query: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: query.into(),
            entity: entity.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Relay the `bookAdded` subscription from `url`.
    pub fn book_added(url: impl Into<String>) -> Self {
        Self::new(url, BOOK_ADDED_SUBSCRIPTION, BOOK_ADDED_ENTITY)
    }

    /// Set the connect + handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Entity extracted from data frames.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Connect, run the handshake, then relay events into `out` from a
    /// background task.
    pub async fn subscribe<T>(&self, out: mpsc::Sender<T>) -> Result<RelayHandle, ForwardError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.start(out, CancellationToken::new()).await
    }

    /// Like [`subscribe`](Self::subscribe), but the relay also stops when
    /// `parent` is cancelled.
    pub async fn subscribe_linked<T>(
        &self,
        parent: &CancellationToken,
        out: mpsc::Sender<T>,
    ) -> Result<RelayHandle, ForwardError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.start(out, parent.child_token()).await
    }

    async fn start<T>(
        &self,
        out: mpsc::Sender<T>,
        cancel: CancellationToken,
    ) -> Result<RelayHandle, ForwardError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let socket = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ForwardError::Cancelled),
            socket = tokio::time::timeout(self.handshake_timeout, self.handshake()) => {
                socket.map_err(|_| {
                    ForwardError::Handshake(format!(
                        "no acknowledgement from {} within {:?}",
                        self.url, self.handshake_timeout
                    ))
                })??
            }
        };

        info!("Subscribed to {} at {}", self.entity, self.url);

        let task = tokio::spawn(relay_frames(
            socket,
            out,
            self.entity.clone(),
            cancel.clone(),
        ));
        Ok(RelayHandle { cancel, task })
    }

    async fn handshake(&self) -> Result<Socket, ForwardError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(ForwardError::WebSocket)?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

        let (mut socket, _) = connect_async(request)
            .await
            .map_err(ForwardError::WebSocket)?;

        send_frame(&mut socket, &ClientFrame::ConnectionInit).await?;
        match socket.next().await {
            Some(Ok(Message::Close(_))) | None => {
                return Err(ForwardError::Handshake(
                    "connection closed before acknowledgement".into(),
                ))
            }
            // Content is not checked
            Some(Ok(_ack)) => {}
            Some(Err(err)) => return Err(ForwardError::WebSocket(err)),
        }
        send_frame(&mut socket, &ClientFrame::start(SUBSCRIPTION_ID, &self.query)).await?;

        Ok(socket)
    }
}

async fn send_frame(socket: &mut Socket, frame: &ClientFrame) -> Result<(), ForwardError> {
    let text = frame.to_json().map_err(ForwardError::Encode)?;
    socket
        .send(Message::Text(text))
        .await
        .map_err(ForwardError::WebSocket)
}

/// Read loop. Owns (and on exit drops) the only sender of `out`.
async fn relay_frames<T>(
    mut socket: Socket,
    out: mpsc::Sender<T>,
    entity: String,
    cancel: CancellationToken,
) -> RelayOutcome
where
    T: DeserializeOwned + Send + 'static,
{
    let outcome = loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break RelayOutcome::Cancelled,
            message = socket.next() => message,
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Skipping non UTF-8 binary frame on {}", entity);
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) | None => break RelayOutcome::ServerClosed,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                warn!("WebSocket read failed on {}: {}", entity, err);
                break RelayOutcome::ReadFailed(err.to_string());
            }
        };

        let frame = match ServerFrame::parse(&text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("Failed to decode frame on {}: {}", entity, err);
                continue;
            }
        };

        match frame.kind() {
            FrameKind::Data => {}
            FrameKind::Error | FrameKind::ConnectionError => {
                warn!("Subscription {} error: {}", entity, frame.error_text());
                continue;
            }
            other => {
                debug!("Ignoring {:?} frame on {}", other, entity);
                continue;
            }
        }

        let event = match frame.entity::<T>(&entity) {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!("Data frame without {} payload", entity);
                continue;
            }
            Err(err) => {
                warn!("Failed to decode {} payload: {}", entity, err);
                continue;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break RelayOutcome::Cancelled,
            sent = out.send(event) => {
                if sent.is_err() {
                    break RelayOutcome::ReceiverDropped;
                }
            }
        }
    };

    if matches!(
        outcome,
        RelayOutcome::Cancelled | RelayOutcome::ReceiverDropped
    ) {
        let stop = ClientFrame::Stop {
            id: SUBSCRIPTION_ID.to_string(),
        };
        if let Err(err) = send_frame(&mut socket, &stop).await {
            debug!("Failed to send stop for {}: {}", entity, err);
        }
        let _ = socket.close(None).await;
    }

    drop(out);
    info!("Subscription relay for {} closed: {:?}", entity, outcome);
    outcome
}
