// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queue RPC integration tests
//!
//! Drives the RPC bridge against the in-process broker with hand-written
//! service consumers.

use futures::StreamExt;
use serde_json::{json, Value};
use shelf_gateway::broker::{
    BrokerChannel, BrokerConnection, BrokerMessage, Connector, QueueOptions,
};
use shelf_gateway::{ErrorKind, ForwardError, MemoryBroker, RpcBridge, Variables};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const PATRON_QUEUE: &str = "patron-service-queue";

fn vars(value: Value) -> Variables {
    match value {
        Value::Object(map) => map,
        _ => panic!("variables must be an object"),
    }
}

/// Service consumer that hands every request to `requests` and, for each,
/// sends `decoys` replies under a foreign correlation id before echoing the
/// request variables under the right one.
async fn spawn_service(
    broker: &MemoryBroker,
    queue: &str,
    decoys: usize,
    requests: Option<mpsc::UnboundedSender<BrokerMessage>>,
) {
    let connection = broker.connect().await.expect("connect");
    let channel = connection.open_channel().await.expect("channel");
    channel
        .declare_queue(queue, QueueOptions::service())
        .await
        .expect("declare");
    let mut deliveries = channel.consume(queue).await.expect("consume");

    tokio::spawn(async move {
        let _connection = connection;
        while let Some(Ok(request)) = deliveries.next().await {
            if let Some(ref tx) = requests {
                let _ = tx.send(request.clone());
            }
            let reply_to = request.reply_to.clone().expect("reply-to");
            for i in 0..decoys {
                let decoy = BrokerMessage::json(format!(r#"{{"decoy":{}}}"#, i).into_bytes())
                    .correlation_id(format!("someone-else-{}", i));
                channel.publish(&reply_to, decoy).await.expect("publish decoy");
            }
            let body: Value = serde_json::from_slice(&request.body).expect("json body");
            let mut reply =
                BrokerMessage::json(serde_json::to_vec(&body["variables"]).expect("encode"));
            reply.correlation_id = request.correlation_id.clone();
            channel.publish(&reply_to, reply).await.expect("publish reply");
        }
    });
}

#[tokio::test]
async fn test_request_wire_format() {
    let broker = MemoryBroker::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    spawn_service(&broker, PATRON_QUEUE, 0, Some(tx)).await;

    let bridge = RpcBridge::new(broker.clone());
    let body = bridge
        .call(PATRON_QUEUE, &vars(json!({"id": "7"})), "patron")
        .await
        .expect("call");
    assert_eq!(&body[..], br#"{"id":"7"}"#);

    let request = rx.recv().await.expect("request seen");
    assert_eq!(request.content_type.as_deref(), Some("application/json"));
    let correlation_id = request.correlation_id.expect("correlation id");
    assert_eq!(correlation_id.len(), 36);
    assert!(request.reply_to.expect("reply-to").starts_with("amq.gen-"));

    let envelope: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(
        envelope,
        json!({"variables": {"id": "7"}, "requestedResolver": "patron"})
    );
}

#[tokio::test]
async fn test_mismatched_replies_are_ignored() {
    let broker = MemoryBroker::new();
    spawn_service(&broker, PATRON_QUEUE, 3, None).await;

    let bridge = RpcBridge::new(broker.clone());
    let body = bridge
        .call(PATRON_QUEUE, &vars(json!({"id": "1"})), "patron")
        .await
        .expect("call");

    assert_eq!(&body[..], br#"{"id":"1"}"#);
    let stats = bridge.stats();
    assert_eq!(stats.replies, 1);
    assert_eq!(stats.discarded, 3);
}

/// Service consumer that waits for `calls` requests, then answers each one
/// on its reply queue with the next request's real reply first and its own
/// reply second.
async fn spawn_crossed_service(broker: &MemoryBroker, queue: &str, calls: usize) {
    let connection = broker.connect().await.expect("connect");
    let channel = connection.open_channel().await.expect("channel");
    channel
        .declare_queue(queue, QueueOptions::service())
        .await
        .expect("declare");
    let mut deliveries = channel.consume(queue).await.expect("consume");

    tokio::spawn(async move {
        let _connection = connection;
        let mut requests = Vec::with_capacity(calls);
        while requests.len() < calls {
            match deliveries.next().await {
                Some(Ok(request)) => requests.push(request),
                _ => return,
            }
        }

        let replies: Vec<BrokerMessage> = requests
            .iter()
            .map(|request| {
                let body: Value = serde_json::from_slice(&request.body).expect("json body");
                let mut reply =
                    BrokerMessage::json(serde_json::to_vec(&body["variables"]).expect("encode"));
                reply.correlation_id = request.correlation_id.clone();
                reply
            })
            .collect();

        for (i, request) in requests.iter().enumerate() {
            let reply_to = request.reply_to.as_deref().expect("reply-to");
            let sibling = replies[(i + 1) % calls].clone();
            channel.publish(reply_to, sibling).await.expect("publish sibling");
            channel
                .publish(reply_to, replies[i].clone())
                .await
                .expect("publish reply");
        }
    });
}

#[tokio::test]
async fn test_concurrent_calls_are_isolated() {
    let broker = MemoryBroker::new();
    spawn_crossed_service(&broker, PATRON_QUEUE, 3).await;

    let bridge = RpcBridge::new(broker.clone());
    let first = vars(json!({"id": "first"}));
    let second = vars(json!({"id": "second"}));
    let third = vars(json!({"id": "third"}));

    let (a, b, c) = tokio::join!(
        bridge.call(PATRON_QUEUE, &first, "patron"),
        bridge.call(PATRON_QUEUE, &second, "patron"),
        bridge.call(PATRON_QUEUE, &third, "patron"),
    );

    assert_eq!(&a.expect("first")[..], br#"{"id":"first"}"#);
    assert_eq!(&b.expect("second")[..], br#"{"id":"second"}"#);
    assert_eq!(&c.expect("third")[..], br#"{"id":"third"}"#);

    // Every call saw exactly one sibling's reply before its own.
    let stats = bridge.stats();
    assert_eq!(stats.replies, 3);
    assert_eq!(stats.discarded, 3);
    assert_eq!(stats.in_flight(), 0);
}

#[tokio::test]
async fn test_timeout_releases_resources() {
    let broker = MemoryBroker::new();
    let bridge = RpcBridge::new(broker.clone()).with_timeout(Duration::from_millis(100));

    let started = Instant::now();
    let err = bridge
        .call(PATRON_QUEUE, &Variables::new(), "patron")
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(err.to_string().contains(PATRON_QUEUE));

    // Connection, channel and reply queue are gone; the service queue and
    // the unanswered request stay.
    assert_eq!(broker.open_connections(), 0);
    assert_eq!(broker.open_channels(), 0);
    assert_eq!(broker.queue_names(), vec![PATRON_QUEUE.to_string()]);
    assert_eq!(broker.pending(PATRON_QUEUE), 1);
    assert_eq!(bridge.stats().timeouts, 1);
}

#[tokio::test]
async fn test_only_foreign_replies_time_out() {
    let broker = MemoryBroker::new();
    let connection = broker.connect().await.unwrap();
    let channel = connection.open_channel().await.unwrap();
    channel
        .declare_queue(PATRON_QUEUE, QueueOptions::service())
        .await
        .unwrap();
    let mut deliveries = channel.consume(PATRON_QUEUE).await.unwrap();

    tokio::spawn(async move {
        let _connection = connection;
        while let Some(Ok(request)) = deliveries.next().await {
            let reply_to = request.reply_to.unwrap();
            let stray = BrokerMessage::json(b"{}".to_vec()).correlation_id("not-yours");
            let _ = channel.publish(&reply_to, stray).await;
            let _ = channel.publish(&reply_to, BrokerMessage::json(b"{}".to_vec())).await;
        }
    });

    let bridge = RpcBridge::new(broker.clone()).with_timeout(Duration::from_millis(150));
    let err = bridge
        .call(PATRON_QUEUE, &Variables::new(), "patron")
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(bridge.stats().discarded, 2);
}

#[tokio::test]
async fn test_declare_conflict_is_reported() {
    let broker = MemoryBroker::new();
    let connection = broker.connect().await.unwrap();
    let channel = connection.open_channel().await.unwrap();
    // Same name, incompatible flags
    channel
        .declare_queue(PATRON_QUEUE, QueueOptions::default())
        .await
        .unwrap();

    let bridge = RpcBridge::new(broker.clone());
    let err = bridge
        .call(PATRON_QUEUE, &Variables::new(), "patron")
        .await
        .unwrap_err();

    assert!(matches!(err, ForwardError::DeclareQueue { .. }));
    assert_eq!(err.kind(), ErrorKind::ResourceDeclarationFailure);
    // Only the conflicting declarer stays connected
    assert_eq!(broker.open_connections(), 1);
    assert_eq!(broker.open_channels(), 1);
}

#[tokio::test]
async fn test_unreachable_broker() {
    let broker = MemoryBroker::new();
    broker.set_unavailable(true);

    let bridge = RpcBridge::new(broker.clone());
    let err = bridge
        .call(PATRON_QUEUE, &Variables::new(), "patron")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionFailure);
    assert!(!err.is_timeout());
    assert!(broker.queue_names().is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_waiting() {
    let broker = MemoryBroker::new();
    let bridge = RpcBridge::new(broker.clone());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = bridge
        .call_until_cancelled(&cancel, PATRON_QUEUE, &Variables::new(), "patron")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(broker.open_connections(), 0);
    assert_eq!(broker.open_channels(), 0);
}
