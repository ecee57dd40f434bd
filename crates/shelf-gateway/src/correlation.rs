// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/reply correlation.
//!
//! A reply queue can in principle see messages meant for another call (a
//! broker-generated name reused after auto-deletion, a late reply to an
//! earlier call). The correlation id is the authoritative match key: the
//! tracker accepts exactly one delivery carrying its id and reports
//! everything else so the receive loop can keep waiting.

use crate::broker::BrokerMessage;
use std::fmt;
use uuid::Uuid;

/// Unique token attached to a request and echoed on its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

/// Outcome of offering a delivery to a [`CorrelationTracker`].
#[derive(Debug, PartialEq)]
pub enum Dispatch {
    /// The reply for this call.
    Matched(Vec<u8>),
    /// A reply for some other call (or one with no correlation id).
    Mismatched { correlation_id: Option<String> },
    /// Another delivery for a call that already got its reply.
    Duplicate,
}

/// Matches deliveries against the id of one in-flight call.
#[derive(Debug)]
pub struct CorrelationTracker {
    expected: CorrelationId,
    consumed: bool,
    discarded: u64,
}

impl CorrelationTracker {
    /// Track a freshly generated id.
    pub fn new() -> Self {
        Self::with_id(CorrelationId::new())
    }

    /// Track a given id.
    pub fn with_id(expected: CorrelationId) -> Self {
        Self {
            expected,
            consumed: false,
            discarded: 0,
        }
    }

    /// Id the reply must carry.
    pub fn id(&self) -> &CorrelationId {
        &self.expected
    }

    /// Whether the matching reply has been seen.
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Deliveries ignored so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Classify a delivery.
    pub fn dispatch(&mut self, delivery: BrokerMessage) -> Dispatch {
        if delivery.correlation_id.as_deref() != Some(self.expected.as_str()) {
            self.discarded += 1;
            return Dispatch::Mismatched {
                correlation_id: delivery.correlation_id,
            };
        }
        if self.consumed {
            self.discarded += 1;
            return Dispatch::Duplicate;
        }
        self.consumed = true;
        Dispatch::Matched(delivery.body)
    }
}

impl Default for CorrelationTracker {
    fn default() -> Self {
        Self::new()
    }
}
