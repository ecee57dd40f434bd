// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Domain types relayed from subscriptions.

use serde::{Deserialize, Deserializer, Serialize};

/// Subscription for newly added books.
pub const BOOK_ADDED_SUBSCRIPTION: &str =
    "subscription { bookAdded { id title author_name date_published description image} }";

/// Entity field carrying the book in `bookAdded` data frames.
pub const BOOK_ADDED_ENTITY: &str = "bookAdded";

/// A catalogue book.
///
/// Absent or null text fields decode as empty strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub author_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub date_published: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
