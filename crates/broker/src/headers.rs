use std::collections::BTreeMap;

use common::events::RETRY_COUNT_HEADER;
use serde::{Deserialize, Serialize};

/// A single message header value.
///
/// Brokers carry richer types, but the bus only ever needs strings (trace
/// context) and integers (retry count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Int(i64),
    Str(String),
}

impl From<&str> for HeaderValue {
    fn from(s: &str) -> Self {
        HeaderValue::Str(s.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(s: String) -> Self {
        HeaderValue::Str(s)
    }
}

impl From<i64> for HeaderValue {
    fn from(n: i64) -> Self {
        HeaderValue::Int(n)
    }
}

/// Message headers, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, HeaderValue>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<HeaderValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(HeaderValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Number of times the message has been re-published; absent means 0.
    ///
    /// Tolerates the count arriving as a string, which some brokers and
    /// tools produce when a message is re-published by hand.
    pub fn retry_count(&self) -> i64 {
        match self.0.get(RETRY_COUNT_HEADER) {
            Some(HeaderValue::Int(n)) => *n,
            Some(HeaderValue::Str(s)) => s.parse().unwrap_or(0),
            None => 0,
        }
    }

    pub fn set_retry_count(&mut self, count: i64) {
        self.insert(RETRY_COUNT_HEADER, count);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, HeaderValue)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, HeaderValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
