// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Generic Message Model
//!
//! The host pipeline exchanges [`Message`] values: an opaque payload plus a flat
//! string metadata bag. This module also carries the `%message{key}` expression
//! syntax used for destinations and configured properties, and the metadata
//! filters that decide which metadata becomes AMQP headers.

use crate::errors::AmqpError;
use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;

const EXPRESSION_START: &str = "%message{";

/// A message flowing through the host pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    unique_id: String,
    payload: Vec<u8>,
    metadata: BTreeMap<String, String>,
}

impl Message {
    pub fn new(payload: impl Into<Vec<u8>>) -> Message {
        Message {
            unique_id: Uuid::new_v4().to_string(),
            payload: payload.into(),
            metadata: BTreeMap::default(),
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The payload as UTF-8, replacing invalid sequences.
    pub fn content(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Resolves every `%message{key}` in `value` against this message's metadata.
    ///
    /// Plain strings are returned unchanged. Referencing a key that is not present
    /// is an error rather than an empty substitution.
    pub fn resolve(&self, value: &str) -> Result<String, AmqpError> {
        let mut resolved = String::with_capacity(value.len());
        let mut rest = value;

        while let Some(start) = rest.find(EXPRESSION_START) {
            resolved.push_str(&rest[..start]);
            let after = &rest[start + EXPRESSION_START.len()..];
            let Some(end) = after.find('}') else {
                return Err(AmqpError::ConfigurationError(format!(
                    "unterminated expression in `{value}`"
                )));
            };

            let key = &after[..end];
            match self.metadata_value(key) {
                Some(v) => resolved.push_str(v),
                None => {
                    return Err(AmqpError::ConfigurationError(format!(
                        "metadata `{key}` not found while resolving `{value}`"
                    )))
                }
            }
            rest = &after[end + 1..];
        }

        resolved.push_str(rest);
        Ok(resolved)
    }
}

/// Returns true if `value` contains a `%message{...}` expression.
pub fn is_expression(value: &str) -> bool {
    value.contains(EXPRESSION_START)
}

/// Creates messages for inbound deliveries.
pub trait MessageFactory: Send + Sync {
    fn new_message(&self, payload: &[u8]) -> Message;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMessageFactory;

impl MessageFactory for DefaultMessageFactory {
    fn new_message(&self, payload: &[u8]) -> Message {
        Message::new(payload)
    }
}

/// Selects the metadata of a message that should leave the adapter as AMQP headers.
pub trait MetadataFilter: Send + Sync {
    fn filter(&self, msg: &Message) -> BTreeMap<String, String>;
}

/// Passes every metadata entry through.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetadataFilter;

impl MetadataFilter for NoOpMetadataFilter {
    fn filter(&self, msg: &Message) -> BTreeMap<String, String> {
        msg.metadata().clone()
    }
}

/// Drops all metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveAllMetadataFilter;

impl MetadataFilter for RemoveAllMetadataFilter {
    fn filter(&self, _msg: &Message) -> BTreeMap<String, String> {
        BTreeMap::default()
    }
}

/// Keeps only the listed keys, or keys starting with one of the listed prefixes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IncludeMetadataFilter {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub prefixes: Vec<String>,
}

impl IncludeMetadataFilter {
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IncludeMetadataFilter {
            keys: keys.into_iter().map(Into::into).collect(),
            prefixes: vec![],
        }
    }
}

impl MetadataFilter for IncludeMetadataFilter {
    fn filter(&self, msg: &Message) -> BTreeMap<String, String> {
        msg.metadata()
            .iter()
            .filter(|(k, _)| {
                self.keys.iter().any(|key| key == *k)
                    || self.prefixes.iter().any(|p| k.starts_with(p.as_str()))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
