// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Outbound Properties
//!
//! Builds the `BasicProperties` sent with a publish. Returning `None` is a valid
//! outcome and leaves defaulting to the broker client; a properties object only
//! exists when a builder factory produced one or when filtered metadata has to
//! travel as headers.

use crate::{
    errors::AmqpError,
    message::{Message, MetadataFilter, RemoveAllMetadataFilter},
    metadata::{self, *},
};
use lapin::{
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties,
};
use serde::Deserialize;
use std::{collections::BTreeMap, sync::Arc};
use tracing::warn;

/// Creates `BasicProperties` from a message.
pub trait PropertiesBuilder: Send + Sync {
    fn build(&self, msg: &Message) -> Result<Option<BasicProperties>, AmqpError>;
}

/// Never creates properties.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProperties;

impl PropertiesBuilder for NoProperties {
    fn build(&self, _msg: &Message) -> Result<Option<BasicProperties>, AmqpError> {
        Ok(None)
    }
}

/// Supplies the standard (non header) fields of a `BasicProperties`.
pub trait PropertiesBuilderFactory: Send + Sync {
    fn build(&self, msg: &Message) -> Result<BasicProperties, AmqpError>;
}

/// Metadata filtered by `header_filter` becomes the headers; an optional
/// `builder_factory` supplies the standard fields.
pub struct MetadataToProperties {
    header_filter: Arc<dyn MetadataFilter>,
    builder_factory: Option<Arc<dyn PropertiesBuilderFactory>>,
}

impl Default for MetadataToProperties {
    fn default() -> Self {
        MetadataToProperties {
            header_filter: Arc::new(RemoveAllMetadataFilter),
            builder_factory: None,
        }
    }
}

impl MetadataToProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: Arc<dyn MetadataFilter>) -> Self {
        self.header_filter = filter;
        self
    }

    pub fn with_builder(mut self, factory: Arc<dyn PropertiesBuilderFactory>) -> Self {
        self.builder_factory = Some(factory);
        self
    }
}

impl PropertiesBuilder for MetadataToProperties {
    fn build(&self, msg: &Message) -> Result<Option<BasicProperties>, AmqpError> {
        let built = match &self.builder_factory {
            Some(factory) => Some(factory.build(msg)?),
            None => None,
        };

        let metadata = self.header_filter.filter(msg);
        if metadata.is_empty() {
            return Ok(built);
        }

        let properties = built.unwrap_or_default();
        let mut headers = properties.headers().clone().unwrap_or_default();
        for (key, value) in metadata {
            headers.insert(
                ShortString::from(key),
                AMQPValue::LongString(LongString::from(value)),
            );
        }

        Ok(Some(properties.with_headers(headers)))
    }
}

/// Derives the standard fields from the well-known `rmq*` metadata keys.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct StandardPropertiesBuilderFactory;

impl PropertiesBuilderFactory for StandardPropertiesBuilderFactory {
    fn build(&self, msg: &Message) -> Result<BasicProperties, AmqpError> {
        Ok(properties_from_map(msg.metadata()))
    }
}

/// Each field is an optional value that may contain `%message{key}` expressions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfiguredPropertiesBuilderFactory {
    pub app_id: Option<String>,
    pub cluster_id: Option<String>,
    pub content_encoding: Option<String>,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub delivery_mode: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub priority: Option<String>,
    pub reply_to: Option<String>,
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub user_id: Option<String>,
}

impl PropertiesBuilderFactory for ConfiguredPropertiesBuilderFactory {
    fn build(&self, msg: &Message) -> Result<BasicProperties, AmqpError> {
        let configured = [
            (RMQ_APP_ID, &self.app_id),
            (RMQ_CLUSTER_ID, &self.cluster_id),
            (RMQ_CONTENT_ENCODING, &self.content_encoding),
            (RMQ_CONTENT_TYPE, &self.content_type),
            (RMQ_CORRELATION_ID, &self.correlation_id),
            (RMQ_DELIVERY_MODE, &self.delivery_mode),
            (RMQ_EXPIRATION, &self.expiration),
            (RMQ_MESSAGE_ID, &self.message_id),
            (RMQ_PRIORITY, &self.priority),
            (RMQ_REPLY_TO, &self.reply_to),
            (RMQ_TIMESTAMP, &self.timestamp),
            (RMQ_TYPE, &self.kind),
            (RMQ_USER_ID, &self.user_id),
        ];

        let mut resolved = BTreeMap::new();
        for (key, value) in configured {
            if let Some(value) = value {
                resolved.insert(key.to_owned(), msg.resolve(value)?);
            }
        }

        Ok(properties_from_map(&resolved))
    }
}

/// Builds `BasicProperties` from a map keyed by the `rmq*` constants.
///
/// Blank values are skipped. Numeric and timestamp values that do not parse are
/// logged and skipped.
pub fn properties_from_map(map: &BTreeMap<String, String>) -> BasicProperties {
    let value = |key: &str| {
        map.get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    };
    let short = |key: &str| value(key).map(ShortString::from);
    let octet = |key: &str| {
        value(key).and_then(|v| match v.parse::<u8>() {
            Ok(n) => Some(n),
            Err(err) => {
                warn!(error = err.to_string(), key, value = v, "ignoring invalid property");
                None
            }
        })
    };

    let mut props = BasicProperties::default();
    if let Some(v) = short(RMQ_APP_ID) {
        props = props.with_app_id(v);
    }
    if let Some(v) = short(RMQ_CLUSTER_ID) {
        props = props.with_cluster_id(v);
    }
    if let Some(v) = short(RMQ_CONTENT_ENCODING) {
        props = props.with_content_encoding(v);
    }
    if let Some(v) = short(RMQ_CONTENT_TYPE) {
        props = props.with_content_type(v);
    }
    if let Some(v) = short(RMQ_CORRELATION_ID) {
        props = props.with_correlation_id(v);
    }
    if let Some(v) = octet(RMQ_DELIVERY_MODE) {
        props = props.with_delivery_mode(v);
    }
    if let Some(v) = short(RMQ_EXPIRATION) {
        props = props.with_expiration(v);
    }
    if let Some(v) = short(RMQ_MESSAGE_ID) {
        props = props.with_message_id(v);
    }
    if let Some(v) = octet(RMQ_PRIORITY) {
        props = props.with_priority(v);
    }
    if let Some(v) = short(RMQ_REPLY_TO) {
        props = props.with_reply_to(v);
    }
    if let Some(v) = value(RMQ_TIMESTAMP) {
        match metadata::parse_timestamp(v) {
            Some(ts) => props = props.with_timestamp(ts),
            None => warn!(value = v, "ignoring unparseable timestamp"),
        }
    }
    if let Some(v) = short(RMQ_TYPE) {
        props = props.with_kind(v);
    }
    if let Some(v) = short(RMQ_USER_ID) {
        props = props.with_user_id(v);
    }

    props
}

/// Reads a header back as a string, used by callers that inspect built properties.
pub fn header(properties: &BasicProperties, key: &str) -> Option<String> {
    properties
        .headers()
        .as_ref()
        .and_then(|h: &FieldTable| h.inner().get(key).map(crate::translator::header_value_to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NoOpMetadataFilter;

    fn message() -> Message {
        let mut msg = Message::new("hello");
        msg.add_metadata("MY_KEY", "MY_VALUE");
        msg.add_metadata(RMQ_CONTENT_TYPE, "text/plain");
        msg
    }

    #[test]
    fn no_properties_is_none() {
        assert!(NoProperties.build(&message()).unwrap().is_none());
    }

    #[test]
    fn null_without_factory_and_metadata() {
        let converter = MetadataToProperties::new();
        assert!(converter.build(&message()).unwrap().is_none());
        // idempotent
        assert!(converter.build(&message()).unwrap().is_none());
    }

    #[test]
    fn metadata_becomes_headers() {
        let converter = MetadataToProperties::new().with_filter(Arc::new(NoOpMetadataFilter));
        let props = converter.build(&message()).unwrap().unwrap();

        assert_eq!(header(&props, "MY_KEY").as_deref(), Some("MY_VALUE"));
        assert_eq!(*props.content_type(), None);

        let again = converter.build(&message()).unwrap().unwrap();
        assert_eq!(header(&again, "MY_KEY"), header(&props, "MY_KEY"));
        assert_eq!(header(&again, RMQ_CONTENT_TYPE), header(&props, RMQ_CONTENT_TYPE));
    }

    #[test]
    fn with_builder_sets_standard_fields() {
        let converter = MetadataToProperties::new()
            .with_filter(Arc::new(NoOpMetadataFilter))
            .with_builder(Arc::new(StandardPropertiesBuilderFactory));
        let props = converter.build(&message()).unwrap().unwrap();

        assert_eq!(header(&props, "MY_KEY").as_deref(), Some("MY_VALUE"));
        assert_eq!(
            props.content_type().as_ref().map(|v| v.as_str()),
            Some("text/plain")
        );
    }

    #[test]
    fn with_builder_and_no_metadata() {
        let converter = MetadataToProperties::new()
            .with_filter(Arc::new(RemoveAllMetadataFilter))
            .with_builder(Arc::new(StandardPropertiesBuilderFactory));
        let props = converter.build(&message()).unwrap().unwrap();

        assert!(props.headers().is_none());
        assert_eq!(
            props.content_type().as_ref().map(|v| v.as_str()),
            Some("text/plain")
        );
    }

    #[test]
    fn standard_factory_parses_numbers_and_dates() {
        let mut msg = Message::new("");
        msg.add_metadata(RMQ_PRIORITY, "5");
        msg.add_metadata(RMQ_DELIVERY_MODE, "not-a-number");
        msg.add_metadata(RMQ_TIMESTAMP, "2023-11-14T22:13:20+0000");
        msg.add_metadata(RMQ_APP_ID, "   ");

        let props = StandardPropertiesBuilderFactory.build(&msg).unwrap();
        assert_eq!(*props.priority(), Some(5));
        assert_eq!(*props.delivery_mode(), None);
        assert_eq!(*props.timestamp(), Some(1_700_000_000));
        assert_eq!(*props.app_id(), None);
    }

    #[test]
    fn configured_factory_resolves_expressions() {
        let factory = ConfiguredPropertiesBuilderFactory {
            app_id: Some("billing".to_owned()),
            correlation_id: Some("%message{MY_KEY}".to_owned()),
            priority: Some("3".to_owned()),
            ..Default::default()
        };

        let props = factory.build(&message()).unwrap();
        assert_eq!(props.app_id().as_ref().map(|v| v.as_str()), Some("billing"));
        assert_eq!(
            props.correlation_id().as_ref().map(|v| v.as_str()),
            Some("MY_VALUE")
        );
        assert_eq!(*props.priority(), Some(3));
        assert_eq!(*props.content_type(), None);

        let broken = ConfiguredPropertiesBuilderFactory {
            message_id: Some("%message{missing}".to_owned()),
            ..Default::default()
        };
        assert!(broken.build(&message()).is_err());
    }
}
