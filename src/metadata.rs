// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Metadata Keys and Mapping Tables
//!
//! Well-known metadata keys written by the consumer side and read by the producer
//! side, together with the fixed accessor tables that turn `BasicProperties` and
//! delivery envelopes into string metadata values.

use crate::translator::Envelope;
use chrono::{DateTime, FixedOffset, Utc};
use lapin::{types::ShortString, BasicProperties};

pub const RMQ_QUEUE: &str = "rmqQueue";
pub const RMQ_CONSUMER_TAG: &str = "rmqConsumerTag";
pub const RMQ_DELIVERY_TAG: &str = "rmqDeliveryTag";
pub const RMQ_IS_REDELIVERY: &str = "rmqIsRedelivery";
pub const RMQ_EXCHANGE: &str = "rmqExchange";
pub const RMQ_ROUTING_KEY: &str = "rmqRoutingKey";
pub const RMQ_APP_ID: &str = "rmqAppId";
pub const RMQ_CLASS_ID: &str = "rmqClassId";
pub const RMQ_CLUSTER_ID: &str = "rmqClusterId";
pub const RMQ_CONTENT_ENCODING: &str = "rmqContentEncoding";
pub const RMQ_CONTENT_TYPE: &str = "rmqContentType";
pub const RMQ_CORRELATION_ID: &str = "rmqCorrelationId";
pub const RMQ_DELIVERY_MODE: &str = "rmqDeliveryMode";
pub const RMQ_EXPIRATION: &str = "rmqExpiration";
pub const RMQ_MESSAGE_ID: &str = "rmqMessageId";
pub const RMQ_PRIORITY: &str = "rmqPriority";
pub const RMQ_REPLY_TO: &str = "rmqReplyTo";
pub const RMQ_TIMESTAMP: &str = "rmqTimestamp";
pub const RMQ_TYPE: &str = "rmqType";
pub const RMQ_USER_ID: &str = "rmqUserId";

/// Written by the producer when publish confirmation is enabled. Not prefixed.
pub const QUEUE_PUBLISH_STATUS: &str = "queue_publish_status";

/// AMQP class id of the `basic` class; every `BasicProperties` carries it.
pub const BASIC_CLASS_ID: u16 = 60;

/// Canonical format used for `rmqTimestamp`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

pub type PropertyAccessor = fn(&BasicProperties) -> Option<String>;
pub type EnvelopeAccessor = fn(&Envelope) -> Option<String>;

/// Metadata key to `BasicProperties` accessor. An accessor returning `None`
/// means nothing is written for that key.
pub static PROPERTY_MAP: &[(&str, PropertyAccessor)] = &[
    (RMQ_APP_ID, |p: &BasicProperties| short(p.app_id())),
    (RMQ_CONTENT_ENCODING, |p: &BasicProperties| {
        short(p.content_encoding())
    }),
    (RMQ_CLUSTER_ID, |p: &BasicProperties| short(p.cluster_id())),
    // not optional on the wire model
    (RMQ_CLASS_ID, |_: &BasicProperties| {
        Some(BASIC_CLASS_ID.to_string())
    }),
    (RMQ_CONTENT_TYPE, |p: &BasicProperties| short(p.content_type())),
    (RMQ_CORRELATION_ID, |p: &BasicProperties| {
        short(p.correlation_id())
    }),
    (RMQ_DELIVERY_MODE, |p: &BasicProperties| {
        p.delivery_mode().map(|v| v.to_string())
    }),
    (RMQ_EXPIRATION, |p: &BasicProperties| short(p.expiration())),
    (RMQ_MESSAGE_ID, |p: &BasicProperties| short(p.message_id())),
    (RMQ_PRIORITY, |p: &BasicProperties| {
        p.priority().map(|v| v.to_string())
    }),
    (RMQ_REPLY_TO, |p: &BasicProperties| short(p.reply_to())),
    (RMQ_TIMESTAMP, |p: &BasicProperties| {
        p.timestamp().and_then(format_timestamp)
    }),
    (RMQ_TYPE, |p: &BasicProperties| short(p.kind())),
    (RMQ_USER_ID, |p: &BasicProperties| short(p.user_id())),
];

/// Metadata key to delivery envelope accessor.
pub static ENVELOPE_MAP: &[(&str, EnvelopeAccessor)] = &[
    (RMQ_DELIVERY_TAG, |e: &Envelope| {
        Some(e.delivery_tag.to_string())
    }),
    (RMQ_EXCHANGE, |e: &Envelope| e.exchange.clone()),
    (RMQ_ROUTING_KEY, |e: &Envelope| e.routing_key.clone()),
    (RMQ_IS_REDELIVERY, |e: &Envelope| Some(e.redeliver.to_string())),
];

fn short(value: &Option<ShortString>) -> Option<String> {
    value.as_ref().map(|v| v.as_str().to_owned())
}

/// Formats an AMQP timestamp (seconds since the epoch) with [`TIMESTAMP_FORMAT`].
pub fn format_timestamp(secs: u64) -> Option<String> {
    let secs = i64::try_from(secs).ok()?;
    DateTime::<Utc>::from_timestamp(secs, 0).map(|d| d.format(TIMESTAMP_FORMAT).to_string())
}

/// Parses a timestamp written in [`TIMESTAMP_FORMAT`], RFC 3339, or as plain epoch seconds.
pub fn parse_timestamp(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }

    DateTime::<FixedOffset>::parse_from_str(value, TIMESTAMP_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .and_then(|d| u64::try_from(d.timestamp()).ok())
}
