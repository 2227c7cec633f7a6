// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Translation
//!
//! Turns an inbound RabbitMQ delivery into a generic [`Message`]. The body always
//! becomes the payload; the `BasicProperties` and the envelope are optional and are
//! each handed to a pluggable handler that decides what (if anything) becomes
//! metadata.

use crate::{
    message::{Message, MessageFactory},
    metadata::{ENVELOPE_MAP, PROPERTY_MAP},
};
use lapin::{types::AMQPValue, BasicProperties};
use serde::Deserialize;

/// Per-delivery routing information, distinct from the message properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub delivery_tag: u64,
    pub redeliver: bool,
    pub exchange: Option<String>,
    pub routing_key: Option<String>,
}

impl Envelope {
    pub fn new(
        delivery_tag: u64,
        redeliver: bool,
        exchange: Option<&str>,
        routing_key: Option<&str>,
    ) -> Envelope {
        Envelope {
            delivery_tag,
            redeliver,
            exchange: exchange.map(str::to_owned),
            routing_key: routing_key.map(str::to_owned),
        }
    }
}

/// An inbound message as received from the broker.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub body: Vec<u8>,
    pub properties: Option<BasicProperties>,
    pub envelope: Option<Envelope>,
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_owned());

        Delivery {
            envelope: Some(Envelope {
                delivery_tag: delivery.delivery_tag,
                redeliver: delivery.redelivered,
                exchange: non_empty(delivery.exchange.as_str()),
                routing_key: non_empty(delivery.routing_key.as_str()),
            }),
            properties: Some(delivery.properties),
            body: delivery.data,
        }
    }
}

/// Transfers the contents of the delivery's `BasicProperties` into the message.
pub trait PropertiesHandler: Send + Sync {
    fn handle(&self, properties: &BasicProperties, msg: &mut Message);
}

/// Transfers the contents of the delivery's envelope into the message.
pub trait EnvelopeHandler: Send + Sync {
    fn handle(&self, envelope: &Envelope, msg: &mut Message);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreProperties;

impl PropertiesHandler for IgnoreProperties {
    fn handle(&self, _properties: &BasicProperties, _msg: &mut Message) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreEnvelope;

impl EnvelopeHandler for IgnoreEnvelope {
    fn handle(&self, _envelope: &Envelope, _msg: &mut Message) {}
}

/// Writes every populated standard property under its `rmq*` key, then copies the
/// headers, optionally prefixed.
///
/// The prefix only applies to header derived keys; the standard properties always
/// use the keys from [`crate::metadata`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PropertiesToMetadata {
    #[serde(default)]
    pub prefix: String,
}

impl PropertiesToMetadata {
    pub fn with_prefix(prefix: &str) -> Self {
        PropertiesToMetadata {
            prefix: prefix.to_owned(),
        }
    }
}

impl PropertiesHandler for PropertiesToMetadata {
    fn handle(&self, properties: &BasicProperties, msg: &mut Message) {
        for (key, accessor) in PROPERTY_MAP {
            if let Some(value) = accessor(properties) {
                msg.add_metadata(*key, value);
            }
        }

        if let Some(headers) = properties.headers() {
            for (key, value) in headers.inner() {
                msg.add_metadata(
                    format!("{}{}", self.prefix, key.as_str()),
                    header_value_to_string(value),
                );
            }
        }
    }
}

/// Writes delivery tag, redelivery flag, exchange and routing key. Absent values
/// are skipped rather than written as empty strings.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EnvelopeToMetadata;

impl EnvelopeHandler for EnvelopeToMetadata {
    fn handle(&self, envelope: &Envelope, msg: &mut Message) {
        for (key, accessor) in ENVELOPE_MAP {
            if let Some(value) = accessor(envelope) {
                msg.add_metadata(*key, value);
            }
        }
    }
}

/// Renders an AMQP header value the way a human would write it in metadata.
pub fn header_value_to_string(value: &AMQPValue) -> String {
    match value {
        AMQPValue::LongString(v) => String::from_utf8_lossy(v.as_bytes()).into_owned(),
        AMQPValue::ShortString(v) => v.as_str().to_owned(),
        AMQPValue::Boolean(v) => v.to_string(),
        AMQPValue::ShortShortInt(v) => v.to_string(),
        AMQPValue::ShortShortUInt(v) => v.to_string(),
        AMQPValue::ShortInt(v) => v.to_string(),
        AMQPValue::ShortUInt(v) => v.to_string(),
        AMQPValue::LongInt(v) => v.to_string(),
        AMQPValue::LongUInt(v) => v.to_string(),
        AMQPValue::LongLongInt(v) => v.to_string(),
        AMQPValue::Float(v) => v.to_string(),
        AMQPValue::Double(v) => v.to_string(),
        AMQPValue::Timestamp(v) => v.to_string(),
        AMQPValue::Void => String::new(),
        other => format!("{other:?}"),
    }
}

pub struct Translator;

impl Translator {
    /// Creates a message from an inbound delivery.
    ///
    /// Handlers are only invoked for the sections the delivery actually carries.
    pub fn build(
        delivery: &Delivery,
        properties_handler: &dyn PropertiesHandler,
        envelope_handler: &dyn EnvelopeHandler,
        factory: &dyn MessageFactory,
    ) -> Message {
        let mut msg = factory.new_message(&delivery.body);

        if let Some(properties) = &delivery.properties {
            properties_handler.handle(properties, &mut msg);
        }

        if let Some(envelope) = &delivery.envelope {
            envelope_handler.handle(envelope, &mut msg);
        }

        msg
    }
}
