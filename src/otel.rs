// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration for RabbitMQ
//!
//! Trace context travels in the AMQP headers. Producers inject the current context
//! into the properties they publish, consumers extract it and open a consumer span
//! for every delivery.

use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::error;

/// Name of the tracer used for consumer spans.
pub const TRACER_NAME: &str = "rabbitmq-adapter";

/// An adapter for injecting and extracting OpenTelemetry context from RabbitMQ headers.
pub(crate) struct RabbitMQTracePropagator<'a> {
    headers: &'a mut BTreeMap<ShortString, AMQPValue>,
}

impl<'a> RabbitMQTracePropagator<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Injector for RabbitMQTracePropagator<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(
            key.to_lowercase().into(),
            AMQPValue::LongString(value.into()),
        );
    }
}

impl Extractor for RabbitMQTracePropagator<'_> {
    /// Only long string headers can carry context.
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|header_value| {
            if let AMQPValue::LongString(header_value) = header_value {
                std::str::from_utf8(header_value.as_bytes())
                    .map_err(|e| error!("Error decoding header value {:?}", e))
                    .ok()
            } else {
                None
            }
        })
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|header| header.as_str()).collect()
    }
}

/// Writes the trace context of `ctx` into the headers of `props`, keeping
/// any headers already present.
pub fn inject_context(ctx: &Context, props: BasicProperties) -> BasicProperties {
    let mut headers = props
        .headers()
        .as_ref()
        .map(|h| h.inner().clone())
        .unwrap_or_default();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut RabbitMQTracePropagator::new(&mut headers))
    });

    props.with_headers(FieldTable::from(headers))
}

/// Extracts the trace context carried by `props`, if any, and starts a consumer
/// span named `name` as its child.
pub fn new_span(
    props: Option<&BasicProperties>,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let mut headers = props
        .and_then(|p| p.headers().as_ref())
        .map(|h| h.inner().clone())
        .unwrap_or_default();

    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&RabbitMQTracePropagator::new(&mut headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inject_keeps_existing_headers() {
        let mut headers = BTreeMap::new();
        headers.insert(
            ShortString::from("MY_KEY"),
            AMQPValue::LongString("MY_VALUE".into()),
        );
        let props = BasicProperties::default().with_headers(FieldTable::from(headers));

        let props = inject_context(&Context::new(), props);
        let headers = props.headers().clone().unwrap_or_default();
        assert!(headers.inner().contains_key("MY_KEY"));
    }

    #[test]
    fn propagator_sets_lowercase_long_strings() {
        let mut headers = BTreeMap::new();
        RabbitMQTracePropagator::new(&mut headers).set("TraceParent", "00-abc".to_owned());

        let propagator = RabbitMQTracePropagator::new(&mut headers);
        assert_eq!(propagator.get("traceparent"), Some("00-abc"));
        assert_eq!(propagator.keys(), vec!["traceparent"]);
    }

    #[test]
    fn non_string_headers_are_not_extracted() {
        let mut headers = BTreeMap::new();
        headers.insert(ShortString::from("traceparent"), AMQPValue::LongLongInt(1));
        let propagator = RabbitMQTracePropagator::new(&mut headers);
        assert_eq!(propagator.get("traceparent"), None);
    }
}
