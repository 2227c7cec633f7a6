// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration
//!
//! Deserializable descriptions of connections, consumers and producers. Every
//! pluggable strategy is selected with a `type` tag; omitted strategies fall back to
//! the same defaults as the programmatic constructors.
//!
//! ```json
//! {
//!   "queue": "%message{target}",
//!   "properties": { "type": "standard", "filter": { "type": "include", "prefixes": ["x-"] } },
//!   "exchange": { "type": "explicit", "name": "orders", "exchange-type": "topic" },
//!   "behaviour": "no-exception"
//! }
//! ```

use crate::{
    connection::{register, ConnectionWrapper, RabbitMqConnection},
    consumer::{BasicConsumer, MessageListener},
    exchange::{DefaultExchange, ExchangeDeclaration, ExplicitExchange},
    factory::{
        AdvancedConnectionFactoryBuilder, BasicConnectionFactoryBuilder, ConnectionFactoryBuilder,
        SimpleConnectionFactoryBuilder,
    },
    message::{IncludeMetadataFilter, MetadataFilter, NoOpMetadataFilter, RemoveAllMetadataFilter},
    properties::{
        ConfiguredPropertiesBuilderFactory, MetadataToProperties, NoProperties,
        PropertiesBuilder, StandardPropertiesBuilderFactory,
    },
    publisher::{PublishBehaviour, StandardMessageProducer},
    queue::{DefaultQueue, ExplicitQueue, QueueDeclaration},
    translator::{
        EnvelopeHandler, EnvelopeToMetadata, IgnoreEnvelope, IgnoreProperties, PropertiesHandler,
        PropertiesToMetadata,
    },
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FactoryBuilderConfig {
    Simple(SimpleConnectionFactoryBuilder),
    Basic(BasicConnectionFactoryBuilder),
    Advanced(AdvancedConnectionFactoryBuilder),
}

impl FactoryBuilderConfig {
    pub fn into_builder(self) -> Arc<dyn ConnectionFactoryBuilder> {
        match self {
            FactoryBuilderConfig::Simple(b) => Arc::new(b),
            FactoryBuilderConfig::Basic(b) => Arc::new(b),
            FactoryBuilderConfig::Advanced(b) => Arc::new(b),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectionConfig {
    /// Also used as the client provided connection name. Random when unset.
    #[serde(default)]
    pub unique_id: Option<String>,
    pub factory: FactoryBuilderConfig,
}

impl ConnectionConfig {
    pub fn into_connection(self) -> Arc<RabbitMqConnection> {
        let builder = self.factory.into_builder();
        match self.unique_id {
            Some(id) => RabbitMqConnection::with_id(&id, builder),
            None => RabbitMqConnection::new(builder),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MetadataFilterConfig {
    #[default]
    RemoveAll,
    NoOp,
    Include(IncludeMetadataFilter),
}

impl MetadataFilterConfig {
    pub fn into_filter(self) -> Arc<dyn MetadataFilter> {
        match self {
            MetadataFilterConfig::RemoveAll => Arc::new(RemoveAllMetadataFilter),
            MetadataFilterConfig::NoOp => Arc::new(NoOpMetadataFilter),
            MetadataFilterConfig::Include(f) => Arc::new(f),
        }
    }
}

/// Outbound properties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PropertiesBuilderConfig {
    /// No properties; the broker client applies its defaults.
    #[default]
    None,
    /// Filtered metadata as headers only.
    Headers {
        #[serde(default)]
        filter: MetadataFilterConfig,
    },
    /// Filtered metadata as headers, standard fields from the `rmq*` metadata keys.
    Standard {
        #[serde(default)]
        filter: MetadataFilterConfig,
    },
    /// Filtered metadata as headers, standard fields from per-field expressions.
    Configured {
        #[serde(default)]
        filter: MetadataFilterConfig,
        #[serde(default)]
        properties: ConfiguredPropertiesBuilderFactory,
    },
}

impl PropertiesBuilderConfig {
    pub fn into_builder(self) -> Arc<dyn PropertiesBuilder> {
        match self {
            PropertiesBuilderConfig::None => Arc::new(NoProperties),
            PropertiesBuilderConfig::Headers { filter } => {
                Arc::new(MetadataToProperties::new().with_filter(filter.into_filter()))
            }
            PropertiesBuilderConfig::Standard { filter } => Arc::new(
                MetadataToProperties::new()
                    .with_filter(filter.into_filter())
                    .with_builder(Arc::new(StandardPropertiesBuilderFactory)),
            ),
            PropertiesBuilderConfig::Configured { filter, properties } => Arc::new(
                MetadataToProperties::new()
                    .with_filter(filter.into_filter())
                    .with_builder(Arc::new(properties)),
            ),
        }
    }
}

/// Inbound properties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PropertiesHandlerConfig {
    #[default]
    Ignore,
    ToMetadata(PropertiesToMetadata),
}

impl PropertiesHandlerConfig {
    pub fn into_handler(self) -> Arc<dyn PropertiesHandler> {
        match self {
            PropertiesHandlerConfig::Ignore => Arc::new(IgnoreProperties),
            PropertiesHandlerConfig::ToMetadata(h) => Arc::new(h),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EnvelopeHandlerConfig {
    #[default]
    Ignore,
    ToMetadata,
}

impl EnvelopeHandlerConfig {
    pub fn into_handler(self) -> Arc<dyn EnvelopeHandler> {
        match self {
            EnvelopeHandlerConfig::Ignore => Arc::new(IgnoreEnvelope),
            EnvelopeHandlerConfig::ToMetadata => Arc::new(EnvelopeToMetadata),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExchangeDeclarationConfig {
    #[default]
    Default,
    Explicit(ExplicitExchange),
}

impl ExchangeDeclarationConfig {
    pub fn into_declaration(self) -> Arc<dyn ExchangeDeclaration> {
        match self {
            ExchangeDeclarationConfig::Default => Arc::new(DefaultExchange),
            ExchangeDeclarationConfig::Explicit(e) => Arc::new(e),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum QueueDeclarationConfig {
    #[default]
    Default,
    Explicit(ExplicitQueue),
}

impl QueueDeclarationConfig {
    pub fn into_declaration(self) -> Arc<dyn QueueDeclaration> {
        match self {
            QueueDeclarationConfig::Default => Arc::new(DefaultQueue),
            QueueDeclarationConfig::Explicit(q) => Arc::new(q),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConsumerConfig {
    pub queue: String,
    #[serde(default)]
    pub properties_handler: PropertiesHandlerConfig,
    #[serde(default)]
    pub envelope_handler: EnvelopeHandlerConfig,
}

impl ConsumerConfig {
    /// Builds the consumer and attaches it to `connection` for restarts.
    pub fn into_consumer(
        self,
        connection: Arc<dyn ConnectionWrapper>,
        listener: Arc<dyn MessageListener>,
    ) -> Arc<BasicConsumer> {
        let consumer = BasicConsumer::new(connection.clone(), &self.queue, listener)
            .with_properties_handler(self.properties_handler.into_handler())
            .with_envelope_handler(self.envelope_handler.into_handler());
        register(connection.as_ref(), consumer)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProducerConfig {
    /// May contain `%message{key}` expressions.
    pub queue: String,
    #[serde(default)]
    pub properties: PropertiesBuilderConfig,
    #[serde(default)]
    pub exchange: ExchangeDeclarationConfig,
    #[serde(default)]
    pub queue_declaration: QueueDeclarationConfig,
    #[serde(default)]
    pub behaviour: PublishBehaviour,
}

impl ProducerConfig {
    /// Builds the producer and attaches it to `connection` for restarts.
    pub fn into_producer(
        self,
        connection: Arc<dyn ConnectionWrapper>,
    ) -> Arc<StandardMessageProducer> {
        let producer = StandardMessageProducer::new(connection.clone(), &self.queue)
            .with_property_builder(self.properties.into_builder())
            .with_exchange_declaration(self.exchange.into_declaration())
            .with_queue_declaration(self.queue_declaration.into_declaration())
            .with_behaviour(self.behaviour);
        register(connection.as_ref(), producer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lifecycle::Component, message::Message, properties::header, testing::CountingBuilder,
    };
    use std::sync::atomic::Ordering;

    #[test]
    fn connection_from_json() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{
                "unique-id": "billing",
                "factory": {
                    "type": "basic",
                    "broker-url": "amqp://localhost:5672/%2f",
                    "username": "guest",
                    "password": "guest"
                }
            }"#,
        )
        .unwrap();

        let connection = config.into_connection();
        assert_eq!(connection.unique_id(), "billing");
        assert_eq!(connection.connection_factory_builder().username(), Some("guest"));
        assert!(connection.connection_factory_builder().build().is_ok());
    }

    #[test]
    fn advanced_factory_from_json() {
        let config: FactoryBuilderConfig = serde_json::from_str(
            r#"{
                "type": "advanced",
                "broker-url": "amqp://localhost",
                "properties": [{ "key": "heartbeat", "value": "15" }]
            }"#,
        )
        .unwrap();
        assert!(matches!(config, FactoryBuilderConfig::Advanced(_)));
        assert!(config.into_builder().build().is_ok());
    }

    #[test]
    fn producer_defaults() {
        let config: ProducerConfig = serde_json::from_str(r#"{"queue":"orders"}"#).unwrap();
        assert!(matches!(config.properties, PropertiesBuilderConfig::None));
        assert!(matches!(config.exchange, ExchangeDeclarationConfig::Default));
        assert!(matches!(
            config.queue_declaration,
            QueueDeclarationConfig::Default
        ));
        assert_eq!(config.behaviour, PublishBehaviour::Traditional);
    }

    #[test]
    fn producer_strategies() {
        let config: ProducerConfig = serde_json::from_str(
            r#"{
                "queue": "%message{target}",
                "properties": {
                    "type": "configured",
                    "filter": { "type": "include", "keys": ["tenant"] },
                    "properties": { "app-id": "billing", "correlation-id": "%message{id}" }
                },
                "exchange": { "type": "explicit", "name": "orders", "exchange-type": "topic" },
                "queue-declaration": { "type": "explicit", "durable": false },
                "behaviour": "no-exception"
            }"#,
        )
        .unwrap();
        assert_eq!(config.behaviour, PublishBehaviour::NoException);
        assert!(matches!(
            &config.exchange,
            ExchangeDeclarationConfig::Explicit(e)
                if e.name == "orders" && e.kind == crate::exchange::ExchangeKind::Topic
        ));
        assert!(matches!(
            &config.queue_declaration,
            QueueDeclarationConfig::Explicit(q) if q.durable == Some(false)
        ));

        let mut msg = Message::new("hello");
        msg.add_metadata("tenant", "acme");
        msg.add_metadata("id", "42");
        msg.add_metadata("other", "dropped");

        let props = config.properties.into_builder().build(&msg).unwrap().unwrap();
        assert_eq!(header(&props, "tenant").as_deref(), Some("acme"));
        assert_eq!(header(&props, "other"), None);
        assert_eq!(props.correlation_id().as_ref().map(|v| v.as_str()), Some("42"));
    }

    #[test]
    fn consumer_handlers() {
        let config: ConsumerConfig = serde_json::from_str(
            r#"{
                "queue": "orders",
                "properties-handler": { "type": "to-metadata", "prefix": "h_" },
                "envelope-handler": { "type": "to-metadata" }
            }"#,
        )
        .unwrap();
        assert!(matches!(
            &config.properties_handler,
            PropertiesHandlerConfig::ToMetadata(h) if h.prefix == "h_"
        ));
        assert!(matches!(
            config.envelope_handler,
            EnvelopeHandlerConfig::ToMetadata
        ));
    }

    #[tokio::test]
    async fn configured_producer_reopens_its_channel_on_restart() {
        let builder = CountingBuilder::default();
        let channels = builder.channels.clone();
        let connection: Arc<dyn ConnectionWrapper> = RabbitMqConnection::new(Arc::new(builder));
        connection.init().await.unwrap();

        let config: ProducerConfig =
            serde_json::from_str(r#"{"queue":"orders","behaviour":"no-exception"}"#).unwrap();
        let producer = config.into_producer(connection.clone());
        producer.start().await.unwrap();
        assert_eq!(channels.load(Ordering::SeqCst), 1);

        connection.restart().await.unwrap();
        assert_eq!(channels.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn configured_consumer_is_attached() {
        struct Ignore;

        #[async_trait::async_trait]
        impl MessageListener for Ignore {
            async fn on_message(
                &self,
                _ctx: &opentelemetry::Context,
                _msg: Message,
            ) -> Result<(), crate::errors::AmqpError> {
                Ok(())
            }
        }

        let builder = CountingBuilder::default();
        let channels = builder.channels.clone();
        let connection: Arc<dyn ConnectionWrapper> = RabbitMqConnection::new(Arc::new(builder));
        connection.init().await.unwrap();

        let config: ConsumerConfig = serde_json::from_str(r#"{"queue":"orders"}"#).unwrap();
        let consumer = config.into_consumer(connection.clone(), Arc::new(Ignore));
        consumer.start().await.unwrap();
        assert_eq!(channels.load(Ordering::SeqCst), 1);

        connection.restart().await.unwrap();
        assert_eq!(channels.load(Ordering::SeqCst), 2);
        assert!(consumer.is_running().await);
        consumer.stop().await;
    }
}
