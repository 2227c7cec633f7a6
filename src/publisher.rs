// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! [`StandardMessageProducer`] owns one channel and publishes each message to a queue
//! through the configured exchange. The queue may be an expression such as
//! `%message{target}`, in which case it is resolved and declared for every message;
//! a fixed queue is declared once when the producer starts.
//!
//! The current OpenTelemetry context is injected into the headers whenever the
//! message carries properties.

use crate::{
    channel::{AmqpChannel, PublishConfirmation},
    connection::ConnectionWrapper,
    errors::AmqpError,
    exchange::{DefaultExchange, ExchangeDeclaration},
    lifecycle::Component,
    message::{self, Message},
    metadata::QUEUE_PUBLISH_STATUS,
    otel,
    properties::{NoProperties, PropertiesBuilder},
    queue::{DefaultQueue, QueueDeclaration},
};
use async_trait::async_trait;
use opentelemetry::Context;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Value written to `queue_publish_status` after a successful publish.
pub const PUBLISH_SUCCESS: &str = "success";

/// What happens when a publish fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishBehaviour {
    /// Failures are returned to the caller.
    #[default]
    Traditional,
    /// The channel waits for broker confirms. The outcome is written to
    /// `queue_publish_status` and failures are not returned.
    NoException,
}

struct ProducerChannel {
    channel: Arc<dyn AmqpChannel>,
    declare_per_message: bool,
}

pub struct StandardMessageProducer {
    queue: String,
    connection: Arc<dyn ConnectionWrapper>,
    property_builder: Arc<dyn PropertiesBuilder>,
    exchange_declaration: Arc<dyn ExchangeDeclaration>,
    queue_declaration: Arc<dyn QueueDeclaration>,
    behaviour: PublishBehaviour,
    // a channel must not be used concurrently
    state: Mutex<Option<ProducerChannel>>,
}

impl StandardMessageProducer {
    /// Publishes through the default exchange without properties, declaring the
    /// queue durable, non-exclusive and not auto-deleted.
    pub fn new(connection: Arc<dyn ConnectionWrapper>, queue: &str) -> StandardMessageProducer {
        StandardMessageProducer {
            queue: queue.to_owned(),
            connection,
            property_builder: Arc::new(NoProperties),
            exchange_declaration: Arc::new(DefaultExchange),
            queue_declaration: Arc::new(DefaultQueue),
            behaviour: PublishBehaviour::Traditional,
            state: Mutex::new(None),
        }
    }

    /// Publishes to the default exchange with the given properties and reports the
    /// outcome in `queue_publish_status` instead of failing.
    pub fn default_exchange(
        connection: Arc<dyn ConnectionWrapper>,
        queue: &str,
        property_builder: Arc<dyn PropertiesBuilder>,
    ) -> StandardMessageProducer {
        StandardMessageProducer::new(connection, queue)
            .with_property_builder(property_builder)
            .with_behaviour(PublishBehaviour::NoException)
    }

    pub fn with_property_builder(mut self, builder: Arc<dyn PropertiesBuilder>) -> Self {
        self.property_builder = builder;
        self
    }

    pub fn with_exchange_declaration(mut self, declaration: Arc<dyn ExchangeDeclaration>) -> Self {
        self.exchange_declaration = declaration;
        self
    }

    pub fn with_queue_declaration(mut self, declaration: Arc<dyn QueueDeclaration>) -> Self {
        self.queue_declaration = declaration;
        self
    }

    pub fn with_behaviour(mut self, behaviour: PublishBehaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Publishes `msg` within the current trace context.
    pub async fn produce(&self, msg: &mut Message) -> Result<(), AmqpError> {
        self.produce_with_context(&Context::current(), msg).await
    }

    /// Publishes `msg`, propagating `ctx` in the headers.
    pub async fn produce_with_context(
        &self,
        ctx: &Context,
        msg: &mut Message,
    ) -> Result<(), AmqpError> {
        let result = self.publish(ctx, msg).await;

        match self.behaviour {
            PublishBehaviour::Traditional => result,
            PublishBehaviour::NoException => {
                match result {
                    Ok(_) => msg.add_metadata(QUEUE_PUBLISH_STATUS, PUBLISH_SUCCESS),
                    Err(err) => {
                        warn!(error = err.to_string(), "publish failed");
                        msg.add_metadata(QUEUE_PUBLISH_STATUS, err.to_string());
                    }
                }
                Ok(())
            }
        }
    }

    async fn publish(&self, ctx: &Context, msg: &Message) -> Result<(), AmqpError> {
        let guard = self.state.lock().await;
        let Some(state) = guard.as_ref() else {
            return Err(AmqpError::PublishingError(
                "producer is not started".to_owned(),
            ));
        };

        let endpoint = msg.resolve(&self.queue)?;
        if state.declare_per_message {
            self.queue_declaration
                .declare(state.channel.as_ref(), &endpoint)
                .await?;
        }

        let properties = self
            .property_builder
            .build(msg)?
            .map(|props| otel::inject_context(ctx, props));

        let confirmation = state
            .channel
            .basic_publish(
                self.exchange_declaration.name(),
                &endpoint,
                msg.payload(),
                properties,
            )
            .await?;

        if confirmation == PublishConfirmation::Nack {
            error!(queue = endpoint.as_str(), "broker refused the message");
            return Err(AmqpError::PublishingError(format!(
                "message to `{endpoint}` was nacked"
            )));
        }

        debug!(queue = endpoint.as_str(), id = msg.unique_id(), "message published");
        Ok(())
    }

    async fn open(&self) -> Result<ProducerChannel, AmqpError> {
        let channel = self
            .connection
            .wrapped_connection()
            .await?
            .create_channel()
            .await?;

        match self.declare(channel.as_ref()).await {
            Ok(declare_per_message) => Ok(ProducerChannel {
                channel,
                declare_per_message,
            }),
            Err(err) => {
                close_quietly(channel.as_ref()).await;
                Err(err)
            }
        }
    }

    /// Returns whether the queue has to be declared for every message.
    async fn declare(&self, channel: &dyn AmqpChannel) -> Result<bool, AmqpError> {
        if self.behaviour == PublishBehaviour::NoException {
            channel.confirm_select().await?;
        }

        self.exchange_declaration.declare(channel).await?;

        if message::is_expression(&self.queue) {
            return Ok(true);
        }
        self.queue_declaration.declare(channel, &self.queue).await?;
        Ok(false)
    }
}

#[async_trait]
impl Component for StandardMessageProducer {
    fn name(&self) -> String {
        format!("producer:{}", self.queue)
    }

    async fn prepare(&self) -> Result<(), AmqpError> {
        if self.queue.trim().is_empty() {
            return Err(AmqpError::ConfigurationError(
                "queue may not be blank".to_owned(),
            ));
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.take() {
            close_quietly(previous.channel.as_ref()).await;
        }

        *state = Some(self.open().await?);
        debug!(queue = self.queue.as_str(), "producer started");
        Ok(())
    }

    async fn stop(&self) {
        if let Some(previous) = self.state.lock().await.take() {
            close_quietly(previous.channel.as_ref()).await;
            debug!(queue = self.queue.as_str(), "producer stopped");
        }
    }
}

async fn close_quietly(channel: &dyn AmqpChannel) {
    if let Err(err) = channel.close().await {
        debug!(error = err.to_string(), "ignoring error closing channel");
    }
}
