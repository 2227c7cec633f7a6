// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! [`BasicConsumer`] owns one channel on a shared connection and consumes a single
//! queue with automatic acknowledgement. Every delivery is translated into a
//! [`Message`], tagged with the consumer tag and the queue name, and handed to a
//! [`MessageListener`] inside a consumer span carrying the producer's trace context.

use crate::{
    channel::{AmqpChannel, DeliveryStream},
    connection::ConnectionWrapper,
    errors::AmqpError,
    lifecycle::Component,
    message::{DefaultMessageFactory, Message, MessageFactory},
    metadata::{RMQ_CONSUMER_TAG, RMQ_QUEUE},
    otel::{self, TRACER_NAME},
    queue::{DefaultQueue, QueueDeclaration},
    translator::{
        Delivery, EnvelopeHandler, IgnoreEnvelope, IgnoreProperties, PropertiesHandler,
        Translator,
    },
};
use async_trait::async_trait;
use futures_util::StreamExt;
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
    Context,
};
use std::{borrow::Cow, sync::Arc};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error};
use uuid::Uuid;

/// Receives the messages produced by a consumer.
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// `ctx` carries the trace context of the delivery.
    async fn on_message(&self, ctx: &Context, msg: Message) -> Result<(), AmqpError>;
}

struct Running {
    channel: Arc<dyn AmqpChannel>,
    task: JoinHandle<()>,
}

/// Consumes a queue, declaring it durable, non-exclusive and not auto-deleted.
pub struct BasicConsumer {
    queue: String,
    connection: Arc<dyn ConnectionWrapper>,
    properties_handler: Arc<dyn PropertiesHandler>,
    envelope_handler: Arc<dyn EnvelopeHandler>,
    message_factory: Arc<dyn MessageFactory>,
    listener: Arc<dyn MessageListener>,
    running: Mutex<Option<Running>>,
}

impl BasicConsumer {
    /// Properties and envelope are ignored unless handlers are configured.
    pub fn new(
        connection: Arc<dyn ConnectionWrapper>,
        queue: &str,
        listener: Arc<dyn MessageListener>,
    ) -> BasicConsumer {
        BasicConsumer {
            queue: queue.to_owned(),
            connection,
            properties_handler: Arc::new(IgnoreProperties),
            envelope_handler: Arc::new(IgnoreEnvelope),
            message_factory: Arc::new(DefaultMessageFactory),
            listener,
            running: Mutex::new(None),
        }
    }

    pub fn with_properties_handler(mut self, handler: Arc<dyn PropertiesHandler>) -> Self {
        self.properties_handler = handler;
        self
    }

    pub fn with_envelope_handler(mut self, handler: Arc<dyn EnvelopeHandler>) -> Self {
        self.envelope_handler = handler;
        self
    }

    pub fn with_message_factory(mut self, factory: Arc<dyn MessageFactory>) -> Self {
        self.message_factory = factory;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    async fn open(&self) -> Result<Running, AmqpError> {
        let channel = self
            .connection
            .wrapped_connection()
            .await?
            .create_channel()
            .await?;

        let consumer_tag = Uuid::new_v4().to_string();
        let stream = match self.declare_and_consume(channel.as_ref(), &consumer_tag).await {
            Ok(stream) => stream,
            Err(err) => {
                close_quietly(channel.as_ref()).await;
                return Err(err);
            }
        };

        let dispatcher = Dispatcher {
            queue: self.queue.clone(),
            consumer_tag,
            properties_handler: self.properties_handler.clone(),
            envelope_handler: self.envelope_handler.clone(),
            message_factory: self.message_factory.clone(),
            listener: self.listener.clone(),
            tracer: global::tracer(TRACER_NAME),
        };

        let task = tokio::spawn(dispatcher.run(stream));
        Ok(Running { channel, task })
    }

    async fn declare_and_consume(
        &self,
        channel: &dyn AmqpChannel,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, AmqpError> {
        DefaultQueue.declare(channel, &self.queue).await?;
        channel.basic_consume(&self.queue, consumer_tag).await
    }
}

#[async_trait]
impl Component for BasicConsumer {
    fn name(&self) -> String {
        format!("consumer:{}", self.queue)
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
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            previous.shutdown().await;
        }

        *running = Some(self.open().await?);
        debug!(queue = self.queue.as_str(), "consumer started");
        Ok(())
    }

    async fn stop(&self) {
        if let Some(running) = self.running.lock().await.take() {
            running.shutdown().await;
            debug!(queue = self.queue.as_str(), "consumer stopped");
        }
    }
}

impl Running {
    async fn shutdown(self) {
        self.task.abort();
        close_quietly(self.channel.as_ref()).await;
    }
}

async fn close_quietly(channel: &dyn AmqpChannel) {
    if let Err(err) = channel.close().await {
        debug!(error = err.to_string(), "ignoring error closing channel");
    }
}

/// Everything the delivery loop needs, detached from the consumer.
struct Dispatcher {
    queue: String,
    consumer_tag: String,
    properties_handler: Arc<dyn PropertiesHandler>,
    envelope_handler: Arc<dyn EnvelopeHandler>,
    message_factory: Arc<dyn MessageFactory>,
    listener: Arc<dyn MessageListener>,
    tracer: BoxedTracer,
}

impl Dispatcher {
    async fn run(self, mut stream: DeliveryStream) {
        while let Some(result) = stream.next().await {
            match result {
                Ok(delivery) => self.dispatch(delivery).await,
                // already reported to the exception handler by the transport
                Err(err) => error!(error = err.to_string(), "error receiving delivery"),
            }
        }
        debug!(queue = self.queue.as_str(), "delivery stream closed");
    }

    async fn dispatch(&self, delivery: Delivery) {
        let mut msg = Translator::build(
            &delivery,
            self.properties_handler.as_ref(),
            self.envelope_handler.as_ref(),
            self.message_factory.as_ref(),
        );
        msg.add_metadata(RMQ_CONSUMER_TAG, self.consumer_tag.as_str());
        msg.add_metadata(RMQ_QUEUE, self.queue.as_str());

        let (ctx, mut span) =
            otel::new_span(delivery.properties.as_ref(), &self.tracer, &self.queue);

        debug!(
            queue = self.queue.as_str(),
            id = msg.unique_id(),
            "received message"
        );

        match self.listener.on_message(&ctx, msg).await {
            Ok(_) => span.set_status(Status::Ok),
            Err(err) => {
                error!(error = err.to_string(), "listener failed to handle message");
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("listener failure"),
                });
            }
        }
        span.end();
    }
}
