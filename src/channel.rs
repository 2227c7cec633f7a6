// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! This module is the seam between the adapter and the broker client. Components only
//! see the [`ConnectionFactory`], [`AmqpConnection`] and [`AmqpChannel`] traits; the
//! lapin backed implementations live here as well.
//!
//! A channel is owned by exactly one consumer or producer. Connections are shared.

use crate::{
    errors::AmqpError,
    exception::{ExceptionHandler, Fault, FaultCategory},
    exchange::ExchangeKind,
    translator::Delivery,
};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
        QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    uri::AMQPUri,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Stream of inbound deliveries for one consumer.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Outcome of a publish as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishConfirmation {
    /// The channel is not in confirm mode.
    NotRequested,
    Ack,
    Nack,
}

/// A session multiplexed over a connection. Not shared between components.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError>;

    async fn queue_declare(
        &self,
        name: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
    ) -> Result<(), AmqpError>;

    /// Puts the channel in publisher confirm mode.
    async fn confirm_select(&self) -> Result<(), AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: Option<BasicProperties>,
    ) -> Result<PublishConfirmation, AmqpError>;

    /// Starts an auto-ack consumer on `queue`.
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A live transport connection.
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Opens transport connections. Produced by a
/// [`ConnectionFactoryBuilder`](crate::factory::ConnectionFactoryBuilder).
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn new_connection(&self, name: &str) -> Result<Arc<dyn AmqpConnection>, AmqpError>;
}

/// lapin implementation of [`ConnectionFactory`].
///
/// When an exception handler is present every connection it opens reports its
/// errors to that handler.
#[derive(Clone)]
pub struct LapinConnectionFactory {
    uri: AMQPUri,
    connection_name: Option<String>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
}

impl LapinConnectionFactory {
    pub fn new(uri: AMQPUri) -> Self {
        LapinConnectionFactory {
            uri,
            connection_name: None,
            exception_handler: None,
        }
    }

    /// Overrides the client provided connection name shown by the broker.
    pub fn with_connection_name(mut self, name: Option<String>) -> Self {
        self.connection_name = name;
        self
    }

    pub fn with_exception_handler(mut self, handler: Option<Arc<dyn ExceptionHandler>>) -> Self {
        self.exception_handler = handler;
        self
    }

    pub fn uri(&self) -> &AMQPUri {
        &self.uri
    }

    pub fn connection_name(&self) -> Option<&str> {
        self.connection_name.as_deref()
    }

    pub fn has_exception_handler(&self) -> bool {
        self.exception_handler.is_some()
    }
}

#[async_trait]
impl ConnectionFactory for LapinConnectionFactory {
    async fn new_connection(&self, name: &str) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        debug!("creating amqp connection...");
        let name = self.connection_name.as_deref().unwrap_or(name);
        let options =
            ConnectionProperties::default().with_connection_name(LongString::from(name.to_owned()));

        let conn = match Connection::connect_uri(self.uri.clone(), options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }?;
        debug!("amqp connected");

        if let Some(handler) = self.exception_handler.clone() {
            conn.on_error(move |err| {
                handler.handle_fault(Fault::new(
                    FaultCategory::UnexpectedConnectionDriver,
                    err.to_string(),
                ))
            });
        }

        Ok(Arc::new(LapinConnection {
            inner: conn,
            exception_handler: self.exception_handler.clone(),
        }))
    }
}

pub struct LapinConnection {
    inner: Connection,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.inner.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(Arc::new(LapinChannel {
                    inner: c,
                    exception_handler: self.exception_handler.clone(),
                }))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.inner
            .close(200, "OK")
            .await
            .map_err(|err| AmqpError::ConnectionError(err.to_string()))
    }
}

pub struct LapinChannel {
    inner: Channel,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", name);
        self.inner
            .exchange_declare(
                name,
                kind.into(),
                ExchangeDeclareOptions {
                    durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), name, "error to declare the exchange");
                AmqpError::DeclareExchangeError(name.to_owned())
            })
    }

    async fn queue_declare(
        &self,
        name: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
    ) -> Result<(), AmqpError> {
        debug!("creating queue: {}", name);
        match self
            .inner
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: false,
                    durable,
                    exclusive,
                    auto_delete,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(name.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn confirm_select(&self) -> Result<(), AmqpError> {
        self.inner
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|err| AmqpError::ChannelError(err.to_string()))
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: Option<BasicProperties>,
    ) -> Result<PublishConfirmation, AmqpError> {
        let confirm = self
            .inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties.unwrap_or_default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error publishing message");
                AmqpError::PublishingError(err.to_string())
            })?;

        let confirmation = confirm
            .await
            .map_err(|err| AmqpError::PublishingError(err.to_string()))?;

        Ok(if confirmation.is_ack() {
            PublishConfirmation::Ack
        } else if confirmation.is_nack() {
            PublishConfirmation::Nack
        } else {
            PublishConfirmation::NotRequested
        })
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: true,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to create the consumer");
                AmqpError::ConsumerError(err.to_string())
            })?;

        let handler = self.exception_handler.clone();
        Ok(consumer
            .map(move |result| {
                result.map(Delivery::from).map_err(|err| {
                    if let Some(handler) = &handler {
                        handler.handle_fault(Fault::new(FaultCategory::Consumer, err.to_string()));
                    }
                    AmqpError::ConsumerError(err.to_string())
                })
            })
            .boxed())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.inner
            .close(200, "OK")
            .await
            .map_err(|err| AmqpError::ChannelError(err.to_string()))
    }
}
