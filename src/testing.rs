// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Fakes shared by the unit tests of consumers and producers.

use crate::{
    channel::{AmqpChannel, AmqpConnection, ConnectionFactory, MockAmqpChannel},
    connection::ConnectionWrapper,
    errors::AmqpError,
    exception::ExceptionHandler,
    factory::{ConnectionFactoryBuilder, ExceptionHandlerSlot, SimpleConnectionFactoryBuilder},
    lifecycle::Component,
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::{
    any::Any,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// A connection that always hands out the same channel.
pub(crate) struct StaticConnection {
    channel: Arc<dyn AmqpChannel>,
}

#[async_trait]
impl AmqpConnection for StaticConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        Ok(self.channel.clone())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        Ok(())
    }
}

/// A wrapper that is always connected, or never when built with `disconnected`.
pub(crate) struct StaticWrapper {
    connection: Option<Arc<dyn AmqpConnection>>,
    builder: Arc<dyn ConnectionFactoryBuilder>,
}

impl StaticWrapper {
    pub(crate) fn new(channel: impl AmqpChannel + 'static) -> Arc<StaticWrapper> {
        Arc::new(StaticWrapper {
            connection: Some(Arc::new(StaticConnection {
                channel: Arc::new(channel),
            })),
            builder: Arc::new(SimpleConnectionFactoryBuilder::new("amqp://localhost")),
        })
    }

    pub(crate) fn disconnected() -> Arc<StaticWrapper> {
        Arc::new(StaticWrapper {
            connection: None,
            builder: Arc::new(SimpleConnectionFactoryBuilder::new("amqp://localhost")),
        })
    }
}

#[async_trait]
impl ConnectionWrapper for StaticWrapper {
    fn unique_id(&self) -> &str {
        "static"
    }

    async fn init(&self) -> Result<(), AmqpError> {
        Ok(())
    }

    async fn wrapped_connection(&self) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        self.connection.clone().ok_or(AmqpError::NotConnectedError)
    }

    async fn close(&self) {}

    fn connection_factory_builder(&self) -> Arc<dyn ConnectionFactoryBuilder> {
        self.builder.clone()
    }

    fn attach(&self, _component: &Arc<dyn Component>) {}

    async fn restart(&self) -> Result<(), AmqpError> {
        Ok(())
    }
}

/// Builds connections that hand out a fresh permissive channel on every request
/// and count how many were opened.
#[derive(Default)]
pub(crate) struct CountingBuilder {
    pub(crate) channels: Arc<AtomicUsize>,
    handler: ExceptionHandlerSlot,
}

struct CountingConnection {
    channels: Arc<AtomicUsize>,
}

#[async_trait]
impl AmqpConnection for CountingConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        self.channels.fetch_add(1, Ordering::SeqCst);
        let mut channel = MockAmqpChannel::new();
        channel.expect_exchange_declare().returning(|_, _, _| Ok(()));
        channel.expect_queue_declare().returning(|_, _, _, _| Ok(()));
        channel.expect_confirm_select().returning(|| Ok(()));
        channel
            .expect_basic_consume()
            .returning(|_, _| Ok(stream::pending().boxed()));
        channel.expect_close().returning(|| Ok(()));
        Ok(Arc::new(channel))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        Ok(())
    }
}

#[async_trait]
impl ConnectionFactory for CountingBuilder {
    async fn new_connection(&self, _name: &str) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        Ok(Arc::new(CountingConnection {
            channels: self.channels.clone(),
        }))
    }
}

impl ConnectionFactoryBuilder for CountingBuilder {
    fn build(&self) -> Result<Arc<dyn ConnectionFactory>, AmqpError> {
        Ok(Arc::new(CountingBuilder {
            channels: self.channels.clone(),
            handler: ExceptionHandlerSlot::default(),
        }))
    }

    fn broker_url(&self) -> &str {
        "amqp://localhost"
    }

    fn set_exception_handler(&self, handler: Arc<dyn ExceptionHandler>) {
        self.handler.set(handler)
    }

    fn exception_handler(&self) -> Option<Arc<dyn ExceptionHandler>> {
        self.handler.get()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
