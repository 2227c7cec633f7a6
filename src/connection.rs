// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Connection
//!
//! [`RabbitMqConnection`] owns one live transport connection at a time. Consumers and
//! producers borrow it to open their own channels, and attach themselves so that a
//! restart can stop and start them around a reconnect.
//!
//! The wrapper object outlives restarts; only the handle inside is replaced.

use crate::{
    channel::AmqpConnection, errors::AmqpError, factory::ConnectionFactoryBuilder,
    lifecycle::Component,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Capability handed to consumers, producers and the exception handler.
#[async_trait]
pub trait ConnectionWrapper: Send + Sync {
    fn unique_id(&self) -> &str;

    /// Builds a factory and opens a new connection, replacing any current handle.
    ///
    /// Errors from building the factory are returned unchanged.
    async fn init(&self) -> Result<(), AmqpError>;

    /// The live connection, or [`AmqpError::NotConnectedError`].
    async fn wrapped_connection(&self) -> Result<Arc<dyn AmqpConnection>, AmqpError>;

    /// Releases the connection quietly.
    async fn close(&self);

    fn connection_factory_builder(&self) -> Arc<dyn ConnectionFactoryBuilder>;

    /// Registers a component to be stopped and started by [`restart`](Self::restart).
    ///
    /// Held weakly; a dropped component is forgotten.
    fn attach(&self, component: &Arc<dyn Component>);

    /// Stops every attached component, reconnects and starts them again.
    async fn restart(&self) -> Result<(), AmqpError>;
}

pub struct RabbitMqConnection {
    unique_id: String,
    factory_builder: Arc<dyn ConnectionFactoryBuilder>,
    connection: RwLock<Option<Arc<dyn AmqpConnection>>>,
    components: Mutex<Vec<Weak<dyn Component>>>,
    restart_lock: AsyncMutex<()>,
}

impl RabbitMqConnection {
    pub fn new(factory_builder: Arc<dyn ConnectionFactoryBuilder>) -> Arc<RabbitMqConnection> {
        Self::with_id(&Uuid::new_v4().to_string(), factory_builder)
    }

    pub fn with_id(
        unique_id: &str,
        factory_builder: Arc<dyn ConnectionFactoryBuilder>,
    ) -> Arc<RabbitMqConnection> {
        Arc::new(RabbitMqConnection {
            unique_id: unique_id.to_owned(),
            factory_builder,
            connection: RwLock::new(None),
            components: Mutex::new(Vec::new()),
            restart_lock: AsyncMutex::new(()),
        })
    }

    fn attached(&self) -> Vec<Arc<dyn Component>> {
        let mut components = self
            .components
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        components.retain(|c| c.strong_count() > 0);
        components.iter().filter_map(Weak::upgrade).collect()
    }
}

#[async_trait]
impl ConnectionWrapper for RabbitMqConnection {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    async fn init(&self) -> Result<(), AmqpError> {
        let factory = self.factory_builder.build()?;

        let conn = factory
            .new_connection(&self.unique_id)
            .await
            .map_err(|err| match err {
                AmqpError::ConnectionError(_) => err,
                other => AmqpError::ConnectionError(other.to_string()),
            })?;

        let previous = self.connection.write().await.replace(conn);
        if let Some(previous) = previous {
            close_quietly(previous).await;
        }

        debug!(id = self.unique_id.as_str(), "rabbit-connection initialised");
        Ok(())
    }

    async fn wrapped_connection(&self) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(AmqpError::NotConnectedError)
    }

    async fn close(&self) {
        let current = self.connection.write().await.take();
        if let Some(conn) = current {
            close_quietly(conn).await;
        }
    }

    fn connection_factory_builder(&self) -> Arc<dyn ConnectionFactoryBuilder> {
        self.factory_builder.clone()
    }

    fn attach(&self, component: &Arc<dyn Component>) {
        self.components
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(component));
    }

    async fn restart(&self) -> Result<(), AmqpError> {
        let _guard = self.restart_lock.lock().await;
        let components = self.attached();
        info!(
            id = self.unique_id.as_str(),
            components = components.len(),
            "restarting rabbit-connection"
        );

        for component in &components {
            component.stop().await;
        }

        self.close().await;
        if let Err(err) = self.init().await {
            error!(
                id = self.unique_id.as_str(),
                error = err.to_string(),
                "failure to reconnect, components left stopped"
            );
            return Err(err);
        }

        let mut result = Ok(());
        for component in &components {
            if let Err(err) = component.start().await {
                error!(
                    error = err.to_string(),
                    component = component.name(),
                    "failure to start component after restart"
                );
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        result
    }
}

/// Shares `component` and attaches it to `connection`, so that it takes part in restarts.
///
/// The connection only holds the component weakly; keep the returned `Arc` alive.
pub fn register<C: Component + 'static>(
    connection: &dyn ConnectionWrapper,
    component: C,
) -> Arc<C> {
    let component = Arc::new(component);
    let attached: Arc<dyn Component> = component.clone();
    connection.attach(&attached);
    component
}

async fn close_quietly(conn: Arc<dyn AmqpConnection>) {
    if let Err(err) = conn.close().await {
        debug!(error = err.to_string(), "ignoring error closing connection");
    }
}
