// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Factory Builders
//!
//! A builder turns configuration into a [`ConnectionFactory`]. `build()` runs once per
//! connection attempt, including every reconnect after a restart, and keeps no state
//! between calls apart from the exception handler injected by
//! [`AlwaysRestartExceptionHandler::register_connection`](crate::exception::AlwaysRestartExceptionHandler::register_connection).
//!
//! Three flavours exist:
//! - [`SimpleConnectionFactoryBuilder`]: everything, credentials included, in one broker url
//! - [`BasicConnectionFactoryBuilder`]: a broker url plus credentials that override the url's
//! - [`AdvancedConnectionFactoryBuilder`]: the basic builder plus a table of factory properties

use crate::{
    channel::{ConnectionFactory, LapinConnectionFactory},
    errors::AmqpError,
    exception::ExceptionHandler,
    password,
};
use lapin::uri::{AMQPScheme, AMQPUri};
use serde::Deserialize;
use std::{
    any::{Any, TypeId},
    fmt,
    str::FromStr,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::warn;

/// Produces the connection factory for a
/// [`ConnectionWrapper`](crate::connection::ConnectionWrapper).
pub trait ConnectionFactoryBuilder: Send + Sync {
    fn build(&self) -> Result<Arc<dyn ConnectionFactory>, AmqpError>;

    /// The configured broker url, before `%env{}` resolution.
    fn broker_url(&self) -> &str;

    fn username(&self) -> Option<&str> {
        None
    }

    fn set_exception_handler(&self, handler: Arc<dyn ExceptionHandler>);

    fn exception_handler(&self) -> Option<Arc<dyn ExceptionHandler>>;

    fn as_any(&self) -> &dyn Any;

    /// Builders of the same family are comparable with [`connection_equals`](Self::connection_equals).
    ///
    /// Defaults to the concrete type.
    fn family(&self) -> TypeId {
        self.as_any().type_id()
    }

    /// Whether both builders are of the same family and point at the same broker url.
    fn connection_equals(&self, other: &dyn ConnectionFactoryBuilder) -> bool {
        self.family() == other.family() && self.broker_url() == other.broker_url()
    }
}

/// Holds the exception handler injected at registration time.
#[derive(Default)]
pub struct ExceptionHandlerSlot(RwLock<Option<Arc<dyn ExceptionHandler>>>);

impl ExceptionHandlerSlot {
    pub fn set(&self, handler: Arc<dyn ExceptionHandler>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn get(&self) -> Option<Arc<dyn ExceptionHandler>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl fmt::Debug for ExceptionHandlerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionHandlerSlot")
            .field("registered", &self.get().is_some())
            .finish()
    }
}

/// Resolves `%env{}` references and parses the result as an AMQP uri.
fn parse_broker_url(broker_url: &str) -> Result<AMQPUri, AmqpError> {
    let resolved = password::resolve_external(broker_url)?;
    if resolved.trim().is_empty() {
        return Err(AmqpError::ConfigurationError(
            "broker-url may not be blank".to_owned(),
        ));
    }

    AMQPUri::from_str(resolved.trim())
        .map_err(|err| AmqpError::ConfigurationError(format!("invalid broker-url: {err}")))
}

/// Overrides the url credentials with the ones configured explicitly.
fn apply_credentials(
    uri: &mut AMQPUri,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<(), AmqpError> {
    if let Some(username) = username {
        uri.authority.userinfo.username = username.to_owned();
    }
    if let Some(pw) = password {
        uri.authority.userinfo.password = password::decode(&password::resolve_external(pw)?)?;
    }
    Ok(())
}

/// Builds the connection factory from a single broker url of the form
/// `amqp://[user:pass@]host:port[/vhost][?params]`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SimpleConnectionFactoryBuilder {
    pub broker_url: String,
    #[serde(skip)]
    exception_handler: ExceptionHandlerSlot,
}

impl SimpleConnectionFactoryBuilder {
    pub fn new(broker_url: &str) -> Self {
        SimpleConnectionFactoryBuilder {
            broker_url: broker_url.to_owned(),
            exception_handler: ExceptionHandlerSlot::default(),
        }
    }

    pub fn lapin_factory(&self) -> Result<LapinConnectionFactory, AmqpError> {
        let uri = parse_broker_url(&self.broker_url)?;
        Ok(LapinConnectionFactory::new(uri).with_exception_handler(self.exception_handler.get()))
    }
}

impl ConnectionFactoryBuilder for SimpleConnectionFactoryBuilder {
    fn build(&self) -> Result<Arc<dyn ConnectionFactory>, AmqpError> {
        Ok(Arc::new(self.lapin_factory()?))
    }

    fn broker_url(&self) -> &str {
        &self.broker_url
    }

    fn set_exception_handler(&self, handler: Arc<dyn ExceptionHandler>) {
        self.exception_handler.set(handler)
    }

    fn exception_handler(&self) -> Option<Arc<dyn ExceptionHandler>> {
        self.exception_handler.get()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Broker url plus a username and password that override whatever the url carries.
///
/// The password may be obfuscated with `PW:` or reference the environment with `%env{}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BasicConnectionFactoryBuilder {
    pub broker_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(skip)]
    exception_handler: ExceptionHandlerSlot,
}

impl BasicConnectionFactoryBuilder {
    pub fn new(broker_url: &str) -> Self {
        BasicConnectionFactoryBuilder {
            broker_url: broker_url.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_owned());
        self.password = Some(password.to_owned());
        self
    }

    pub fn lapin_factory(&self) -> Result<LapinConnectionFactory, AmqpError> {
        let mut uri = parse_broker_url(&self.broker_url)?;
        apply_credentials(&mut uri, self.username.as_deref(), self.password.as_deref())?;
        Ok(LapinConnectionFactory::new(uri).with_exception_handler(self.exception_handler.get()))
    }
}

impl ConnectionFactoryBuilder for BasicConnectionFactoryBuilder {
    fn build(&self) -> Result<Arc<dyn ConnectionFactory>, AmqpError> {
        Ok(Arc::new(self.lapin_factory()?))
    }

    fn broker_url(&self) -> &str {
        &self.broker_url
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn set_exception_handler(&self, handler: Arc<dyn ExceptionHandler>) {
        self.exception_handler.set(handler)
    }

    fn exception_handler(&self) -> Option<Arc<dyn ExceptionHandler>> {
        self.exception_handler.get()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory settings that can be configured by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryProperty {
    Host,
    Port,
    Username,
    Password,
    VirtualHost,
    /// Replaces the whole uri.
    Uri,
    /// `true` switches to `amqps`.
    Ssl,
    Heartbeat,
    ChannelMax,
    FrameMax,
    /// Milliseconds.
    ConnectionTimeout,
    ConnectionName,
}

impl FactoryProperty {
    const ALL: [FactoryProperty; 12] = [
        FactoryProperty::Host,
        FactoryProperty::Port,
        FactoryProperty::Username,
        FactoryProperty::Password,
        FactoryProperty::VirtualHost,
        FactoryProperty::Uri,
        FactoryProperty::Ssl,
        FactoryProperty::Heartbeat,
        FactoryProperty::ChannelMax,
        FactoryProperty::FrameMax,
        FactoryProperty::ConnectionTimeout,
        FactoryProperty::ConnectionName,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            FactoryProperty::Host => "Host",
            FactoryProperty::Port => "Port",
            FactoryProperty::Username => "Username",
            FactoryProperty::Password => "Password",
            FactoryProperty::VirtualHost => "VirtualHost",
            FactoryProperty::Uri => "Uri",
            FactoryProperty::Ssl => "Ssl",
            FactoryProperty::Heartbeat => "Heartbeat",
            FactoryProperty::ChannelMax => "ChannelMax",
            FactoryProperty::FrameMax => "FrameMax",
            FactoryProperty::ConnectionTimeout => "ConnectionTimeout",
            FactoryProperty::ConnectionName => "ConnectionName",
        }
    }

    /// Case-insensitive lookup.
    pub fn from_key(key: &str) -> Option<FactoryProperty> {
        Self::ALL
            .into_iter()
            .find(|p| p.key().eq_ignore_ascii_case(key.trim()))
    }

    fn apply(
        &self,
        uri: &mut AMQPUri,
        connection_name: &mut Option<String>,
        value: &str,
    ) -> Result<(), AmqpError> {
        match self {
            FactoryProperty::Host => uri.authority.host = value.to_owned(),
            FactoryProperty::Port => uri.authority.port = self.parse(value)?,
            FactoryProperty::Username => uri.authority.userinfo.username = value.to_owned(),
            FactoryProperty::Password => {
                uri.authority.userinfo.password =
                    password::decode(&password::resolve_external(value)?)?
            }
            FactoryProperty::VirtualHost => uri.vhost = value.to_owned(),
            FactoryProperty::Uri => *uri = parse_broker_url(value)?,
            FactoryProperty::Ssl => {
                uri.scheme = if self.parse::<bool>(value)? {
                    AMQPScheme::AMQPS
                } else {
                    AMQPScheme::AMQP
                }
            }
            FactoryProperty::Heartbeat => uri.query.heartbeat = Some(self.parse(value)?),
            FactoryProperty::ChannelMax => uri.query.channel_max = Some(self.parse(value)?),
            FactoryProperty::FrameMax => uri.query.frame_max = Some(self.parse(value)?),
            FactoryProperty::ConnectionTimeout => {
                uri.query.connection_timeout = Some(self.parse(value)?)
            }
            FactoryProperty::ConnectionName => *connection_name = Some(value.to_owned()),
        }
        Ok(())
    }

    fn parse<T: FromStr>(&self, value: &str) -> Result<T, AmqpError> {
        value.trim().parse().map_err(|_| {
            AmqpError::ConfigurationError(format!("invalid value `{}` for {}", value, self.key()))
        })
    }
}

/// A single configured factory property.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

/// The basic builder plus factory properties applied in order.
///
/// Properties are applied after the url and before the explicit credentials. Unknown
/// keys are logged and ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AdvancedConnectionFactoryBuilder {
    pub broker_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub properties: Vec<KeyValuePair>,
    #[serde(skip)]
    exception_handler: ExceptionHandlerSlot,
}

impl AdvancedConnectionFactoryBuilder {
    pub fn new(broker_url: &str) -> Self {
        AdvancedConnectionFactoryBuilder {
            broker_url: broker_url.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_owned());
        self.password = Some(password.to_owned());
        self
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.push(KeyValuePair {
            key: key.to_owned(),
            value: value.to_owned(),
        });
        self
    }

    pub fn lapin_factory(&self) -> Result<LapinConnectionFactory, AmqpError> {
        let mut uri = parse_broker_url(&self.broker_url)?;
        let mut connection_name = None;

        for KeyValuePair { key, value } in &self.properties {
            match FactoryProperty::from_key(key) {
                Some(property) => property.apply(&mut uri, &mut connection_name, value)?,
                None => warn!(key = key.as_str(), "ignoring unknown connection factory property"),
            }
        }

        apply_credentials(&mut uri, self.username.as_deref(), self.password.as_deref())?;

        Ok(LapinConnectionFactory::new(uri)
            .with_connection_name(connection_name)
            .with_exception_handler(self.exception_handler.get()))
    }
}

impl ConnectionFactoryBuilder for AdvancedConnectionFactoryBuilder {
    fn build(&self) -> Result<Arc<dyn ConnectionFactory>, AmqpError> {
        Ok(Arc::new(self.lapin_factory()?))
    }

    fn broker_url(&self) -> &str {
        &self.broker_url
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn set_exception_handler(&self, handler: Arc<dyn ExceptionHandler>) {
        self.exception_handler.set(handler)
    }

    fn exception_handler(&self) -> Option<Arc<dyn ExceptionHandler>> {
        self.exception_handler.get()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    /// An advanced builder is a basic builder with extra factory properties.
    fn family(&self) -> TypeId {
        TypeId::of::<BasicConnectionFactoryBuilder>()
    }
}
