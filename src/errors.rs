// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Adapter
//!
//! This module provides the error taxonomy shared by every component of the adapter.
//! Configuration and credential errors fail fast when a factory is built, connection
//! errors are surfaced to the host framework for its own retry policy, and publish or
//! consume errors are surfaced per message.
//!
//! Asynchronous transport faults are not errors in this sense: they are reported to an
//! [`ExceptionHandler`](crate::exception::ExceptionHandler) as [`Fault`](crate::exception::Fault) values.

use thiserror::Error;

/// Represents errors that can occur while configuring, connecting, declaring,
/// publishing or consuming.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Missing or invalid configuration, e.g. a blank broker url or queue name
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// A configured password is present but cannot be decoded
    #[error("failure to decode credentials: {0}")]
    CredentialError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// The connection wrapper has no live connection
    #[error("rabbit-connection is not connected")]
    NotConnectedError,

    /// Error creating or closing a channel
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),
}
