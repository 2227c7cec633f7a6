// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Component Lifecycle
//!
//! Consumers and producers are driven by the host framework through `prepare`,
//! `start` and `stop`. The same calls are issued by
//! [`ConnectionWrapper::restart`](crate::connection::ConnectionWrapper::restart)
//! when a transport fault forces the channels to be re-acquired.

use crate::errors::AmqpError;
use async_trait::async_trait;

/// A unit that owns a channel on a shared connection.
#[async_trait]
pub trait Component: Send + Sync {
    /// Used for logging.
    fn name(&self) -> String;

    /// Validates configuration. No I/O.
    async fn prepare(&self) -> Result<(), AmqpError>;

    /// Acquires a channel and declares topology.
    async fn start(&self) -> Result<(), AmqpError>;

    /// Releases the channel. Never fails.
    async fn stop(&self);
}
