// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Declaration for RabbitMQ
//!
//! Queue declaration is idempotent on the broker, so it is issued before first use:
//! once at start for a fixed queue name, or before every publish when the name is
//! resolved from the message being published.

use crate::{channel::AmqpChannel, errors::AmqpError};
use async_trait::async_trait;
use serde::Deserialize;

/// How a queue is declared before use.
#[async_trait]
pub trait QueueDeclaration: Send + Sync {
    async fn declare(&self, channel: &dyn AmqpChannel, name: &str) -> Result<(), AmqpError>;
}

/// Durable, non-exclusive, not auto-deleted, no extra arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultQueue;

#[async_trait]
impl QueueDeclaration for DefaultQueue {
    async fn declare(&self, channel: &dyn AmqpChannel, name: &str) -> Result<(), AmqpError> {
        channel.queue_declare(name, true, false, false).await
    }
}

/// Declares a queue with explicitly configured flags.
///
/// Each flag is optional and falls back independently: durable `true`,
/// exclusive `false`, auto delete `false`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExplicitQueue {
    #[serde(default)]
    pub durable: Option<bool>,
    #[serde(default)]
    pub exclusive: Option<bool>,
    #[serde(default)]
    pub auto_delete: Option<bool>,
}

impl ExplicitQueue {
    pub fn new() -> ExplicitQueue {
        ExplicitQueue::default()
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = Some(exclusive);
        self
    }

    /// Deletes the queue once the last consumer goes away.
    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = Some(auto_delete);
        self
    }
}

#[async_trait]
impl QueueDeclaration for ExplicitQueue {
    async fn declare(&self, channel: &dyn AmqpChannel, name: &str) -> Result<(), AmqpError> {
        channel
            .queue_declare(
                name,
                self.durable.unwrap_or(true),
                self.exclusive.unwrap_or(false),
                self.auto_delete.unwrap_or(false),
            )
            .await
    }
}
