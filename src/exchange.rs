// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Declaration for RabbitMQ
//!
//! Producers declare their exchange once when they start. The default strategy
//! publishes to the unnamed default exchange and so declares nothing; the explicit
//! strategy declares a named exchange and exposes the name as the publish target.

use crate::{channel::AmqpChannel, errors::AmqpError};
use async_trait::async_trait;
use serde::Deserialize;

/// Represents the built-in exchange types of RabbitMQ.
///
/// Each exchange type has specific routing behavior:
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

/// How an exchange is declared before first use.
#[async_trait]
pub trait ExchangeDeclaration: Send + Sync {
    async fn declare(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError>;

    /// The exchange messages are published to. Empty means the default exchange.
    fn name(&self) -> &str {
        ""
    }
}

/// The unnamed default exchange; it always exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExchange;

#[async_trait]
impl ExchangeDeclaration for DefaultExchange {
    async fn declare(&self, _channel: &dyn AmqpChannel) -> Result<(), AmqpError> {
        Ok(())
    }
}

/// Explicitly declares a named exchange.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExplicitExchange {
    pub name: String,
    #[serde(default, rename = "exchange-type")]
    pub kind: ExchangeKind,
    /// Whether the exchange survives a broker restart, true if unset.
    #[serde(default)]
    pub durable: Option<bool>,
}

impl ExplicitExchange {
    pub fn new(name: &str) -> ExplicitExchange {
        ExplicitExchange {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            durable: None,
        }
    }

    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    fn is_durable(&self) -> bool {
        self.durable.unwrap_or(true)
    }
}

#[async_trait]
impl ExchangeDeclaration for ExplicitExchange {
    async fn declare(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError> {
        // blank means the default exchange, which needs no declaration
        if self.name.trim().is_empty() {
            return Err(AmqpError::ConfigurationError(
                "exchange name may not be blank".to_owned(),
            ));
        }

        channel
            .exchange_declare(&self.name, self.kind, self.is_durable())
            .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
