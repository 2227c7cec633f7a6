// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

#[cfg(test)]
mod testing;

pub mod channel;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod errors;
pub mod exception;
pub mod exchange;
pub mod factory;
pub mod lifecycle;
pub mod message;
pub mod metadata;
pub mod otel;
pub mod password;
pub mod properties;
pub mod publisher;
pub mod queue;
pub mod translator;
