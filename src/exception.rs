// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Transport Faults and the Restart Policy
//!
//! The broker client reports asynchronous faults from its own threads. Every fault is
//! delivered as a single [`Fault`] value to [`ExceptionHandler::handle_fault`]; the
//! category only changes what gets logged.
//!
//! [`AlwaysRestartExceptionHandler`] treats every fault the same way: it logs the
//! category and cause, then restarts every component attached to the owning
//! connection so that they re-acquire fresh channels.

use crate::{connection::ConnectionWrapper, errors::AmqpError};
use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock, Weak},
};
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{error, warn};

/// Source of an asynchronous fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCategory {
    /// I/O or protocol failure inside the connection driver.
    UnexpectedConnectionDriver,
    ReturnListener,
    ConfirmListener,
    BlockedListener,
    /// Failure while dispatching a delivery to a consumer.
    Consumer,
    ConnectionRecovery,
    ChannelRecovery,
    TopologyRecovery,
    /// Raised by the host framework rather than the broker client.
    ConnectionException,
}

impl FaultCategory {
    pub const ALL: [FaultCategory; 9] = [
        FaultCategory::UnexpectedConnectionDriver,
        FaultCategory::ReturnListener,
        FaultCategory::ConfirmListener,
        FaultCategory::BlockedListener,
        FaultCategory::Consumer,
        FaultCategory::ConnectionRecovery,
        FaultCategory::ChannelRecovery,
        FaultCategory::TopologyRecovery,
        FaultCategory::ConnectionException,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FaultCategory::UnexpectedConnectionDriver => "UnexpectedConnectionDriverException",
            FaultCategory::ReturnListener => "ReturnListenerException",
            FaultCategory::ConfirmListener => "ConfirmListenerException",
            FaultCategory::BlockedListener => "BlockedListenerException",
            FaultCategory::Consumer => "ConsumerException",
            FaultCategory::ConnectionRecovery => "ConnectionRecoveryException",
            FaultCategory::ChannelRecovery => "ChannelRecoveryException",
            FaultCategory::TopologyRecovery => "TopologyRecoveryException",
            FaultCategory::ConnectionException => "ConnectionException",
        }
    }
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A fault reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub category: FaultCategory,
    pub cause: String,
}

impl Fault {
    pub fn new(category: FaultCategory, cause: impl Into<String>) -> Fault {
        Fault {
            category,
            cause: cause.into(),
        }
    }
}

/// Sink for asynchronous transport faults.
///
/// Called from broker client threads, so implementations must not block.
pub trait ExceptionHandler: Send + Sync {
    fn handle_fault(&self, fault: Fault);
}

/// Restarts every component attached to the registered connection on any fault.
///
/// A restart that fails to reconnect leaves the connection closed and its components
/// stopped; the error is kept in [`last_restart_error`](Self::last_restart_error).
pub struct AlwaysRestartExceptionHandler {
    connection: RwLock<Option<Weak<dyn ConnectionWrapper>>>,
    runtime: RwLock<Option<Handle>>,
    last_error: Arc<RwLock<Option<AmqpError>>>,
}

impl Default for AlwaysRestartExceptionHandler {
    fn default() -> Self {
        AlwaysRestartExceptionHandler {
            connection: RwLock::new(None),
            runtime: RwLock::new(Handle::try_current().ok()),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

impl AlwaysRestartExceptionHandler {
    pub fn new() -> Arc<AlwaysRestartExceptionHandler> {
        Arc::new(AlwaysRestartExceptionHandler::default())
    }

    /// Binds the handler to `connection` and installs it on the connection's
    /// factory builder, so every connection opened afterwards reports to it.
    ///
    /// Must be called before the connection is initialised.
    pub fn register_connection(self: &Arc<Self>, connection: &Arc<dyn ConnectionWrapper>) {
        *self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(connection));

        if let Ok(handle) = Handle::try_current() {
            *self.runtime.write().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        let handler: Arc<dyn ExceptionHandler> = self.clone();
        connection
            .connection_factory_builder()
            .set_exception_handler(handler);
    }

    /// Framework level connection failure.
    pub fn handle_connection_exception(&self, cause: impl Into<String>) {
        self.handle_fault(Fault::new(FaultCategory::ConnectionException, cause));
    }

    /// Outcome of the most recent restart, `None` once a restart succeeds.
    pub fn last_restart_error(&self) -> Option<AmqpError> {
        self.last_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Logs `fault` and spawns the restart, returning the restart task.
    ///
    /// `None` when no connection is registered or it has been dropped, or when
    /// no runtime is available to run the restart on.
    pub fn restart(&self, fault: Fault) -> Option<JoinHandle<Result<(), AmqpError>>> {
        warn!(
            category = fault.category.label(),
            cause = fault.cause.as_str(),
            "Restarting because of {} Reason: [{}]",
            fault.category,
            fault.cause
        );

        let connection = self
            .connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        let Some(connection) = connection else {
            warn!("no connection registered, nothing to restart");
            return None;
        };

        let runtime = Handle::try_current().ok().or_else(|| {
            self.runtime
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        });
        let Some(runtime) = runtime else {
            error!("no async runtime available to restart the connection");
            return None;
        };

        let last_error = self.last_error.clone();
        Some(runtime.spawn(async move {
            let result = connection.restart().await;
            if let Err(err) = &result {
                error!(
                    id = connection.unique_id(),
                    error = err.to_string(),
                    "failure to restart connection"
                );
            }
            *last_error.write().unwrap_or_else(PoisonError::into_inner) = result.clone().err();
            result
        }))
    }
}

impl ExceptionHandler for AlwaysRestartExceptionHandler {
    fn handle_fault(&self, fault: Fault) {
        let _ = self.restart(fault);
    }
}
