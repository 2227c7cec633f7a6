// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use async_trait::async_trait;
use rabbitmq_adapter::{
    channel::{AmqpChannel, AmqpConnection, ConnectionFactory},
    connection::{ConnectionWrapper, RabbitMqConnection},
    errors::AmqpError,
    exception::{AlwaysRestartExceptionHandler, Fault, FaultCategory},
    factory::{ConnectionFactoryBuilder, ExceptionHandlerSlot},
    lifecycle::Component,
};
use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

struct FakeConnection;

#[async_trait]
impl AmqpConnection for FakeConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        Err(AmqpError::ChannelError("not supported".to_owned()))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeFactory {
    opened: Arc<AtomicUsize>,
    refused: Arc<AtomicBool>,
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn new_connection(&self, _name: &str) -> Result<Arc<dyn AmqpConnection>, AmqpError> {
        if self.refused.load(Ordering::SeqCst) {
            return Err(AmqpError::ConnectionError("connection refused".to_owned()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeConnection))
    }
}

#[derive(Default)]
struct FakeBuilder {
    opened: Arc<AtomicUsize>,
    refused: Arc<AtomicBool>,
    handler: ExceptionHandlerSlot,
}

impl ConnectionFactoryBuilder for FakeBuilder {
    fn build(&self) -> Result<Arc<dyn ConnectionFactory>, AmqpError> {
        Ok(Arc::new(FakeFactory {
            opened: self.opened.clone(),
            refused: self.refused.clone(),
        }))
    }

    fn broker_url(&self) -> &str {
        "amqp://localhost:5672"
    }

    fn set_exception_handler(&self, handler: Arc<dyn rabbitmq_adapter::exception::ExceptionHandler>) {
        self.handler.set(handler)
    }

    fn exception_handler(&self) -> Option<Arc<dyn rabbitmq_adapter::exception::ExceptionHandler>> {
        self.handler.get()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct CountingComponent {
    starts: AtomicUsize,
    stops: AtomicUsize,
    running: AtomicBool,
    overlapped: AtomicBool,
}

#[async_trait]
impl Component for CountingComponent {
    fn name(&self) -> String {
        "counting".to_owned()
    }

    async fn prepare(&self) -> Result<(), AmqpError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), AmqpError> {
        if self.running.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::task::yield_now().await;
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct Fixture {
    connection: Arc<dyn ConnectionWrapper>,
    handler: Arc<AlwaysRestartExceptionHandler>,
    components: Vec<Arc<CountingComponent>>,
    refused: Arc<AtomicBool>,
}

async fn fixture(components: usize) -> Fixture {
    let builder = FakeBuilder::default();
    let refused = builder.refused.clone();
    let connection: Arc<dyn ConnectionWrapper> = RabbitMqConnection::new(Arc::new(builder));
    let handler = AlwaysRestartExceptionHandler::new();
    handler.register_connection(&connection);
    connection.init().await.unwrap();

    let components: Vec<Arc<CountingComponent>> = (0..components)
        .map(|_| Arc::new(CountingComponent::default()))
        .collect();
    for component in &components {
        let attached: Arc<dyn Component> = component.clone();
        connection.attach(&attached);
        attached.start().await.unwrap();
    }

    Fixture {
        connection,
        handler,
        components,
        refused,
    }
}

fn handle_ptr(conn: &Arc<dyn AmqpConnection>) -> *const () {
    Arc::as_ptr(conn) as *const ()
}

#[tokio::test]
async fn every_fault_restarts_every_component_once() {
    for category in FaultCategory::ALL {
        let fixture = fixture(2).await;
        let before = fixture.connection.wrapped_connection().await.unwrap();

        let restart = fixture
            .handler
            .restart(Fault::new(category, "boom"))
            .expect("restart should be scheduled");
        restart.await.unwrap().unwrap();
        assert_eq!(fixture.handler.last_restart_error(), None);

        for component in &fixture.components {
            assert_eq!(component.stops.load(Ordering::SeqCst), 1, "{category}");
            // one start from the fixture, one from the restart
            assert_eq!(component.starts.load(Ordering::SeqCst), 2, "{category}");
        }

        let after = fixture.connection.wrapped_connection().await.unwrap();
        assert_ne!(handle_ptr(&before), handle_ptr(&after), "{category}");
    }
}

#[tokio::test]
async fn handler_is_installed_on_the_factory_builder() {
    let fixture = fixture(1).await;
    let installed = fixture
        .connection
        .connection_factory_builder()
        .exception_handler()
        .expect("handler should be installed");

    // as the transport would report it
    installed.handle_fault(Fault::new(FaultCategory::UnexpectedConnectionDriver, "reset"));

    let component = &fixture.components[0];
    tokio::time::timeout(Duration::from_secs(5), async {
        while component.starts.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("restart should complete");
    assert_eq!(component.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connection_exception_restarts() {
    let fixture = fixture(1).await;
    fixture.handler.handle_connection_exception("lost");

    let component = &fixture.components[0];
    tokio::time::timeout(Duration::from_secs(5), async {
        while component.starts.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("restart should complete");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_restarts_are_serialised() {
    let fixture = fixture(3).await;

    let restarts: Vec<_> = (0..4)
        .filter_map(|_| {
            fixture
                .handler
                .restart(Fault::new(FaultCategory::ChannelRecovery, "flap"))
        })
        .collect();
    assert_eq!(restarts.len(), 4);
    for restart in restarts {
        restart.await.unwrap().unwrap();
    }

    for component in &fixture.components {
        assert_eq!(component.stops.load(Ordering::SeqCst), 4);
        assert_eq!(component.starts.load(Ordering::SeqCst), 5);
        assert!(!component.overlapped.load(Ordering::SeqCst));
    }
}

#[tokio::test]
async fn dropped_components_are_forgotten() {
    let mut fixture = fixture(2).await;
    let dropped = fixture.components.pop().unwrap();
    drop(dropped);

    fixture.connection.restart().await.unwrap();
    assert_eq!(fixture.components[0].stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fault_after_connection_dropped_is_ignored() {
    let Fixture {
        connection,
        handler,
        components: _components,
        ..
    } = fixture(1).await;
    drop(connection);

    assert!(handler
        .restart(Fault::new(FaultCategory::Consumer, "late"))
        .is_none());
}

#[tokio::test]
async fn failed_reconnect_is_surfaced() {
    let fixture = fixture(2).await;
    fixture.refused.store(true, Ordering::SeqCst);

    let restart = fixture
        .handler
        .restart(Fault::new(FaultCategory::UnexpectedConnectionDriver, "reset"))
        .expect("restart should be scheduled");
    let result = restart.await.unwrap();

    assert!(matches!(result, Err(AmqpError::ConnectionError(_))));
    assert!(matches!(
        fixture.handler.last_restart_error(),
        Some(AmqpError::ConnectionError(_))
    ));
    assert_eq!(
        fixture.connection.wrapped_connection().await.err(),
        Some(AmqpError::NotConnectedError)
    );
    for component in &fixture.components {
        assert_eq!(component.stops.load(Ordering::SeqCst), 1);
        assert_eq!(component.starts.load(Ordering::SeqCst), 1);
    }

    // the host retries once the broker is back
    fixture.refused.store(false, Ordering::SeqCst);
    fixture.handler.handle_connection_exception("retry");
    tokio::time::timeout(Duration::from_secs(5), async {
        while fixture.components[0].starts.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("restart should complete");
    assert!(fixture.connection.wrapped_connection().await.is_ok());
}
