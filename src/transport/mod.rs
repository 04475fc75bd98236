//! Transports are the send and receive primitives the relay orchestrates

mod http;
mod nats;

pub use self::http::*;
pub use self::nats::*;

use crate::{config::NatsConfig, ConnectionOptions, Event, Result};
use async_trait::async_trait;
use reqwest::Url;
use std::fmt::Debug;

/// Invoked once per event delivered by a consumer
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles a single event
    async fn handle(&self, event: Event);
}

/// Opens NATS handles bound to an endpoint
#[async_trait]
pub trait BusConnector: Debug + Send + Sync {
    /// Opens a handle publishing to `nats.subject`
    async fn open_sender(
        &self,
        endpoint: &NatsConfig,
        options: &ConnectionOptions,
    ) -> Result<Box<dyn BusSender>>;

    /// Opens a handle subscribing to `nats.subject`
    async fn open_consumer(
        &self,
        endpoint: &NatsConfig,
        options: &ConnectionOptions,
    ) -> Result<Box<dyn BusConsumer>>;
}

/// Publishing side of a NATS subject
#[async_trait]
pub trait BusSender: Debug + Send + Sync {
    /// Publishes the event; an error means the broker did not take it
    async fn send(&self, event: &Event) -> Result<()>;

    /// Releases the connection. Called exactly once per opened sender.
    async fn close(&self);
}

/// Subscribing side of a NATS subject
#[async_trait]
pub trait BusConsumer: Debug + Send + Sync {
    /// Runs one receive cycle, calling `handler` for each event.
    ///
    /// Returns `Ok` when the subscription ends and `Err` when it cannot be
    /// started.
    async fn start_receiver(&mut self, handler: &dyn EventHandler) -> Result<()>;

    /// Releases the connection. Called exactly once per opened consumer.
    async fn close(&self);
}

/// Delivers events to an HTTP endpoint
#[async_trait]
pub trait HttpSink: Debug + Send + Sync {
    /// Sends the event; an error means it was not accepted
    async fn send(&self, event: &Event, target: &Url) -> Result<()>;
}
