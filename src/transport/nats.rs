use super::{BusConnector, BusConsumer, BusSender, EventHandler};
use crate::{config::NatsConfig, ConnectionOptions, Error, Event, Result};
use async_nats::Client;
use async_trait::async_trait;
use futures_util::StreamExt;

/// Opens [`NatsSender`]s and [`NatsConsumer`]s with async-nats
#[derive(Debug, Default, Clone, Copy)]
pub struct NatsConnector;

impl NatsConnector {
    /// Creates an instance of [`NatsConnector`]
    pub fn new() -> Self {
        Self
    }

    async fn connect(
        endpoint: &NatsConfig,
        options: &ConnectionOptions,
        stage: &'static str,
    ) -> Result<Client> {
        options
            .to_connect_options()
            .connect(endpoint.host.as_str())
            .await
            .map_err(|error| Error::setup(stage, error))
    }
}

#[async_trait]
impl BusConnector for NatsConnector {
    async fn open_sender(
        &self,
        endpoint: &NatsConfig,
        options: &ConnectionOptions,
    ) -> Result<Box<dyn BusSender>> {
        let client = Self::connect(endpoint, options, "nats sender").await?;

        Ok(Box::new(NatsSender {
            client,
            subject: endpoint.subject.clone(),
        }))
    }

    async fn open_consumer(
        &self,
        endpoint: &NatsConfig,
        options: &ConnectionOptions,
    ) -> Result<Box<dyn BusConsumer>> {
        let client = Self::connect(endpoint, options, "nats consumer").await?;

        Ok(Box::new(NatsConsumer {
            client,
            subject: endpoint.subject.clone(),
        }))
    }
}

/// Publishes events in the JSON event format.
///
/// [`BusSender::close`] drains the client, which delivers anything still
/// buffered and then closes the connection.
#[derive(Debug)]
pub struct NatsSender {
    client: Client,
    subject: String,
}

#[async_trait]
impl BusSender for NatsSender {
    async fn send(&self, event: &Event) -> Result<()> {
        let payload = event.to_json()?;

        self.client
            .publish(self.subject.clone(), payload)
            .await
            .map_err(|error| Error::delivery(&event.id, error))?;

        // Core NATS has no acknowledgement; a flush round-trip is the closest to it
        self.client
            .flush()
            .await
            .map_err(|error| Error::delivery(&event.id, error))
    }

    async fn close(&self) {
        if let Err(ref error) = self.client.drain().await {
            tracing::warn!(%error, subject = %self.subject, "Couldn't drain NATS sender on close");
        }
    }
}

/// Subscribes to a subject and decodes each message as a JSON event
#[derive(Debug)]
pub struct NatsConsumer {
    client: Client,
    subject: String,
}

#[async_trait]
impl BusConsumer for NatsConsumer {
    async fn start_receiver(&mut self, handler: &dyn EventHandler) -> Result<()> {
        let mut subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .map_err(|error| Error::setup("nats subscription", error))?;

        tracing::debug!(subject = %self.subject, "Receiving events");

        while let Some(message) = subscriber.next().await {
            match Event::from_json(&message.payload) {
                Ok(event) => handler.handle(event).await,
                Err(ref error) => {
                    tracing::warn!(%error, subject = %message.subject, "Skipping message that isn't a CloudEvent");
                }
            }
        }

        Ok(())
    }

    async fn close(&self) {
        if let Err(ref error) = self.client.drain().await {
            tracing::warn!(%error, subject = %self.subject, "Couldn't drain NATS consumer on close");
        }
    }
}
