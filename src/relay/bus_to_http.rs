use super::{open_with_retry, setup_backoff, RelayState, Supervisor};
use crate::{
    config::DeliveryMode,
    transport::{BusConnector, EventHandler, HttpSink},
    Configuration, ConnectionOptions, Event, Mode, Result,
};
use async_trait::async_trait;
use reqwest::Url;
use std::{future::Future, sync::Arc};

/// Consumes CloudEvents from NATS and forwards each one to the HTTP target
#[derive(Debug)]
pub struct BusToHttp {
    config: Arc<Configuration>,
    target: Url,
    sink: Arc<dyn HttpSink>,
}

impl BusToHttp {
    /// Creates an instance of [`BusToHttp`] forwarding to `target.host`
    pub fn new(config: Arc<Configuration>, sink: Arc<dyn HttpSink>) -> Result<Self> {
        let target = config.target_url()?;

        Ok(Self {
            config,
            target,
            sink,
        })
    }

    /// Sends one event to the target, applying `target.delivery`
    pub async fn on_bus_event(&self, event: Event) -> Result<()> {
        match self.config.target.delivery {
            DeliveryMode::FireAndForget => {
                let _ = self.sink.send(&event, &self.target).await;
                Ok(())
            }
            DeliveryMode::Log => self.sink.send(&event, &self.target).await,
            DeliveryMode::Retry => self.send_with_retry(&event).await,
        }
    }

    async fn send_with_retry(&self, event: &Event) -> Result<()> {
        let mut backoff = setup_backoff(&self.config);
        let mut attempt = 1;

        loop {
            match self.sink.send(event, &self.target).await {
                Err(ref error) if attempt < self.config.target.max_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(%error, attempt, id = %event.id, "Retrying HTTP delivery");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Opens the consumer and keeps it receiving until `shutdown` resolves or
    /// a receive cycle fails. The consumer is closed either way.
    pub async fn run<F>(&self, connector: &dyn BusConnector, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        RelayState::Init.enter(Mode::BusConsumer);

        let options = ConnectionOptions::assemble(&self.config.nats)?;
        RelayState::AuthResolved.enter(Mode::BusConsumer);

        let mut consumer = open_with_retry(
            self.config.nats.connect_attempts,
            setup_backoff(&self.config),
            || connector.open_consumer(&self.config.nats, &options),
        )
        .await?;
        RelayState::TransportOpened.enter(Mode::BusConsumer);

        tracing::info!(
            subject = %self.config.nats.subject,
            target = %self.target,
            "Forwarding events to HTTP"
        );
        RelayState::Relaying.enter(Mode::BusConsumer);

        let mut supervisor = Supervisor::new(&self.config.supervisor);

        let result = tokio::select! {
            result = supervisor.run(consumer.as_mut(), self) => result,
            () = shutdown => Ok(()),
        };

        consumer.close().await;

        result
    }
}

#[async_trait]
impl EventHandler for BusToHttp {
    async fn handle(&self, event: Event) {
        let id = event.id.clone();

        if let Err(ref error) = self.on_bus_event(event).await {
            tracing::error!(
                %error,
                %id,
                target = %self.target,
                "Couldn't deliver event to HTTP target"
            );
        }
    }
}
