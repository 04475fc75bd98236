//! [`EventRelay`] picks a direction from the configuration and moves events
//! between HTTP and NATS in that direction

mod bus_to_http;
mod http_to_bus;
mod supervisor;

pub use self::bus_to_http::*;
pub use self::http_to_bus::*;
pub use self::supervisor::*;

use crate::{
    transport::{BusConnector, Http, HttpSink, NatsConnector},
    Configuration, Mode, Result,
};
use std::{future::Future, sync::Arc, time::Duration};

/// Lifecycle of a relay, logged as it advances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Configuration accepted
    Init,

    /// Connection options, including credentials, assembled
    AuthResolved,

    /// Sender, consumer or listener open
    TransportOpened,

    /// Moving events
    Relaying,

    /// Stopped on request
    Closed,

    /// Stopped on an error
    FatalAbort,
}

impl RelayState {
    fn enter(self, mode: Mode) {
        tracing::info!(%mode, state = ?self, "Relay state changed");
    }
}

/// Runs the relay in the direction [`Configuration::mode`] selects
#[derive(Debug)]
pub struct EventRelay {
    config: Arc<Configuration>,
    connector: Arc<dyn BusConnector>,
    sink: Arc<dyn HttpSink>,
}

impl EventRelay {
    /// Creates an instance of [`EventRelay`] backed by async-nats and reqwest
    pub fn new(config: Configuration) -> Result<Self> {
        let timeout = config.target.timeout_ms.map(Duration::from_millis);
        let sink = Http::new(config.target.reuse_client, timeout)?;

        Ok(Self::with_transports(
            config,
            Arc::new(NatsConnector::new()),
            Arc::new(sink),
        ))
    }

    /// Creates an instance of [`EventRelay`] over the given transports
    pub fn with_transports(
        config: Configuration,
        connector: Arc<dyn BusConnector>,
        sink: Arc<dyn HttpSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            sink,
        }
    }

    /// Direction this relay runs in
    pub fn mode(&self) -> Mode {
        self.config.mode()
    }

    /// Relays events until `shutdown` resolves or a fatal error occurs
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let mode = self.mode();
        tracing::info!(%mode, host = %self.config.nats.host, subject = %self.config.nats.subject, "Starting relay");
        self.warn_unenforced();

        let result = match mode {
            Mode::HttpReceiver => {
                let relay = HttpToBus::new(self.config.clone(), self.connector.clone()).await;
                match relay {
                    Ok(relay) => relay.serve(shutdown).await,
                    Err(error) => Err(error),
                }
            }
            Mode::BusConsumer => match BusToHttp::new(self.config.clone(), self.sink.clone()) {
                Ok(relay) => relay.run(self.connector.as_ref(), shutdown).await,
                Err(error) => Err(error),
            },
        };

        match &result {
            Ok(()) => RelayState::Closed.enter(mode),
            Err(_) => RelayState::FatalAbort.enter(mode),
        }

        result
    }

    fn warn_unenforced(&self) {
        if self.config.nats.types.as_ref().is_some_and(|types| !types.is_empty()) {
            tracing::warn!(types = ?self.config.nats.types, "nats.types is set but event types are not filtered yet");
        }

        if self.config.target.auth.is_some() {
            tracing::warn!("target.auth is set but HTTP auth is not supported yet");
        }
    }
}

/// Backoff between setup attempts and delivery retries
pub(crate) fn setup_backoff(config: &Configuration) -> Backoff {
    Backoff::new(
        config.supervisor.backoff_base(),
        config.supervisor.max_backoff(),
    )
}

/// Opens a transport handle, retrying setup errors up to `attempts` times
pub(crate) async fn open_with_retry<T, F, Fut>(
    attempts: u32,
    mut backoff: Backoff,
    mut open: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;

    loop {
        match open().await {
            Err(ref error) if error.is_retryable() && attempt < attempts => {
                let delay = backoff.next_delay();
                tracing::warn!(%error, attempt, delay_ms = delay.as_millis() as u64, "Retrying transport setup");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
