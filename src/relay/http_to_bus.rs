use super::{open_with_retry, setup_backoff, RelayState};
use crate::{
    config::UndeliveredPolicy,
    http_binding,
    transport::{BusConnector, BusSender},
    Configuration, ConnectionOptions, Error, Event, Mode, Result,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use bytes::Bytes;
use http::HeaderMap;
use std::{future::Future, future::IntoFuture, sync::Arc};
use tokio::{net::TcpListener, sync::mpsc};

/// Receives CloudEvents over HTTP and publishes each one to NATS
#[derive(Debug)]
pub struct HttpToBus {
    state: ReceiverState,
    fatal: mpsc::Receiver<Error>,
}

#[derive(Debug, Clone)]
struct ReceiverState {
    publisher: Arc<Publisher>,
    fatal: mpsc::Sender<Error>,
}

#[derive(Debug)]
struct Publisher {
    config: Arc<Configuration>,
    connector: Arc<dyn BusConnector>,
    shared: Option<Box<dyn BusSender>>,
}

impl HttpToBus {
    /// Resolves credentials and, with `nats.reuse_connection`, opens the
    /// shared sender
    pub async fn new(config: Arc<Configuration>, connector: Arc<dyn BusConnector>) -> Result<Self> {
        RelayState::Init.enter(Mode::HttpReceiver);

        // Per-event senders re-read the seed, a broken one still fails here
        let options = ConnectionOptions::assemble(&config.nats)?;
        RelayState::AuthResolved.enter(Mode::HttpReceiver);

        let shared = if config.nats.reuse_connection {
            let sender = open_with_retry(config.nats.connect_attempts, setup_backoff(&config), || {
                connector.open_sender(&config.nats, &options)
            })
            .await?;
            RelayState::TransportOpened.enter(Mode::HttpReceiver);
            Some(sender)
        } else {
            None
        };

        let (fatal_tx, fatal_rx) = mpsc::channel(1);

        Ok(Self {
            state: ReceiverState {
                publisher: Arc::new(Publisher {
                    config,
                    connector,
                    shared,
                }),
                fatal: fatal_tx,
            },
            fatal: fatal_rx,
        })
    }

    /// Router serving `receiver.path`
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.state.publisher.config.receiver.path, post(receive))
            .with_state(self.state.clone())
    }

    /// Publishes one event to `nats.subject`
    pub async fn on_http_event(&self, event: Event) -> Result<()> {
        self.state.publisher.publish(event).await
    }

    /// The error that stopped the relay, if a request hit one
    pub fn try_fatal(&mut self) -> Option<Error> {
        self.fatal.try_recv().ok()
    }

    /// Serves HTTP until `shutdown` resolves or a request hits a fatal error
    pub async fn serve<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let config = &self.state.publisher.config;
        let listener = TcpListener::bind(config.receiver.listen)
            .await
            .map_err(|error| Error::setup("http receiver", error))?;

        tracing::info!(
            address = %listener.local_addr()?,
            path = %config.receiver.path,
            subject = %config.nats.subject,
            "Receiving events over HTTP"
        );
        RelayState::Relaying.enter(Mode::HttpReceiver);

        let server = axum::serve(listener, self.router()).into_future();

        let result = tokio::select! {
            result = server => result.map_err(|error| Error::setup("http receiver", error)),
            Some(error) = self.fatal.recv() => Err(error),
            () = shutdown => Ok(()),
        };

        self.state.publisher.close().await;

        result
    }
}

impl Publisher {
    async fn publish(&self, event: Event) -> Result<()> {
        if let Some(sender) = &self.shared {
            return sender.send(&event).await;
        }

        let options = ConnectionOptions::assemble(&self.config.nats)?;
        let sender = open_with_retry(
            self.config.nats.connect_attempts,
            setup_backoff(&self.config),
            || self.connector.open_sender(&self.config.nats, &options),
        )
        .await?;

        let result = sender.send(&event).await;
        sender.close().await;

        result
    }

    async fn close(&self) {
        if let Some(sender) = &self.shared {
            sender.close().await;
        }
    }
}

async fn receive(State(state): State<ReceiverState>, headers: HeaderMap, body: Bytes) -> Response {
    let event = match http_binding::from_request(&headers, body) {
        Ok(event) => event,
        Err(error) => {
            tracing::warn!(%error, "Rejecting request that isn't a CloudEvent");
            return (StatusCode::BAD_REQUEST, error.to_string()).into_response();
        }
    };

    let id = event.id.clone();

    match state.publisher.publish(event).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error @ Error::Delivery { .. })
            if state.publisher.config.nats.on_undelivered == UndeliveredPolicy::Reject =>
        {
            tracing::error!(%error, %id, "Couldn't publish event to NATS");
            (StatusCode::BAD_GATEWAY, error.to_string()).into_response()
        }
        Err(error) => {
            tracing::error!(%error, %id, "Couldn't publish event to NATS, stopping relay");
            let response = (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response();
            let _ = state.fatal.try_send(error);
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    #[derive(Debug, Default)]
    struct Counting {
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
        dropped: Arc<AtomicUsize>,
        fail_open: bool,
        fail_send: bool,
        panic_send: bool,
    }

    #[derive(Debug)]
    struct CountingSender {
        fail: bool,
        panic: bool,
        closed: Arc<AtomicUsize>,
        dropped: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BusSender for CountingSender {
        async fn send(&self, event: &Event) -> Result<()> {
            if self.panic {
                panic!("sender for {} blew up", event.id);
            }

            if self.fail {
                Err(Error::delivery(&event.id, "no responders"))
            } else {
                Ok(())
            }
        }

        async fn close(&self) {
            let _ = self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Drop for CountingSender {
        fn drop(&mut self) {
            let _ = self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl BusConnector for Counting {
        async fn open_sender(
            &self,
            _endpoint: &crate::config::NatsConfig,
            _options: &ConnectionOptions,
        ) -> Result<Box<dyn BusSender>> {
            if self.fail_open {
                return Err(Error::setup("nats sender", "connection refused"));
            }

            let _ = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSender {
                fail: self.fail_send,
                panic: self.panic_send,
                closed: self.closed.clone(),
                dropped: self.dropped.clone(),
            }))
        }

        async fn open_consumer(
            &self,
            _endpoint: &crate::config::NatsConfig,
            _options: &ConnectionOptions,
        ) -> Result<Box<dyn crate::transport::BusConsumer>> {
            Err(Error::setup("nats consumer", "not used"))
        }
    }

    fn config(extra: &str) -> Arc<Configuration> {
        Arc::new(
            Configuration::from_yaml_str(&format!(
                "nats:\n  host: localhost:4222\n  subject: local.test\n{extra}"
            ))
            .unwrap(),
        )
    }

    fn request() -> Request<Body> {
        Request::post("/")
            .header("ce-specversion", "1.0")
            .header("ce-id", "e1")
            .header("ce-source", "test")
            .header("ce-type", "demo")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn opens_and_closes_one_sender_per_event() {
        let connector = Arc::new(Counting::default());
        let relay = HttpToBus::new(config(""), connector.clone()).await.unwrap();

        relay.on_http_event(Event::new("e1", "test", "demo")).await.unwrap();
        relay.on_http_event(Event::new("e2", "test", "demo")).await.unwrap();

        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closes_sender_when_send_fails() {
        let connector = Arc::new(Counting {
            fail_send: true,
            ..Counting::default()
        });
        let relay = HttpToBus::new(config(""), connector.clone()).await.unwrap();

        let error = relay.on_http_event(Event::new("e1", "test", "demo")).await.unwrap_err();

        assert!(matches!(error, Error::Delivery { .. }));
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reuses_one_sender_when_configured() {
        let connector = Arc::new(Counting::default());
        let relay = HttpToBus::new(config("  reuse_connection: true\n"), connector.clone())
            .await
            .unwrap();

        for id in ["e1", "e2", "e3"] {
            relay.on_http_event(Event::new(id, "test", "demo")).await.unwrap();
        }

        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 0);

        relay.state.publisher.close().await;
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn answers_ok_on_delivery() {
        let relay = HttpToBus::new(config(""), Arc::new(Counting::default())).await.unwrap();

        let response = relay.router().oneshot(request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn answers_bad_request_for_non_events() {
        let connector = Arc::new(Counting::default());
        let relay = HttpToBus::new(config(""), connector.clone()).await.unwrap();

        let response = relay
            .router()
            .oneshot(Request::post("/").body(Body::from("hello")).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(connector.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn undelivered_event_stops_relay_by_default() {
        let connector = Arc::new(Counting {
            fail_send: true,
            ..Counting::default()
        });
        let mut relay = HttpToBus::new(config(""), connector).await.unwrap();

        let response = relay.router().oneshot(request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(relay.try_fatal(), Some(Error::Delivery { .. })));
    }

    #[tokio::test]
    async fn undelivered_event_is_rejected_when_configured() {
        let connector = Arc::new(Counting {
            fail_send: true,
            ..Counting::default()
        });
        let mut relay = HttpToBus::new(config("  on_undelivered: reject\n"), connector)
            .await
            .unwrap();

        let response = relay.router().oneshot(request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(relay.try_fatal().is_none());
    }

    #[tokio::test]
    async fn failed_sender_setup_stops_relay_without_close() {
        let connector = Arc::new(Counting {
            fail_open: true,
            ..Counting::default()
        });
        let mut relay = HttpToBus::new(config("  on_undelivered: reject\n"), connector.clone())
            .await
            .unwrap();

        let response = relay.router().oneshot(request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(relay.try_fatal(), Some(Error::TransportSetup { .. })));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 0);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sender_is_released_once_on_every_exit_path() {
        for (fail_send, panic_send) in [(false, false), (true, false), (false, true)] {
            let connector = Arc::new(Counting {
                fail_send,
                panic_send,
                ..Counting::default()
            });
            let relay = HttpToBus::new(config(""), connector.clone()).await.unwrap();

            let outcome = tokio::spawn(async move {
                relay.on_http_event(Event::new("e1", "test", "demo")).await
            })
            .await;

            assert_eq!(outcome.is_err(), panic_send);
            assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
            assert_eq!(connector.dropped.load(Ordering::SeqCst), 1);

            let closed = connector.closed.load(Ordering::SeqCst);
            assert_eq!(closed, if panic_send { 0 } else { 1 });
        }
    }

    #[tokio::test]
    async fn bad_seed_fails_startup() {
        let error = HttpToBus::new(
            config("  auth:\n    seed_path: /nonexistent/user.nk\n"),
            Arc::new(Counting::default()),
        )
        .await
        .unwrap_err();

        assert!(matches!(error, Error::Credential { .. }));
    }
}
