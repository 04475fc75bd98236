#![allow(dead_code)]

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Router};
use bytes::Bytes;
use http::HeaderMap;
use nats_event_relay::{
    config::NatsConfig,
    transport::{BusConnector, BusConsumer, BusSender, EventHandler},
    ConnectionOptions, Error, Event, Result,
};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use tokio::sync::{mpsc, Notify};

/// In-process stand-in for a NATS subject shared by senders and consumers
#[derive(Debug)]
pub struct MemoryBus {
    pub published: Mutex<Vec<(String, Bytes)>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub fail_sends: AtomicBool,
    pub fail_opens: AtomicBool,
    tx: mpsc::UnboundedSender<Bytes>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            published: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            fail_opens: AtomicBool::new(false),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    /// Puts a raw payload on the subject, as another publisher would
    pub fn inject(&self, payload: Bytes) {
        self.tx.send(payload).unwrap();
    }

    pub fn published_events(&self) -> Vec<(String, Event)> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(subject, payload)| (subject.clone(), Event::from_json(payload).unwrap()))
            .collect()
    }

    fn open(&self, stage: &'static str) -> Result<()> {
        if self.fail_opens.load(Ordering::SeqCst) {
            return Err(Error::TransportSetup {
                stage,
                reason: "connection refused".to_owned(),
            });
        }

        let _ = self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConnector(pub Arc<MemoryBus>);

#[async_trait]
impl BusConnector for MemoryConnector {
    async fn open_sender(
        &self,
        endpoint: &NatsConfig,
        _options: &ConnectionOptions,
    ) -> Result<Box<dyn BusSender>> {
        self.0.open("nats sender")?;

        Ok(Box::new(MemorySender {
            bus: self.0.clone(),
            subject: endpoint.subject.clone(),
        }))
    }

    async fn open_consumer(
        &self,
        _endpoint: &NatsConfig,
        _options: &ConnectionOptions,
    ) -> Result<Box<dyn BusConsumer>> {
        self.0.open("nats consumer")?;

        Ok(Box::new(MemoryConsumer {
            bus: self.0.clone(),
        }))
    }
}

#[derive(Debug)]
struct MemorySender {
    bus: Arc<MemoryBus>,
    subject: String,
}

#[async_trait]
impl BusSender for MemorySender {
    async fn send(&self, event: &Event) -> Result<()> {
        if self.bus.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Delivery {
                id: event.id.clone(),
                reason: "no responders".to_owned(),
            });
        }

        let payload = event.to_json()?;
        self.bus
            .published
            .lock()
            .unwrap()
            .push((self.subject.clone(), payload.clone()));
        self.bus.inject(payload);

        Ok(())
    }

    async fn close(&self) {
        let _ = self.bus.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct MemoryConsumer {
    bus: Arc<MemoryBus>,
}

#[async_trait]
impl BusConsumer for MemoryConsumer {
    async fn start_receiver(&mut self, handler: &dyn EventHandler) -> Result<()> {
        let mut rx = self.bus.rx.lock().await;

        while let Some(payload) = rx.recv().await {
            if let Ok(event) = Event::from_json(&payload) {
                handler.handle(event).await;
            }
        }

        Ok(())
    }

    async fn close(&self) {
        let _ = self.bus.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// HTTP endpoint recording every request it gets
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub requests: Arc<Mutex<Vec<(HeaderMap, Bytes)>>>,
    pub received: Arc<Notify>,
}

impl Target {
    pub async fn spawn() -> (String, Self) {
        let target = Self::default();
        let app = Router::new()
            .route("/message", post(capture))
            .with_state(target.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let _ = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{address}/message"), target)
    }

    pub fn requests(&self) -> Vec<(HeaderMap, Bytes)> {
        self.requests.lock().unwrap().clone()
    }
}

async fn capture(State(target): State<Target>, headers: HeaderMap, body: Bytes) -> StatusCode {
    target.requests.lock().unwrap().push((headers, body));
    target.received.notify_one();

    StatusCode::OK
}

pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
