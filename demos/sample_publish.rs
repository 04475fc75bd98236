//! Publishes ten sample events to `local.test` and serves an HTTP target on
//! `:8085/message` for a relay running in bus-consumer mode to post to.

use axum::{http::Uri, routing::post, Router};
use nats_event_relay::{
    config::NatsConfig,
    transport::{BusConnector, BusSender, NatsConnector},
    Configuration, ConnectionOptions, Event,
};
use tracing::Level;

const EVENTS: usize = 10;

const CONFIG: &str = r#"
nats:
  host: "localhost:4222"
  subject: "local.test"
"#;

#[tokio::main(worker_threads = 1)]
async fn main() {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let target = tokio::spawn(serve_target());

    let config = Configuration::from_yaml_str(CONFIG).expect("valid configuration");

    publish_events(&config.nats).await;

    // Keep the target up until the relay has forwarded everything
    if let Err(ref error) = target.await {
        tracing::error!(%error, "HTTP target stopped");
    }
}

async fn publish_events(endpoint: &NatsConfig) {
    let connector = NatsConnector::new();
    let options = ConnectionOptions::assemble(endpoint).expect("connection options");

    for _ in 0..EVENTS {
        let event = Event::new(
            "00000000-0000-0000-0000-000000000000",
            "example/uri",
            "example.type",
        )
        .with_data("application/json", r#"{"hello":"world"}"#);

        let sender = connector
            .open_sender(endpoint, &options)
            .await
            .expect("NATS sender");

        let result = sender.send(&event).await;
        sender.close().await;

        if let Err(ref error) = result {
            tracing::error!(%error, "Couldn't send an event");
            std::process::exit(1);
        }
    }
}

async fn serve_target() {
    let app = Router::new().route(
        "/message",
        post(|uri: Uri| async move { format!("Hello, {:?}", uri.path()) }),
    );

    tracing::info!("Starting the receiver on port 8085...");

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8085")
        .await
        .expect("free port 8085");

    if let Err(ref error) = axum::serve(listener, app).await {
        tracing::error!(%error, "HTTP target failed");
    }
}
