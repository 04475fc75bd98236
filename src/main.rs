use nats_event_relay::{config, logging, Configuration, EventRelay, Result};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(ref error) => {
            tracing::error!(%error, "Relay stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let path = config::config_path();
    tracing::debug!(path = %path.display(), "Loading configuration");

    let config = Configuration::load(&path)?;

    EventRelay::new(config)?.run(shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(ref error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Couldn't listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                let _ = signal.recv().await;
            }
            Err(ref error) => {
                tracing::error!(%error, "Couldn't listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutting down");
}
