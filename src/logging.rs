//! Process-wide tracing setup
//!
//! Log lines go to stderr. The filter comes from `RUST_LOG`; without it the
//! level is `info` with chatty transport crates held at `warn`. Setting
//! `NATS_RELAY_LOG_JSON` to `1` or `true` switches to one JSON object per line.

use std::sync::Once;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

/// Environment variable switching log lines to JSON
pub const JSON_ENV: &str = "NATS_RELAY_LOG_JSON";

const DEFAULT_FILTER_LEVEL: &str = "info";

const QUIET_TARGETS: [&str; 5] = ["async_nats", "hyper_util", "reqwest", "rustls", "tower"];

static INIT: Once = Once::new();

/// Initializes the global subscriber; later calls do nothing
pub fn init() {
    INIT.call_once(setup_logging);
}

fn setup_logging() {
    let filter = filters();

    if json_enabled(std::env::var(JSON_ENV).ok().as_deref()) {
        let layer = fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .with_filter(filter);
        tracing_subscriber::registry().with(layer).init();
    } else {
        let layer = fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(filter);
        tracing_subscriber::registry().with(layer).init();
    }
}

fn filters() -> EnvFilter {
    if let Ok(directives) = std::env::var(EnvFilter::DEFAULT_ENV) {
        return EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy(directives);
    }

    let mut filter = EnvFilter::new(DEFAULT_FILTER_LEVEL);

    for target in QUIET_TARGETS {
        match format!("{target}=warn").parse::<Directive>() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(error) => eprintln!("Failed parsing filter for {target}: {error}"),
        }
    }

    filter
}

fn json_enabled(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("1") | Some("true") | Some("TRUE") | Some("True"))
}
