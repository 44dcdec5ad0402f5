//! Shows the engine's log output in each format.
//!
//! ```bash
//! cargo run -p core-runtime --example logging_demo
//! cargo run -p core-runtime --example logging_demo -- json
//! cargo run -p core-runtime --example logging_demo -- compact "core_cache=trace"
//! ```

use bridge_traits::time::LogLevel;
use core_runtime::logging::{init_logging, mask_identifier, LogFormat, LoggingConfig};
use std::env;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    let format = match args.get(1).map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::default(),
    };

    let mut config = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Debug)
        .with_spans(true);
    if let Some(filter) = args.get(2) {
        config = config.with_filter(filter.clone());
    }

    if let Err(err) = init_logging(config) {
        eprintln!("logging unavailable: {err}");
        return;
    }

    info!(format = ?format, "Logging initialized");

    refresh_today("2024-05-01")
        .instrument(info_span!("content_refresh", trigger = "midnight"))
        .await;

    drain_queue(3).await;

    info!(
        subject = %mask_identifier("user-12345"),
        phase = "GradualRollout",
        "Rollout decision"
    );
}

#[instrument]
async fn refresh_today(date: &str) {
    debug!(date, "Fetching content");
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    info!(date, content_id = "daily-2024-05-01", ttl_hours = 16, "Content cached");
}

#[instrument]
async fn drain_queue(pending: u64) {
    for position in 0..pending {
        debug!(position, "Delivering action");
    }
    warn!(failed = 0u64, delivered = pending, "Queue drained");
}
