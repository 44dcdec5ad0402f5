use async_trait::async_trait;
use bridge_traits::error::Result as SinkResult;
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{init_logging, mask_identifier, LogFormat, LoggingConfig};
use core_runtime::Error;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingSink {
    fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl LoggerSink for RecordingSink {
    async fn log(&self, entry: LogEntry) -> SinkResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

// Only one test in this binary may install the global subscriber.
#[test]
fn sink_receives_filtered_engine_events() {
    let sink = Arc::new(RecordingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Info)
        .with_logger_sink(sink.clone());

    init_logging(config).unwrap();

    tracing::info!(
        target: "core_cache::offline_queue",
        action_id = "a-1",
        pending = 3u64,
        "Action queued"
    );
    tracing::debug!(target: "core_cache::offline_queue", "below configured level");
    tracing::info!(target: "hyper::client", "dependency noise");
    tracing::warn!(
        target: "core_migration::controller",
        subject = %mask_identifier("user-12345"),
        "Automatic rollback"
    );

    let entries = sink.entries();
    assert_eq!(entries.len(), 2);

    assert_eq!(entries[0].level, LogLevel::Info);
    assert_eq!(entries[0].target, "core_cache::offline_queue");
    assert_eq!(entries[0].message, "Action queued");
    assert_eq!(entries[0].fields.get("action_id").map(String::as_str), Some("a-1"));
    assert_eq!(entries[0].fields.get("pending").map(String::as_str), Some("3"));

    assert_eq!(entries[1].level, LogLevel::Warn);
    assert_eq!(entries[1].fields.get("subject").map(String::as_str), Some("user***"));

    let second = init_logging(LoggingConfig::default());
    assert!(matches!(second, Err(Error::Config(_))));
}

#[test]
fn invalid_filter_is_rejected_before_install() {
    let config = LoggingConfig::default().with_filter("core_cache=verbose");

    match init_logging(config) {
        Err(Error::Config(message)) => assert!(message.contains("Invalid log filter")),
        other => panic!("expected filter error, got {:?}", other),
    }
}
