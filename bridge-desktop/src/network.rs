//! Connectivity Monitoring Implementation

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{ConnectivityMonitor, ConnectivityStatus, ConnectivityStream},
};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

const DEFAULT_CHECK_ADDR: &str = "8.8.8.8:53";

/// Desktop connectivity monitor implementation
///
/// Detects connectivity with a TCP connect against a well-known endpoint.
/// Subscriptions poll the endpoint and only emit on status changes.
///
/// Note: Platform-specific implementations (Linux netlink, macOS SystemConfiguration,
/// Windows WinAPI) would be more robust but require additional dependencies.
pub struct DesktopConnectivityMonitor {
    check_addr: String,
    check_timeout: Duration,
    poll_interval: Duration,
}

impl DesktopConnectivityMonitor {
    /// Create a new monitor checking the default endpoint
    pub fn new() -> Self {
        Self {
            check_addr: DEFAULT_CHECK_ADDR.to_string(),
            check_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Check a different `host:port`, e.g. the content backend itself
    pub fn with_check_addr(mut self, addr: impl Into<String>) -> Self {
        self.check_addr = addr.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn check_reachability(addr: &str, timeout: Duration) -> ConnectivityStatus {
        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr)).await {
            Ok(Ok(_)) => ConnectivityStatus::Online,
            Ok(Err(_)) | Err(_) => ConnectivityStatus::Offline,
        }
    }
}

impl Default for DesktopConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectivityMonitor for DesktopConnectivityMonitor {
    async fn current_status(&self) -> Result<ConnectivityStatus> {
        let status = Self::check_reachability(&self.check_addr, self.check_timeout).await;
        debug!(status = ?status, "Connectivity checked");
        Ok(status)
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn ConnectivityStream>> {
        Ok(Box::new(PollingConnectivityStream {
            check_addr: self.check_addr.clone(),
            check_timeout: self.check_timeout,
            poll_interval: self.poll_interval,
            last_status: None,
        }))
    }
}

/// Connectivity stream that polls the endpoint for changes
struct PollingConnectivityStream {
    check_addr: String,
    check_timeout: Duration,
    poll_interval: Duration,
    last_status: Option<ConnectivityStatus>,
}

#[async_trait]
impl ConnectivityStream for PollingConnectivityStream {
    async fn next(&mut self) -> Option<ConnectivityStatus> {
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let status =
                DesktopConnectivityMonitor::check_reachability(&self.check_addr, self.check_timeout).await;
            if self.last_status != Some(status) {
                self.last_status = Some(status);
                return Some(status);
            }
        }
    }
}

/// Connectivity monitor driven by the host
///
/// For hosts that already receive OS reachability callbacks: forward each
/// callback to [`ManualConnectivityMonitor::set_status`] and every subscriber
/// sees the transition.
pub struct ManualConnectivityMonitor {
    tx: watch::Sender<ConnectivityStatus>,
}

impl ManualConnectivityMonitor {
    pub fn new(initial: ConnectivityStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Publish a new status; repeated identical statuses are not re-emitted.
    pub fn set_status(&self, status: ConnectivityStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

#[async_trait]
impl ConnectivityMonitor for ManualConnectivityMonitor {
    async fn current_status(&self) -> Result<ConnectivityStatus> {
        Ok(*self.tx.borrow())
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn ConnectivityStream>> {
        Ok(Box::new(WatchConnectivityStream {
            rx: self.tx.subscribe(),
        }))
    }
}

struct WatchConnectivityStream {
    rx: watch::Receiver<ConnectivityStatus>,
}

#[async_trait]
impl ConnectivityStream for WatchConnectivityStream {
    async fn next(&mut self) -> Option<ConnectivityStatus> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
