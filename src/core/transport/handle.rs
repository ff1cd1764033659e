//! Shared handle over an open link

use super::{ConnectorError, Inbound, Link, ProtocolKind, SendReport};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Traffic counters for a handle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Sends performed
    pub sends: u64,
    /// Chunks received
    pub receives: u64,
    /// Seconds since open
    pub uptime_secs: u64,
}

struct Inner {
    kind: ProtocolKind,
    remote: String,
    opened_at: Instant,
    cancel: CancellationToken,
    link: Mutex<Option<Box<dyn Link>>>,
    stats: RwLock<LinkStats>,
}

/// Cloneable handle to an open link
///
/// Closing any clone closes the link for all of them. A `receive` pending on
/// one task returns `Cancelled` as soon as another task calls `close`.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("kind", &self.inner.kind)
            .field("remote", &self.inner.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionHandle {
    /// Wrap an open link
    pub fn new(kind: ProtocolKind, link: Box<dyn Link>) -> Self {
        let remote = link.remote();
        Self {
            inner: Arc::new(Inner {
                kind,
                remote,
                opened_at: Instant::now(),
                cancel: CancellationToken::new(),
                link: Mutex::new(Some(link)),
                stats: RwLock::new(LinkStats::default()),
            }),
        }
    }

    /// Protocol of the link
    pub fn kind(&self) -> ProtocolKind {
        self.inner.kind
    }

    /// Remote address or device description
    pub fn remote(&self) -> &str {
        &self.inner.remote
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Token cancelled when the handle closes
    pub fn closed_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Traffic counters
    pub fn stats(&self) -> LinkStats {
        let mut stats = self.inner.stats.read().clone();
        stats.uptime_secs = self.inner.opened_at.elapsed().as_secs();
        stats
    }

    /// Write data
    pub async fn send(&self, data: &[u8]) -> Result<SendReport, ConnectorError> {
        if self.is_closed() {
            return Err(closed_error());
        }

        let mut guard = tokio::select! {
            _ = self.inner.cancel.cancelled() => return Err(closed_error()),
            guard = self.inner.link.lock() => guard,
        };
        let link = guard.as_mut().ok_or_else(closed_error)?;
        let report = link.send(data).await?;

        let mut stats = self.inner.stats.write();
        stats.bytes_sent += report.written as u64;
        stats.sends += 1;
        Ok(report)
    }

    /// Wait up to `timeout` for the next chunk of data
    ///
    /// Returns `Timeout` when nothing arrived in time and `Cancelled` when
    /// the handle was closed while waiting.
    pub async fn receive(&self, timeout: Duration) -> Result<Inbound, ConnectorError> {
        if self.is_closed() {
            return Err(ConnectorError::cancelled());
        }

        let cancel = self.inner.cancel.clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ConnectorError::cancelled()),
            res = tokio::time::timeout(timeout, self.receive_locked()) => {
                res.unwrap_or_else(|_| Err(ConnectorError::timeout(timeout)))
            }
        };

        if let Ok(inbound) = &result {
            let mut stats = self.inner.stats.write();
            stats.bytes_received += inbound.data.len() as u64;
            stats.receives += 1;
        }
        result
    }

    async fn receive_locked(&self) -> Result<Inbound, ConnectorError> {
        let mut guard = self.inner.link.lock().await;
        match guard.as_mut() {
            Some(link) => link.receive().await,
            None => Err(ConnectorError::cancelled()),
        }
    }

    /// Close the link; idempotent
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        let link = self.inner.link.lock().await.take();
        if let Some(mut link) = link {
            link.close().await;
            tracing::debug!(kind = %self.inner.kind, remote = %self.inner.remote, "link closed");
        }
    }
}

fn closed_error() -> ConnectorError {
    ConnectorError::io("handle is closed")
}
