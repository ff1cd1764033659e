//! Device reachability testing
//!
//! A probe opens a short-lived link to the device's endpoint and closes it
//! again. HTTP links touch no network on open, so HTTP probes send a `HEAD`
//! request instead.

use crate::core::device::Device;
use crate::core::transport::{
    ConnectorError, ConnectorErrorKind, ConnectorTable, HttpMethod, ProtocolKind,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Probe settings
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Upper bound for one device test
    pub timeout: Duration,
    /// Devices tested at once by `test_all`
    pub concurrency: usize,
    /// Optional bytes written after a successful open
    pub probe_payload: Option<Vec<u8>>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            concurrency: 8,
            probe_payload: None,
        }
    }
}

/// Pass or fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    /// Reachable
    Success,
    /// Not reachable
    Fail,
}

/// Latency on success, error on failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TestDetail {
    /// Time to open (and probe) the link
    Latency {
        /// Milliseconds
        millis: u64,
    },
    /// Why the test failed
    Error {
        /// Connector error kind, when the failure came from a connector
        kind: Option<ConnectorErrorKind>,
        /// Message
        message: String,
    },
}

/// Result of testing one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// Device tested
    pub device_id: String,
    /// Outcome
    pub outcome: TestOutcome,
    /// Latency or error
    pub detail: TestDetail,
    /// When the test finished
    pub timestamp: DateTime<Utc>,
}

impl TestResult {
    /// Successful test
    pub fn success(device_id: impl Into<String>, latency: Duration) -> Self {
        Self {
            device_id: device_id.into(),
            outcome: TestOutcome::Success,
            detail: TestDetail::Latency {
                millis: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            },
            timestamp: Utc::now(),
        }
    }

    /// Failed test caused by a connector error
    pub fn failure(device_id: impl Into<String>, err: &ConnectorError) -> Self {
        Self {
            device_id: device_id.into(),
            outcome: TestOutcome::Fail,
            detail: TestDetail::Error {
                kind: Some(err.kind),
                message: err.to_string(),
            },
            timestamp: Utc::now(),
        }
    }

    /// Whether the device was reachable
    pub fn is_success(&self) -> bool {
        self.outcome == TestOutcome::Success
    }

    /// Connector error kind of a failure
    pub fn error_kind(&self) -> Option<ConnectorErrorKind> {
        match &self.detail {
            TestDetail::Error { kind, .. } => *kind,
            TestDetail::Latency { .. } => None,
        }
    }

    /// One-line status for display
    pub fn summary(&self) -> &'static str {
        match (self.outcome, self.error_kind()) {
            (TestOutcome::Success, _) => "Connection OK",
            (TestOutcome::Fail, Some(ConnectorErrorKind::EndpointEmpty)) => "Endpoint empty",
            (TestOutcome::Fail, Some(ConnectorErrorKind::NoConnector)) => "No connector",
            (TestOutcome::Fail, Some(ConnectorErrorKind::Timeout)) => "Timed out",
            (TestOutcome::Fail, _) => "Connection Failed",
        }
    }
}

/// Aggregate of a batch test
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeSummary {
    /// Per-device results in input order
    pub results: Vec<TestResult>,
    /// Reachable devices
    pub success: usize,
    /// Unreachable devices
    pub fail: usize,
    /// Devices tested
    pub total: usize,
}

impl ProbeSummary {
    fn from_results(results: Vec<TestResult>) -> Self {
        let success = results.iter().filter(|r| r.is_success()).count();
        let total = results.len();
        Self {
            results,
            success,
            fail: total - success,
            total,
        }
    }
}

/// Reachability prober
#[derive(Debug, Clone)]
pub struct Prober {
    table: ConnectorTable,
    config: ProbeConfig,
}

impl Prober {
    /// Create a prober over a connector table
    pub fn new(table: ConnectorTable, config: ProbeConfig) -> Self {
        Self { table, config }
    }

    /// Probe settings
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Test one device; never returns an error, failures are results
    pub async fn test_one(&self, device: &Device) -> TestResult {
        if !device.has_endpoint() {
            tracing::debug!(device_id = %device.id, "probe skipped, endpoint empty");
            return TestResult::failure(&device.id, &ConnectorError::endpoint_empty());
        }

        let started = Instant::now();
        let attempt = tokio::time::timeout(self.config.timeout, self.attempt(device)).await;
        let result = match attempt {
            Ok(Ok(())) => TestResult::success(&device.id, started.elapsed()),
            Ok(Err(e)) => TestResult::failure(&device.id, &e),
            Err(_) => TestResult::failure(&device.id, &ConnectorError::timeout(self.config.timeout)),
        };

        tracing::debug!(
            device_id = %device.id,
            kind = %device.protocol_kind,
            outcome = result.summary(),
            "device probed"
        );
        result
    }

    async fn attempt(&self, device: &Device) -> Result<(), ConnectorError> {
        let mut options = device
            .open_options()
            .map_err(|e| ConnectorError::invalid_endpoint(e.detail()))?
            .connect_timeout(self.config.timeout);
        if device.protocol_kind == ProtocolKind::Http {
            options.http.method = HttpMethod::Head;
        }

        let handle = self
            .table
            .open(device.protocol_kind, &device.endpoint, &options)
            .await?;

        let probe = match (device.protocol_kind, &self.config.probe_payload) {
            (ProtocolKind::Http, _) => handle.send(&[]).await.map(|_| ()),
            (_, Some(payload)) => handle.send(payload).await.map(|_| ()),
            (_, None) => Ok(()),
        };
        handle.close().await;
        probe
    }

    /// Test devices with bounded concurrency, keeping input order
    pub async fn test_all(&self, devices: &[Device]) -> ProbeSummary {
        let concurrency = self.config.concurrency.max(1);
        let results: Vec<TestResult> = stream::iter(devices)
            .map(|device| self.test_one(device))
            .buffered(concurrency)
            .collect()
            .await;

        let summary = ProbeSummary::from_results(results);
        tracing::info!(
            total = summary.total,
            success = summary.success,
            fail = summary.fail,
            "batch probe finished"
        );
        summary
    }
}
