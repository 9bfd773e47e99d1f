//! Target probes and the N/M threshold tracker.
//!
//! Performs HTTP health checks against target endpoints and folds the
//! results into a routable / not routable decision with separate success
//! and failure thresholds.

use std::time::Duration;

use tracing::{debug, warn};

use tierform_core::config::HealthCheckConfig;
use tierform_state::HealthStatus;

use crate::error::{HealthError, HealthResult};

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The health endpoint returned 2xx.
    Healthy,
    /// The health endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not be executed (connection error or timeout).
    Failed,
}

/// Tracks consecutive probe results for a single target.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    status: HealthStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Successes needed before the target is routable.
    healthy_threshold: u32,
    /// Failures needed before the target stops receiving traffic.
    unhealthy_threshold: u32,
}

impl HealthTracker {
    pub fn new(config: &HealthCheckConfig) -> HealthResult<Self> {
        Self::with_thresholds(config.healthy_threshold, config.unhealthy_threshold)
    }

    pub fn with_thresholds(healthy_threshold: u32, unhealthy_threshold: u32) -> HealthResult<Self> {
        if healthy_threshold == 0 || unhealthy_threshold == 0 {
            return Err(HealthError::InvalidConfig(format!(
                "thresholds must be at least 1 (healthy {healthy_threshold}, unhealthy {unhealthy_threshold})"
            )));
        }
        Ok(Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            healthy_threshold,
            unhealthy_threshold,
        })
    }

    /// Record a probe result and return the new health status.
    pub fn record(&mut self, result: ProbeResult) -> HealthStatus {
        match result {
            ProbeResult::Healthy => {
                self.consecutive_failures = 0;
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);

                if self.consecutive_successes >= self.healthy_threshold {
                    if self.status != HealthStatus::Healthy {
                        debug!(successes = self.consecutive_successes, "target became healthy");
                    }
                    self.status = HealthStatus::Healthy;
                }
            }
            ProbeResult::Unhealthy | ProbeResult::Failed => {
                self.consecutive_successes = 0;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);

                if self.consecutive_failures >= self.unhealthy_threshold {
                    if self.status != HealthStatus::Unhealthy {
                        warn!(
                            failures = self.consecutive_failures,
                            threshold = self.unhealthy_threshold,
                            "target marked unhealthy"
                        );
                    }
                    self.status = HealthStatus::Unhealthy;
                }
            }
        }

        self.status
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    /// Only healthy targets receive traffic. `Unknown` is not routable.
    pub fn is_routable(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }
}

/// Perform an HTTP health probe against `address` (`host:port`).
///
/// Returns `Healthy` if the response is 2xx, `Unhealthy` for non-2xx,
/// or `Failed` if the connection fails or times out.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method(http::Method::GET)
            .uri(&uri)
            .header(http::header::HOST, address)
            .header(http::header::USER_AGENT, "tierform-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "health probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => ProbeResult::Healthy,
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "health probe non-2xx");
                ProbeResult::Unhealthy
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "health probe timed out");
            ProbeResult::Failed
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `status` to every connection until the task is dropped.
    pub(crate) async fn serve_status(status: u16) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {status} Status\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        (address, handle)
    }

    fn tracker(healthy: u32, unhealthy: u32) -> HealthTracker {
        HealthTracker::with_thresholds(healthy, unhealthy).unwrap()
    }

    #[test]
    fn tracker_starts_unknown_and_unroutable() {
        let tracker = HealthTracker::new(&HealthCheckConfig::default()).unwrap();
        assert_eq!(tracker.status(), HealthStatus::Unknown);
        assert!(!tracker.is_routable());
    }

    #[test]
    fn healthy_after_n_consecutive_successes() {
        let mut tracker = tracker(3, 2);
        assert_eq!(tracker.record(ProbeResult::Healthy), HealthStatus::Unknown);
        assert_eq!(tracker.record(ProbeResult::Healthy), HealthStatus::Unknown);
        assert_eq!(tracker.record(ProbeResult::Healthy), HealthStatus::Healthy);
        assert!(tracker.is_routable());
    }

    #[test]
    fn unhealthy_after_m_consecutive_failures() {
        let mut tracker = tracker(1, 3);
        tracker.record(ProbeResult::Healthy);

        tracker.record(ProbeResult::Unhealthy);
        tracker.record(ProbeResult::Failed);
        assert_eq!(tracker.status(), HealthStatus::Healthy);
        assert_eq!(tracker.consecutive_failures(), 2);

        assert_eq!(tracker.record(ProbeResult::Unhealthy), HealthStatus::Unhealthy);
        assert!(!tracker.is_routable());
    }

    #[test]
    fn interleaved_success_resets_failure_count() {
        let mut tracker = tracker(1, 2);
        tracker.record(ProbeResult::Healthy);
        tracker.record(ProbeResult::Failed);
        tracker.record(ProbeResult::Healthy);
        tracker.record(ProbeResult::Failed);
        assert_eq!(tracker.status(), HealthStatus::Healthy);
    }

    #[test]
    fn recovery_needs_the_full_success_streak() {
        let mut tracker = tracker(2, 1);
        tracker.record(ProbeResult::Failed);
        assert_eq!(tracker.status(), HealthStatus::Unhealthy);

        tracker.record(ProbeResult::Healthy);
        assert_eq!(tracker.status(), HealthStatus::Unhealthy);
        tracker.record(ProbeResult::Failed);
        tracker.record(ProbeResult::Healthy);
        assert_eq!(tracker.status(), HealthStatus::Unhealthy);
        tracker.record(ProbeResult::Healthy);
        assert_eq!(tracker.status(), HealthStatus::Healthy);
    }

    #[test]
    fn zero_thresholds_are_rejected() {
        assert!(matches!(
            HealthTracker::with_thresholds(0, 3),
            Err(HealthError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn probe_to_closed_port_fails() {
        let result = http_probe("127.0.0.1:1", "/healthz", Duration::from_millis(200)).await;
        assert_eq!(result, ProbeResult::Failed);
    }

    #[tokio::test]
    async fn probe_classifies_status_codes() {
        let (ok, ok_server) = serve_status(200).await;
        let (bad, bad_server) = serve_status(503).await;

        assert_eq!(http_probe(&ok, "/healthz", Duration::from_secs(2)).await, ProbeResult::Healthy);
        assert_eq!(http_probe(&bad, "/healthz", Duration::from_secs(2)).await, ProbeResult::Unhealthy);

        ok_server.abort();
        bad_server.abort();
    }
}
