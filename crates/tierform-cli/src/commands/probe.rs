use tokio::sync::watch;
use tracing::{info, warn};

use tierform_core::config::HealthCheckConfig;
use tierform_health::{HealthTracker, http_probe};
use tierform_state::HealthStatus;

use super::{Workspace, cancelled};

/// Probe `address` the way the target group would, printing each result.
pub async fn probe(
    workspace: &Workspace,
    address: &str,
    count: u32,
    cancel: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let config = match workspace.load_config() {
        Ok(config) => config.entry_point.health_check,
        Err(e) => {
            warn!(error = %e, "using default health check settings");
            HealthCheckConfig::default()
        }
    };
    let status = run_probes(&config, address, count, cancel).await?;
    println!("{address}: {status:?}");
    Ok(())
}

/// Run up to `count` probes (unbounded when 0) and return the final status.
async fn run_probes(
    config: &HealthCheckConfig,
    address: &str,
    count: u32,
    mut cancel: watch::Receiver<bool>,
) -> anyhow::Result<HealthStatus> {
    let mut tracker = HealthTracker::new(config)?;
    info!(
        %address,
        path = %config.path,
        healthy_threshold = config.healthy_threshold,
        unhealthy_threshold = config.unhealthy_threshold,
        "probing"
    );

    let mut sent = 0;
    loop {
        let result = http_probe(address, &config.path, config.timeout()).await;
        let before = tracker.status();
        let after = tracker.record(result);
        sent += 1;
        println!("probe {sent}: {result:?} -> {after:?}");
        if before != after {
            info!(%address, from = ?before, to = ?after, "target health changed");
        }

        if count != 0 && sent >= count {
            return Ok(after);
        }
        tokio::select! {
            _ = tokio::time::sleep(config.interval()) => {}
            _ = cancelled(&mut cancel) => return Ok(after),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_ok() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            }
        });
        address
    }

    fn fast(healthy: u32, unhealthy: u32) -> HealthCheckConfig {
        HealthCheckConfig {
            interval: "5ms".to_string(),
            timeout: "500ms".to_string(),
            healthy_threshold: healthy,
            unhealthy_threshold: unhealthy,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_healthy_after_threshold() {
        let address = serve_ok().await;
        let config = fast(3, 2);

        let rx = watch::channel(false).1;
        assert_eq!(run_probes(&config, &address, 2, rx).await.unwrap(), HealthStatus::Unknown);
        let rx = watch::channel(false).1;
        assert_eq!(run_probes(&config, &address, 3, rx).await.unwrap(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_refused_connection_turns_unhealthy() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let rx = watch::channel(false).1;
        let status = run_probes(&fast(2, 2), &address, 2, rx).await.unwrap();
        assert_eq!(status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_zero_threshold_is_rejected() {
        let rx = watch::channel(false).1;
        assert!(run_probes(&fast(0, 2), "127.0.0.1:1", 1, rx).await.is_err());
    }
}
