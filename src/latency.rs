//! Latency and jitter measurement.
//!
//! Latency is the minimum round-trip across a burst of pings; jitter is
//! the mean absolute difference between consecutive round-trips, rounded
//! up to a whole millisecond.

use tracing::debug;

use crate::error::{Error, Result};
use crate::locate::ServerInfo;
use crate::protocol::ProtocolClient;

/// Minimum round-trip in milliseconds over `samples` pings.
///
/// Connects the client if it is not connected yet. Any ping failure
/// aborts the measurement.
pub async fn test_latency(client: &mut ProtocolClient, samples: usize) -> Result<u64> {
    client.connect().await?;
    let mut best = u64::MAX;
    for _ in 0..samples {
        let ms = client.ping().await?;
        best = best.min(ms);
    }
    Ok(best)
}

/// Jitter in milliseconds over `samples` pings against `server`.
///
/// Opens its own connection and closes it on every exit path. Failed
/// pings are dropped from the sample set; fewer than two successful
/// samples is a failure.
pub async fn jitter(server: &ServerInfo, samples: usize) -> Result<u64> {
    let mut client = ProtocolClient::new(server.clone());
    if let Err(e) = client.connect().await {
        client.close().await;
        return Err(e);
    }

    let mut pings = Vec::with_capacity(samples);
    for _ in 0..samples {
        match client.ping().await {
            Ok(ms) => pings.push(ms),
            Err(e) => debug!(error = %e, "ping sample dropped"),
        }
    }
    client.close().await;

    mean_absolute_delta(&pings).ok_or(Error::Protocol("too few successful ping samples"))
}

/// `ceil(Σ|Δ| / delta_count)` over consecutive samples; `None` below two
/// samples.
fn mean_absolute_delta(samples: &[u64]) -> Option<u64> {
    if samples.len() < 2 {
        return None;
    }
    let sum: u64 = samples.windows(2).map(|w| w[0].abs_diff(w[1])).sum();
    Some(sum.div_ceil(samples.len() as u64 - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mockserver::{MockScript, MockServer};

    fn server_at(host: String) -> ServerInfo {
        ServerInfo {
            host,
            ..Default::default()
        }
    }

    #[test]
    fn jitter_of_sample_burst() {
        // |10| + |5| + |10| + |5| = 30 over 4 deltas, rounded up.
        assert_eq!(mean_absolute_delta(&[30, 40, 35, 45, 40]), Some(8));
    }

    #[test]
    fn jitter_is_reversal_invariant() {
        let forward = [30, 40, 35, 45, 40];
        let backward = [40, 45, 35, 40, 30];
        assert_eq!(
            mean_absolute_delta(&forward),
            mean_absolute_delta(&backward)
        );
    }

    #[test]
    fn jitter_rounds_up() {
        // deltas 1 and 0: mean 0.5 becomes 1.
        assert_eq!(mean_absolute_delta(&[10, 11, 11]), Some(1));
    }

    #[test]
    fn jitter_needs_two_samples() {
        assert_eq!(mean_absolute_delta(&[]), None);
        assert_eq!(mean_absolute_delta(&[42]), None);
    }

    #[test]
    fn steady_samples_have_zero_jitter() {
        assert_eq!(mean_absolute_delta(&[25, 25, 25, 25]), Some(0));
    }

    #[tokio::test]
    async fn latency_is_minimum_of_samples() {
        let mock =
            MockServer::start(MockScript::new("HELLO 2.4").pong_delays(&[50, 10, 30])).await;
        let mut client = ProtocolClient::new(server_at(mock.host()));

        let ms = test_latency(&mut client, 6).await.unwrap();
        client.close().await;
        assert!((10..50).contains(&ms), "got {ms}");
    }

    #[tokio::test]
    async fn latency_aborts_on_ping_failure() {
        let mock = MockServer::start(MockScript::new("HELLO 2.4").garbage_pongs()).await;
        let mut client = ProtocolClient::new(server_at(mock.host()));

        assert!(test_latency(&mut client, 3).await.is_err());
        client.close().await;
    }

    #[tokio::test]
    async fn jitter_over_mock_connection() {
        let mock = MockServer::start(MockScript::new("HELLO 2.4").pong_delays(&[20])).await;
        let jitter_ms = jitter(&server_at(mock.host()), 5).await.unwrap();
        // Steady scripted delay: jitter is loopback noise only.
        assert!(jitter_ms < 10, "got {jitter_ms}");
    }

    #[tokio::test]
    async fn jitter_fails_when_unreachable() {
        let mock = MockServer::start(MockScript::new("HELLO 2.4")).await;
        let host = mock.host();
        drop(mock);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(jitter(&server_at(host), 5).await.is_err());
    }
}
