//! Best-server selection over a distance-sorted candidate list.

use tracing::debug;

use crate::error::{Error, Result};
use crate::latency;
use crate::locate::ServerInfo;
use crate::params;
use crate::protocol::ProtocolClient;
use crate::throughput::{ProgressSender, notify};

/// Walk the candidate list nearest-first and return the server with the
/// lowest minimum-of-samples latency, together with that latency.
///
/// A candidate counts only if it connects, speaks at least `min_version`
/// and survives a full latency burst; each candidate's outcome is
/// reported through `progress` and nothing else. Probing stops once
/// `sample_size + 1` candidates have been evaluated successfully or the
/// list runs out. If no candidate succeeded, the first (nearest) entry is
/// returned with no latency, leaving the final word to a subsequent
/// server binding.
pub async fn best_server(
    list: &[ServerInfo],
    sample_size: usize,
    min_version: f64,
    progress: Option<&ProgressSender>,
) -> Result<(ServerInfo, Option<u64>)> {
    let Some(first) = list.first() else {
        return Err(Error::NoCandidate);
    };
    let mut best = first.clone();
    let mut best_latency: Option<u64> = None;
    let mut evaluated = 0usize;

    for server in list {
        let mut client = ProtocolClient::new(server.clone());
        let probed = probe(&mut client, min_version).await;
        client.close().await;

        match probed {
            Ok(latency_ms) => {
                if best_latency.is_none_or(|current| latency_ms < current) {
                    best_latency = Some(latency_ms);
                    best = server.clone();
                }
                notify(progress, true);
                evaluated += 1;
                if evaluated > sample_size {
                    break;
                }
            }
            Err(e) => {
                debug!(host = %server.host, error = %e, "candidate rejected");
                notify(progress, false);
            }
        }
    }

    Ok((best, best_latency))
}

/// Connect, enforce the minimum protocol version and measure latency.
pub(crate) async fn probe(client: &mut ProtocolClient, min_version: f64) -> Result<u64> {
    client.connect().await?;
    if client.version() < min_version {
        return Err(Error::Protocol("server version below minimum"));
    }
    latency::test_latency(client, params::LATENCY_SAMPLE_COUNT).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mockserver::{MockScript, MockServer};
    use tokio::sync::mpsc;

    fn server_at(host: String, id: u32) -> ServerInfo {
        ServerInfo {
            host,
            id,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn skips_old_version_and_picks_next() {
        let outdated = MockServer::start(MockScript::new("HELLO 2.0 legacy")).await;
        let good = MockServer::start(MockScript::new("HELLO 2.4")).await;
        let slow = MockServer::start(MockScript::new("HELLO 2.4").pong_delays(&[40])).await;

        let list = vec![
            server_at(outdated.host(), 1),
            server_at(good.host(), 2),
            server_at(slow.host(), 3),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (chosen, latency) = best_server(&list, 10, 2.3, Some(&tx)).await.unwrap();
        drop(tx);

        assert_eq!(chosen.id, 2);
        assert!(latency.is_some());

        let mut events = Vec::new();
        while let Some(ok) = rx.recv().await {
            events.push(ok);
        }
        assert_eq!(events, vec![false, true, true]);
    }

    #[tokio::test]
    async fn no_survivor_returns_nearest_without_latency() {
        let outdated = MockServer::start(MockScript::new("HELLO 1.9")).await;
        let broken = MockServer::start(MockScript::new("HELLO 2.4").garbage_pongs()).await;

        let list = vec![server_at(outdated.host(), 1), server_at(broken.host(), 2)];

        let (chosen, latency) = best_server(&list, 10, 2.3, None).await.unwrap();
        assert_eq!(chosen.id, 1);
        assert!(latency.is_none());
    }

    #[tokio::test]
    async fn empty_list_is_no_candidate() {
        assert!(matches!(
            best_server(&[], 10, 2.3, None).await,
            Err(Error::NoCandidate)
        ));
    }

    #[tokio::test]
    async fn sample_size_is_a_soft_cap() {
        let mocks = [
            MockServer::start(MockScript::new("HELLO 2.4")).await,
            MockServer::start(MockScript::new("HELLO 2.4")).await,
            MockServer::start(MockScript::new("HELLO 2.4")).await,
            MockServer::start(MockScript::new("HELLO 2.4")).await,
        ];
        let list: Vec<_> = mocks
            .iter()
            .enumerate()
            .map(|(i, m)| server_at(m.host(), i as u32))
            .collect();

        best_server(&list, 1, 2.3, None).await.unwrap();

        // sample_size + 1 candidates probed, the rest untouched.
        assert_eq!(mocks[0].connection_count(), 1);
        assert_eq!(mocks[1].connection_count(), 1);
        assert_eq!(mocks[2].connection_count(), 0);
        assert_eq!(mocks[3].connection_count(), 0);
    }
}
