//! Adaptive concurrent throughput driver.
//!
//! Spawns one worker per configured connection; each worker runs an
//! increasing-size transfer loop against its own connection until the
//! size ceiling or the time budget is reached, then contributes the mean
//! of its per-transfer rates to a shared sum. The reported figure is
//! `Σ worker_mean_bps / 1_048_576`, the unit the profile thresholds and
//! the share payload are calibrated against.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::locate::ServerInfo;
use crate::params::{SampleTrim, TestConfig};
use crate::protocol::ProtocolClient;

/// Transfer direction of one throughput test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Server-to-client transfers.
    Download,
    /// Client-to-server transfers.
    Upload,
}

/// Fan-in sink for per-sample outcomes. Cloned into every worker; sends
/// never block. Dropped senders simply stop the consumer loop.
pub type ProgressSender = mpsc::UnboundedSender<bool>;

pub(crate) fn notify(progress: Option<&ProgressSender>, success: bool) {
    if let Some(tx) = progress {
        let _ = tx.send(success);
    }
}

/// Run one throughput test and return the aggregate speed in Mbit/s.
///
/// Spawns exactly `config.concurrency` workers and joins them all before
/// returning. The driver itself never fails: a worker that cannot connect
/// reports one `false` outcome and contributes zero, and a test where
/// every worker failed yields `0.0`.
pub async fn run(
    server: &ServerInfo,
    config: &TestConfig,
    direction: Direction,
    progress: Option<ProgressSender>,
) -> f64 {
    let total_bps = Arc::new(Mutex::new(0.0f64));

    let mut workers = Vec::with_capacity(config.concurrency);
    for _ in 0..config.concurrency {
        let server = server.clone();
        let config = config.clone();
        let total_bps = Arc::clone(&total_bps);
        let progress = progress.clone();
        workers.push(tokio::spawn(async move {
            let mean = worker(&server, &config, direction, progress.as_ref()).await;
            let mut total = total_bps.lock().unwrap_or_else(|e| e.into_inner());
            *total += mean;
        }));
    }
    drop(progress);

    for handle in workers {
        let _ = handle.await;
    }

    let sum = *total_bps.lock().unwrap_or_else(|e| e.into_inner());
    sum / 1024.0 / 1024.0
}

/// One worker: own connection, own reusable buffer, increasing-size
/// transfer loop. Returns the mean sample rate in bit/s, zero if nothing
/// succeeded.
async fn worker(
    server: &ServerInfo,
    config: &TestConfig,
    direction: Direction,
    progress: Option<&ProgressSender>,
) -> f64 {
    let mut client = ProtocolClient::new(server.clone());
    if let Err(e) = client.connect().await {
        debug!(host = %server.host, error = %e, "worker could not connect");
        notify(progress, false);
        return 0.0;
    }

    let mut buf = vec![0u8; config.buffer_size];
    if direction == Direction::Upload {
        SmallRng::from_os_rng().fill_bytes(&mut buf);
    }

    let mut samples = Vec::new();
    let started = Instant::now();
    let mut curr = config.start_size;
    while curr < config.max_size {
        let outcome = match direction {
            Direction::Download => client.download(curr, &mut buf).await,
            Direction::Upload => client.upload(curr, &buf).await,
        };
        match outcome {
            Ok(op_ms) => {
                samples.push((curr as f64 * 8.0) / (op_ms as f64 / 1000.0));
                notify(progress, true);
            }
            Err(e) => {
                debug!(size = curr, error = %e, "transfer sample failed");
                notify(progress, false);
            }
        }
        curr += config.incr_size;
        if started.elapsed() > Duration::from_millis(config.min_test_time_ms) {
            break;
        }
    }
    client.close().await;

    worker_mean(&mut samples, config.trim)
}

/// Sort ascending, apply the trim window, and average what is left.
fn worker_mean(samples: &mut [f64], trim: SampleTrim) -> f64 {
    samples.sort_by(f64::total_cmp);
    let kept_end = samples.len().saturating_sub(trim.drop_highest);
    let kept_start = trim.skip_lowest.min(kept_end);
    let kept = &samples[kept_start..kept_end];
    if kept.is_empty() {
        return 0.0;
    }
    kept.iter().sum::<f64>() / kept.len() as f64
}
