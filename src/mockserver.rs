//! Scripted in-process measurement server used by the tests.
//!
//! Speaks just enough of the line protocol to exercise the client: `HI`,
//! `PING`, `DOWNLOAD`, `UPLOAD` and `QUIT`. The script controls the
//! greeting line, per-ping delays and the download pacing rate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub(crate) struct MockScript {
    /// Line sent in response to `HI`.
    pub greeting: String,
    /// Extra delay before each `PONG`, cycled; empty means immediate.
    pub pong_delays_ms: Vec<u64>,
    /// Answer pings with a line that is not a `PONG`.
    pub pong_garbage: bool,
    /// Pace `DOWNLOAD` payloads at roughly this many bytes per second.
    pub download_rate_bps: Option<u64>,
}

impl MockScript {
    pub fn new(greeting: &str) -> Self {
        MockScript {
            greeting: greeting.to_string(),
            pong_delays_ms: Vec::new(),
            pong_garbage: false,
            download_rate_bps: None,
        }
    }

    pub fn pong_delays(mut self, delays_ms: &[u64]) -> Self {
        self.pong_delays_ms = delays_ms.to_vec();
        self
    }

    pub fn garbage_pongs(mut self) -> Self {
        self.pong_garbage = true;
        self
    }

    pub fn download_rate(mut self, bytes_per_sec: u64) -> Self {
        self.download_rate_bps = Some(bytes_per_sec);
        self
    }
}

pub(crate) struct MockServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(script: MockScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::clone(&connections);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                let script = script.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, script).await;
                });
            }
        });
        MockServer {
            addr,
            connections,
            handle,
        }
    }

    /// `host:port` string in the form the catalogue carries.
    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    /// Number of TCP connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(stream: TcpStream, script: MockScript) -> std::io::Result<()> {
    let (read_half, mut write) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut pings_seen = 0usize;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command_len = line.len() as u64;
        let trimmed = line.trim_end().to_string();

        if trimmed == "HI" {
            write
                .write_all(format!("{}\n", script.greeting).as_bytes())
                .await?;
        } else if let Some(token) = trimmed.strip_prefix("PING ") {
            if !script.pong_delays_ms.is_empty() {
                let delay = script.pong_delays_ms[pings_seen % script.pong_delays_ms.len()];
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            pings_seen += 1;
            if script.pong_garbage {
                write.write_all(b"WAT\n").await?;
            } else {
                write.write_all(format!("PONG {token}\n").as_bytes()).await?;
            }
        } else if let Some(arg) = trimmed.strip_prefix("DOWNLOAD ") {
            let size: u64 = arg.parse().unwrap_or(0);
            send_payload(&mut write, size, script.download_rate_bps).await?;
        } else if let Some(arg) = trimmed.strip_prefix("UPLOAD ") {
            let size: u64 = arg.parse().unwrap_or(0);
            let mut remaining = size.saturating_sub(command_len);
            let mut buf = vec![0u8; 64 * 1024];
            let mut last_byte = 0u8;
            while remaining > 0 {
                let want = (buf.len() as u64).min(remaining) as usize;
                let n = reader.read(&mut buf[..want]).await?;
                if n == 0 {
                    return Ok(());
                }
                last_byte = buf[n - 1];
                remaining -= n as u64;
            }
            if last_byte == b'\n' {
                write.write_all(format!("OK {size} 123\n").as_bytes()).await?;
            } else {
                write.write_all(b"MISSING TERMINATOR\n").await?;
            }
        } else if trimmed == "QUIT" {
            return Ok(());
        }
    }
}

async fn send_payload(
    write: &mut OwnedWriteHalf,
    size: u64,
    rate_bps: Option<u64>,
) -> std::io::Result<()> {
    const CHUNK: usize = 16 * 1024;
    let chunk = vec![0u8; CHUNK];
    let mut remaining = size;
    while remaining > 0 {
        let n = (CHUNK as u64).min(remaining) as usize;
        write.write_all(&chunk[..n]).await?;
        remaining -= n as u64;
        if let Some(bps) = rate_bps {
            tokio::time::sleep(Duration::from_secs_f64(n as f64 / bps as f64)).await;
        }
    }
    Ok(())
}
