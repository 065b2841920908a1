//! Line-protocol client for a single measurement server.
//!
//! The wire protocol is newline-delimited text over TCP: `HI` is answered
//! with `HELLO <version> …`, `PING <token>` with `PONG <token>`,
//! `DOWNLOAD <n>` with n raw bytes, and `UPLOAD <n>` with `OK <n> <ms>`
//! once the server has received n bytes in total, command line included.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::locate::ServerInfo;

/// A client connection to one measurement server.
///
/// One instance owns at most one TCP stream and is not meant to be shared
/// between callers. [`ProtocolClient::close`] is idempotent and safe on a
/// client that never connected.
pub struct ProtocolClient {
    server: ServerInfo,
    stream: Option<TcpStream>,
    version: f64,
}

impl ProtocolClient {
    /// Create an idle client bound to `server`. No I/O happens until
    /// [`ProtocolClient::connect`].
    pub fn new(server: ServerInfo) -> Self {
        ProtocolClient {
            server,
            stream: None,
            version: -1.0,
        }
    }

    /// Dial the server and perform the `HI` / `HELLO` handshake.
    ///
    /// On any failure the client is left closed. Calling `connect` on an
    /// already-connected client is a no-op.
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let (host, port) = split_host(&self.server.host);
        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(Error::Network)?;
        self.stream = Some(stream);

        if let Err(e) = self.handshake().await {
            debug!(host = %self.server.host, error = %e, "handshake failed");
            self.close().await;
            return Err(e);
        }
        Ok(())
    }

    async fn handshake(&mut self) -> Result<()> {
        self.write_line("HI").await?;
        let reply = self.read_line().await?;
        let mut parts = reply.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("HELLO"), Some(version)) => {
                self.version = version
                    .parse()
                    .map_err(|_| Error::Protocol("malformed HELLO version"))?;
                Ok(())
            }
            _ => Err(Error::Protocol("unexpected handshake reply")),
        }
    }

    /// Server protocol version negotiated at connect time, `-1` before.
    pub fn version(&self) -> f64 {
        self.version
    }

    /// One round-trip: `PING <token>` answered by `PONG …`.
    ///
    /// Returns the round-trip time in integer milliseconds. The token is
    /// opaque to the server and its echo is not verified.
    pub async fn ping(&mut self) -> Result<u64> {
        let token = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let start = Instant::now();
        self.write_line(&format!("PING {token}")).await?;
        let reply = self.read_line().await?;
        if reply.starts_with("PONG ") {
            Ok(start.elapsed().as_millis() as u64)
        } else {
            Err(Error::Protocol("expected PONG reply"))
        }
    }

    /// Request `size` bytes and drain them through `buf`.
    ///
    /// Returns the elapsed wall time of the transfer in milliseconds.
    /// A read of zero bytes before `size` is reached is a failure.
    pub async fn download(&mut self, size: u64, buf: &mut [u8]) -> Result<u64> {
        self.write_line(&format!("DOWNLOAD {size}")).await?;

        let stream = self.stream.as_mut().ok_or(Error::Protocol("not connected"))?;
        let mut missing = size;
        let start = Instant::now();
        while missing > 0 {
            let want = (buf.len() as u64).min(missing) as usize;
            let n = stream
                .read(&mut buf[..want])
                .await
                .map_err(|_| Error::Protocol("read failed mid-download"))?;
            if n == 0 {
                return Err(Error::Protocol("short read during download"));
            }
            missing -= n as u64;
        }
        Ok(start.elapsed().as_millis() as u64)
    }

    /// Announce an upload of `size` bytes and stream the payload from `buf`.
    ///
    /// The command line counts towards `size`; the payload's final byte is
    /// a newline. The returned duration covers the payload writes only —
    /// the server's `OK` acknowledgment round-trip is deliberately outside
    /// the timed window.
    pub async fn upload(&mut self, size: u64, buf: &[u8]) -> Result<u64> {
        let command = format!("UPLOAD {size}\n");
        if size <= command.len() as u64 || buf.is_empty() {
            return Err(Error::Protocol("upload size below command length"));
        }
        self.write_line(&command).await?;

        let stream = self.stream.as_mut().ok_or(Error::Protocol("not connected"))?;
        let mut missing = size - command.len() as u64;
        let start = Instant::now();
        while missing > 0 {
            if missing > buf.len() as u64 {
                stream
                    .write_all(buf)
                    .await
                    .map_err(|_| Error::Protocol("write failed mid-upload"))?;
                missing -= buf.len() as u64;
            } else {
                let last = missing as usize;
                stream
                    .write_all(&buf[..last - 1])
                    .await
                    .map_err(|_| Error::Protocol("write failed mid-upload"))?;
                stream
                    .write_all(b"\n")
                    .await
                    .map_err(|_| Error::Protocol("write failed mid-upload"))?;
                missing = 0;
            }
        }
        let elapsed = start.elapsed().as_millis() as u64;

        let reply = self.read_line().await?;
        let expected = format!("OK {size} ");
        if reply.starts_with(&expected) {
            Ok(elapsed)
        } else {
            Err(Error::Protocol("upload not acknowledged"))
        }
    }

    /// Send a best-effort `QUIT` and drop the connection. Idempotent;
    /// a no-op on a client that never connected.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.write_all(b"QUIT\n").await;
        }
    }

    /// Read one `\n`- or `\r`-terminated line, one byte at a time. The
    /// terminator is consumed but not returned; an empty line or EOF
    /// mid-line is a failure.
    async fn read_line(&mut self) -> Result<String> {
        let stream = self.stream.as_mut().ok_or(Error::Protocol("not connected"))?;
        let mut line = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            let n = stream
                .read(&mut byte)
                .await
                .map_err(|_| Error::Protocol("read failed"))?;
            if n == 0 {
                return Err(Error::Protocol("connection closed mid-line"));
            }
            if byte[0] == b'\n' || byte[0] == b'\r' {
                break;
            }
            line.push(byte[0]);
        }
        if line.is_empty() {
            return Err(Error::Protocol("empty reply line"));
        }
        String::from_utf8(line).map_err(|_| Error::Protocol("reply is not UTF-8"))
    }

    /// Write `line`, appending a newline unless one is already present.
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::Protocol("not connected"))?;
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|_| Error::Protocol("write failed"))?;
        if !line.contains('\n') {
            stream
                .write_all(b"\n")
                .await
                .map_err(|_| Error::Protocol("write failed"))?;
        }
        Ok(())
    }
}

/// Split `hostname:port`. A missing or non-numeric port yields port 0,
/// which makes the subsequent connect fail.
fn split_host(host: &str) -> (String, u16) {
    match host.split_once(':') {
        Some((name, port)) => (name.to_string(), port.parse().unwrap_or(0)),
        None => (host.to_string(), 0),
    }
}
