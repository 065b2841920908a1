//! Sequential measurement session.
//!
//! The session walks a fixed sequence — IP info, server catalogue, server
//! binding, jitter, download, upload, share — and records each result.
//! Invoking a step before its predecessor has completed is an
//! [`Error::InvalidOrder`].

use std::collections::HashMap;

use md5::{Digest, Md5};
use tracing::debug;

use crate::error::{Error, Result};
use crate::latency;
use crate::locate::{self, Fetcher, HttpFetcher, IpInfo, ServerInfo};
use crate::params::{self, TestConfig};
use crate::protocol::ProtocolClient;
use crate::select;
use crate::throughput::{self, Direction, ProgressSender};

/// Holds the catalogue, the chosen server and the most recent
/// measurements of one run.
pub struct Session<F = HttpFetcher> {
    fetcher: F,
    min_server_version: f64,
    ip_info: Option<IpInfo>,
    servers: Option<Vec<ServerInfo>>,
    server: Option<ServerInfo>,
    latency_ms: Option<u64>,
    jitter_ms: Option<u64>,
    download_mbps: Option<f64>,
    upload_mbps: Option<f64>,
}

impl Session<HttpFetcher> {
    /// Session backed by a real HTTP client.
    pub fn new() -> Result<Self> {
        Ok(Session::with_fetcher(HttpFetcher::new()?))
    }
}

impl<F: Fetcher> Session<F> {
    /// Session with an injected HTTP fetcher.
    pub fn with_fetcher(fetcher: F) -> Self {
        Session {
            fetcher,
            min_server_version: params::MIN_SERVER_VERSION,
            ip_info: None,
            servers: None,
            server: None,
            latency_ms: None,
            jitter_ms: None,
            download_mbps: None,
            upload_mbps: None,
        }
    }

    /// Override the minimum accepted server protocol version.
    pub fn min_server_version(mut self, version: f64) -> Self {
        self.min_server_version = version;
        self
    }

    /// Fetch (once) and return the caller's IP info.
    pub async fn ip_info(&mut self) -> Result<IpInfo> {
        if let Some(info) = &self.ip_info {
            return Ok(info.clone());
        }
        let info = locate::fetch_ip_info(&self.fetcher).await?;
        self.ip_info = Some(info.clone());
        Ok(info)
    }

    /// Fetch (once) the distance-sorted server catalogue.
    pub async fn server_list(&mut self) -> Result<&[ServerInfo]> {
        if self.servers.is_none() {
            let ip = self
                .ip_info
                .as_ref()
                .ok_or(Error::InvalidOrder("server_list", "ip_info"))?;
            let servers =
                locate::fetch_servers(&self.fetcher, params::SERVER_LIST_URL, ip).await?;
            self.servers = Some(servers);
        }
        Ok(self.servers.as_deref().unwrap_or(&[]))
    }

    /// Probe the nearest candidates and bind the fastest one.
    ///
    /// The binding re-verifies the winner and re-measures latency against
    /// it. If the probe phase found nothing usable and the fallback
    /// binding fails as well, the whole step is [`Error::NoCandidate`].
    pub async fn best_server(
        &mut self,
        sample_size: usize,
        progress: Option<ProgressSender>,
    ) -> Result<ServerInfo> {
        let servers = self
            .servers
            .clone()
            .ok_or(Error::InvalidOrder("best_server", "server_list"))?;
        let (candidate, measured) =
            select::best_server(&servers, sample_size, self.min_server_version, progress.as_ref())
                .await?;

        match self.set_server(candidate.clone()).await {
            Ok(()) => Ok(candidate),
            Err(_) if measured.is_none() => Err(Error::NoCandidate),
            Err(e) => Err(e),
        }
    }

    /// Bind `server` for the rest of the session, verifying its protocol
    /// version and measuring latency against it.
    pub async fn set_server(&mut self, server: ServerInfo) -> Result<()> {
        if self.servers.is_none() {
            return Err(Error::InvalidOrder("set_server", "server_list"));
        }
        let mut client = ProtocolClient::new(server.clone());
        let verified = select::probe(&mut client, self.min_server_version).await;
        client.close().await;

        let latency_ms = verified?;
        debug!(host = %server.host, latency_ms, "server bound");
        self.latency_ms = Some(latency_ms);
        self.server = Some(server);
        Ok(())
    }

    /// Latency of the bound server, measured at binding time.
    pub fn latency(&self) -> Option<u64> {
        self.latency_ms
    }

    /// Most recent jitter measurement.
    pub fn last_jitter(&self) -> Option<u64> {
        self.jitter_ms
    }

    /// Most recent download speed in Mbit/s.
    pub fn last_download(&self) -> Option<f64> {
        self.download_mbps
    }

    /// Most recent upload speed in Mbit/s.
    pub fn last_upload(&self) -> Option<f64> {
        self.upload_mbps
    }

    /// The server bound by [`Session::best_server`] or
    /// [`Session::set_server`].
    pub fn server(&self) -> Option<&ServerInfo> {
        self.server.as_ref()
    }

    /// Measure jitter against the bound server.
    pub async fn jitter(&mut self, samples: usize) -> Result<u64> {
        let server = self
            .server
            .clone()
            .ok_or(Error::InvalidOrder("jitter", "set_server"))?;
        let jitter_ms = latency::jitter(&server, samples).await?;
        self.jitter_ms = Some(jitter_ms);
        Ok(jitter_ms)
    }

    /// Run a download test with `config`. Also used for the preflight run
    /// that picks the line profile.
    pub async fn download_speed(
        &mut self,
        config: &TestConfig,
        progress: Option<ProgressSender>,
    ) -> Result<f64> {
        if self.jitter_ms.is_none() {
            return Err(Error::InvalidOrder("download_speed", "jitter"));
        }
        let server = self
            .server
            .clone()
            .ok_or(Error::InvalidOrder("download_speed", "set_server"))?;
        let speed = throughput::run(&server, config, Direction::Download, progress).await;
        self.download_mbps = Some(speed);
        Ok(speed)
    }

    /// Run an upload test with `config`.
    pub async fn upload_speed(
        &mut self,
        config: &TestConfig,
        progress: Option<ProgressSender>,
    ) -> Result<f64> {
        if self.download_mbps.is_none() {
            return Err(Error::InvalidOrder("upload_speed", "download_speed"));
        }
        let server = self
            .server
            .clone()
            .ok_or(Error::InvalidOrder("upload_speed", "set_server"))?;
        let speed = throughput::run(&server, config, Direction::Upload, progress).await;
        self.upload_mbps = Some(speed);
        Ok(speed)
    }

    /// Submit the measured results and return the shareable image URL.
    pub async fn share(&mut self) -> Result<String> {
        let upload = self
            .upload_mbps
            .ok_or(Error::InvalidOrder("share", "upload_speed"))?;
        let download = self
            .download_mbps
            .ok_or(Error::InvalidOrder("share", "download_speed"))?;
        let latency_ms = self
            .latency_ms
            .ok_or(Error::InvalidOrder("share", "set_server"))?;
        let server = self
            .server
            .clone()
            .ok_or(Error::InvalidOrder("share", "set_server"))?;

        let body = share_body(latency_ms, upload, download, server.id);
        let response = self
            .fetcher
            .post_form(params::SHARE_API_URL, body, Some(params::SHARE_API_REFERER))
            .await?;

        let values: HashMap<String, String> =
            url::form_urlencoded::parse(response.as_bytes())
                .into_owned()
                .collect();
        match values.get("resultid") {
            Some(id) if !id.is_empty() => {
                Ok(format!("{}{}.png", params::SHARE_RESULT_URL, id))
            }
            _ => Err(Error::Share("response carries no resultid")),
        }
    }
}

/// Form body of the share submission. Speeds travel as `Mbit/s * 1024`
/// with exactly two decimals; the hash seals ping and speeds with the
/// published API key.
fn share_body(latency_ms: u64, upload_mbps: f64, download_mbps: f64, server_id: u32) -> String {
    let hash = md5_hex(&format!(
        "{}-{:.2}-{:.2}-{}",
        latency_ms,
        upload_mbps * 1024.0,
        download_mbps * 1024.0,
        params::SHARE_API_KEY
    ));
    format!(
        "ping={}&upload={:.2}&download={:.2}&pingselect=1&recommendedserverid={}&accuracy=1&serverid={}&hash={}",
        latency_ms,
        upload_mbps * 1024.0,
        download_mbps * 1024.0,
        server_id,
        server_id,
        hash
    )
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
