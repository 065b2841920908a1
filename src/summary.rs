use serde::Serialize;

use crate::locate::{IpInfo, ServerInfo};

/// Final result record of one measurement run.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    /// Caller's public IP address.
    pub ip_address: String,
    /// Caller's internet service provider.
    pub isp: String,
    /// Catalogue id of the measured server.
    pub server_id: u32,
    /// City of the measured server.
    pub server_name: String,
    /// `hostname:port` of the measured server.
    pub server_host: String,
    /// Operator of the measured server.
    pub sponsor: String,
    /// Distance to the measured server in km.
    pub distance_km: f64,
    /// Minimum ping round-trip in ms.
    pub latency_ms: u64,
    /// Mean absolute ping delta in ms.
    pub jitter_ms: u64,
    /// Download speed in Mbit/s, when measured.
    pub download_mbps: Option<f64>,
    /// Upload speed in Mbit/s, when measured.
    pub upload_mbps: Option<f64>,
    /// Shareable result image, when submitted.
    pub share_url: Option<String>,
}

impl Summary {
    /// Assemble the invariant part of the record; speeds and the share
    /// URL are filled in as the optional test stages run.
    pub fn new(ip: &IpInfo, server: &ServerInfo, latency_ms: u64, jitter_ms: u64) -> Self {
        Summary {
            ip_address: ip.ip_address.clone(),
            isp: ip.isp.clone(),
            server_id: server.id,
            server_name: server.name.clone(),
            server_host: server.host.clone(),
            sponsor: server.sponsor.clone(),
            distance_km: server.distance_km,
            latency_ms,
            jitter_ms,
            download_mbps: None,
            upload_mbps: None,
            share_url: None,
        }
    }
}
