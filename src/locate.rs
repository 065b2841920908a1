//! Measurement-server discovery.
//!
//! Loads the caller's IP/geolocation and the XML server catalogue over
//! HTTP, computes the great-circle distance to every listed server and
//! returns the catalogue sorted nearest-first. HTTP access goes through
//! the [`Fetcher`] trait so everything here is testable without a network.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::params;

/// Mean Earth radius used by the distance computation.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// One-shot HTTP access used by the discovery and share steps.
#[allow(async_fn_in_trait)]
pub trait Fetcher {
    /// Issue a GET and return the body. Non-2xx statuses are errors.
    async fn get(&self, url: &str) -> Result<String>;
    /// POST an `application/x-www-form-urlencoded` body and return the
    /// response body. Non-2xx statuses are errors.
    async fn post_form(&self, url: &str, body: String, referer: Option<&str>) -> Result<String>;
}

/// [`Fetcher`] backed by a pooled [`reqwest::Client`].
///
/// The client is built once per engine; requests share its pool and carry
/// the standard user agent and timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build the underlying HTTP client.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(params::USER_AGENT)
            .timeout(params::HTTP_TIMEOUT)
            .build()?;
        Ok(HttpFetcher { client })
    }
}

impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    async fn post_form(&self, url: &str, body: String, referer: Option<&str>) -> Result<String> {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body);
        if let Some(referer) = referer {
            request = request.header(reqwest::header::REFERER, referer);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// The caller's public address and geolocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IpInfo {
    /// Public IP address as reported by the remote endpoint.
    pub ip_address: String,
    /// Name of the internet service provider.
    pub isp: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

/// One measurement server from the catalogue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerInfo {
    /// Catalogue identifier.
    pub id: u32,
    /// Upload URL of the legacy HTTP test, kept for record identity.
    pub url: String,
    /// Measurement endpoint as `hostname:port`.
    pub host: String,
    /// City name.
    pub name: String,
    /// Country name.
    pub country: String,
    /// Two-letter country code.
    pub country_code: String,
    /// Operator of the server.
    pub sponsor: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Great-circle distance from the caller, derived at load time.
    pub distance_km: f64,
}

/// Fetch and parse the IP-info endpoint.
///
/// The body is a URL-encoded `key=value&…` record with keys `ip_address`,
/// `isp`, `lat` and `lon`. Missing or unparsable coordinates fail the load;
/// the textual fields default to empty.
pub async fn fetch_ip_info<F: Fetcher>(fetcher: &F) -> Result<IpInfo> {
    let body = fetcher.get(params::IP_INFO_URL).await?;
    let values: HashMap<String, String> = url::form_urlencoded::parse(body.trim().as_bytes())
        .into_owned()
        .collect();

    let lat = values
        .get("lat")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::Catalogue("IP info response missing latitude".into()))?;
    let lon = values
        .get("lon")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::Catalogue("IP info response missing longitude".into()))?;

    Ok(IpInfo {
        ip_address: values.get("ip_address").cloned().unwrap_or_default(),
        isp: values.get("isp").cloned().unwrap_or_default(),
        lat,
        lon,
    })
}

/// Fetch the XML catalogue and return it sorted by ascending distance
/// from `ip`. The sort is stable, so equidistant servers keep their
/// catalogue order.
pub async fn fetch_servers<F: Fetcher>(
    fetcher: &F,
    url: &str,
    ip: &IpInfo,
) -> Result<Vec<ServerInfo>> {
    let body = fetcher.get(url).await?;
    if body.is_empty() {
        return Err(Error::Catalogue("empty server list response".into()));
    }

    let mut servers = parse_server_list(&body)?;
    for server in &mut servers {
        server.distance_km = haversine((ip.lat, ip.lon), (server.lat, server.lon));
    }
    servers.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    debug!(count = servers.len(), "loaded server catalogue");
    Ok(servers)
}

/// Collect every `server` element's attributes, wherever it sits in the
/// document. A record without a `url` attribute is dropped; every other
/// missing attribute falls back to its default.
fn parse_server_list(body: &str) -> Result<Vec<ServerInfo>> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut servers = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.name().as_ref() == b"server" =>
            {
                let mut info = ServerInfo::default();
                for attr in e.attributes().flatten() {
                    let value = attr.unescape_value().unwrap_or_default();
                    match attr.key.as_ref() {
                        b"url" => info.url = value.into_owned(),
                        b"lat" => info.lat = value.parse().unwrap_or_default(),
                        b"lon" => info.lon = value.parse().unwrap_or_default(),
                        b"name" => info.name = value.into_owned(),
                        b"country" => info.country = value.into_owned(),
                        b"cc" => info.country_code = value.into_owned(),
                        b"host" => info.host = value.into_owned(),
                        b"id" => info.id = value.parse().unwrap_or_default(),
                        b"sponsor" => info.sponsor = value.into_owned(),
                        _ => {}
                    }
                }
                if !info.url.is_empty() {
                    servers.push(info);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Catalogue(format!("XML parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(servers)
}

/// Great-circle distance in km between two `(lat, lon)` points in degrees.
pub fn haversine(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let u = ((lat2 - lat1) / 2.0).sin();
    let v = ((lon2 - lon1) / 2.0).sin();
    2.0 * EARTH_RADIUS_KM * (u * u + lat1.cos() * lat2.cos() * v * v).sqrt().asin()
}
