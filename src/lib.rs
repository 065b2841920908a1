//! A speedtest.net measurement client library.
//!
//! Talks the legacy newline-delimited TCP protocol of speedtest.net
//! measurement servers. A run discovers the caller's location, loads the
//! server catalogue sorted by great-circle distance, binds the
//! lowest-latency nearby server, and measures latency, jitter, and
//! download/upload throughput with a pool of concurrent connections whose
//! transfer sizes grow until a time budget expires.
//!
//! # Quick start
//!
//! ```no_run
//! use speedtest_client::params;
//! use speedtest_client::session::Session;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::new()?;
//! session.ip_info().await?;
//! session.server_list().await?;
//! let server = session.best_server(params::SERVER_SAMPLE_COUNT, None).await?;
//! println!("server: {} ({} ms)", server.host, session.latency().unwrap_or(0));
//!
//! session.jitter(params::JITTER_SAMPLE_COUNT).await?;
//! let pre = session.download_speed(&params::PREFLIGHT_DOWNLOAD, None).await?;
//! let (download_cfg, upload_cfg) = params::profile_for(pre);
//! let down = session.download_speed(download_cfg, None).await?;
//! let up = session.upload_speed(upload_cfg, None).await?;
//! println!("download: {down:.2} Mbit/s, upload: {up:.2} Mbit/s");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod emitter;
pub mod error;
pub mod latency;
pub mod locate;
pub mod params;
pub mod protocol;
pub mod select;
pub mod session;
pub mod summary;
pub mod throughput;

#[cfg(test)]
mod mockserver;
