//! Output sinks for measurement progress and results.
//!
//! Three renderers share one [`Emitter`] trait: a human-readable verbose
//! stream with probe dot trails, a single CSV record, and JSON lines for
//! batch processing.

use std::io::Write;

use serde::Serialize;

use crate::error::Result;
use crate::locate::{IpInfo, ServerInfo};
use crate::summary::Summary;
use crate::throughput::Direction;

#[derive(Serialize)]
#[serde(tag = "type")]
enum Event<'a> {
    IpInfo {
        info: &'a IpInfo,
    },
    ServersOnline {
        count: usize,
    },
    Probe {
        success: bool,
    },
    ServerSelected {
        server: &'a ServerInfo,
        latency_ms: u64,
    },
    Latency {
        ms: u64,
    },
    Jitter {
        ms: u64,
    },
    Profile {
        label: &'a str,
    },
    PreflightStarting {
        concurrency: usize,
    },
    TransferStarting {
        test: Direction,
        concurrency: usize,
    },
    Download {
        mbps: f64,
    },
    Upload {
        mbps: f64,
    },
    Share {
        url: &'a str,
    },
    Summary {
        summary: &'a Summary,
    },
}

/// Receives every externally visible event of a run.
pub trait Emitter {
    /// Caller address and geolocation are known.
    fn on_ip_info(&mut self, info: &IpInfo) -> Result<()>;
    /// Catalogue loaded with `count` servers.
    fn on_servers_online(&mut self, count: usize) -> Result<()>;
    /// One candidate probe or transfer sample finished.
    fn on_probe(&mut self, success: bool) -> Result<()>;
    /// A server was bound for the rest of the run.
    fn on_server_selected(&mut self, server: &ServerInfo, latency_ms: u64) -> Result<()>;
    /// Latency against the bound server.
    fn on_latency(&mut self, ms: u64) -> Result<()>;
    /// Jitter against the bound server.
    fn on_jitter(&mut self, ms: u64) -> Result<()>;
    /// Line profile chosen from the preflight speed.
    fn on_profile(&mut self, label: &str) -> Result<()>;
    /// Preflight run is starting.
    fn on_preflight_starting(&mut self, concurrency: usize) -> Result<()>;
    /// A timed transfer test is starting.
    fn on_transfer_starting(&mut self, direction: Direction, concurrency: usize) -> Result<()>;
    /// Download result in Mbit/s.
    fn on_download(&mut self, mbps: f64) -> Result<()>;
    /// Upload result in Mbit/s.
    fn on_upload(&mut self, mbps: f64) -> Result<()>;
    /// Share URL returned by the result endpoint.
    fn on_share(&mut self, url: &str) -> Result<()>;
    /// The run is over; `summary` holds everything measured.
    fn on_summary(&mut self, summary: &Summary) -> Result<()>;
}

/// Human-readable renderer with `.`/`*` probe trails.
pub struct VerboseEmitter<W: Write> {
    out: W,
}

impl<W: Write> VerboseEmitter<W> {
    /// Render to `out`.
    pub fn new(out: W) -> Self {
        VerboseEmitter { out }
    }
}

impl<W: Write> Emitter for VerboseEmitter<W> {
    fn on_ip_info(&mut self, info: &IpInfo) -> Result<()> {
        write!(
            self.out,
            "IP: {} ({}) Location: [{}, {}]",
            info.ip_address, info.isp, info.lat, info.lon
        )?;
        self.out.flush()?;
        Ok(())
    }

    fn on_servers_online(&mut self, count: usize) -> Result<()> {
        write!(self.out, "\nFinding fastest server ({count} servers online) ")?;
        self.out.flush()?;
        Ok(())
    }

    fn on_probe(&mut self, success: bool) -> Result<()> {
        write!(self.out, "{}", if success { '.' } else { '*' })?;
        self.out.flush()?;
        Ok(())
    }

    fn on_server_selected(&mut self, server: &ServerInfo, latency_ms: u64) -> Result<()> {
        write!(
            self.out,
            "\nServer: {} {} by {} ({:.2} km from you): {} ms",
            server.name, server.host, server.sponsor, server.distance_km, latency_ms
        )?;
        self.out.flush()?;
        Ok(())
    }

    fn on_latency(&mut self, ms: u64) -> Result<()> {
        write!(self.out, "\nPing: {ms} ms.")?;
        self.out.flush()?;
        Ok(())
    }

    fn on_jitter(&mut self, ms: u64) -> Result<()> {
        write!(self.out, "\nJitter: {ms} ms.")?;
        self.out.flush()?;
        Ok(())
    }

    fn on_profile(&mut self, label: &str) -> Result<()> {
        write!(self.out, "\n{label}")?;
        self.out.flush()?;
        Ok(())
    }

    fn on_preflight_starting(&mut self, concurrency: usize) -> Result<()> {
        write!(self.out, "\nDetermine line type ({concurrency}) ")?;
        self.out.flush()?;
        Ok(())
    }

    fn on_transfer_starting(&mut self, direction: Direction, concurrency: usize) -> Result<()> {
        let what = match direction {
            Direction::Download => "download",
            Direction::Upload => "upload",
        };
        write!(self.out, "\nTesting {what} speed ({concurrency}) ")?;
        self.out.flush()?;
        Ok(())
    }

    fn on_download(&mut self, mbps: f64) -> Result<()> {
        write!(self.out, "\nDownload: {mbps:.2} Mbit/s")?;
        self.out.flush()?;
        Ok(())
    }

    fn on_upload(&mut self, mbps: f64) -> Result<()> {
        write!(self.out, "\nUpload: {mbps:.2} Mbit/s")?;
        self.out.flush()?;
        Ok(())
    }

    fn on_share(&mut self, url: &str) -> Result<()> {
        write!(self.out, "\nResults image: {url}")?;
        self.out.flush()?;
        Ok(())
    }

    fn on_summary(&mut self, _summary: &Summary) -> Result<()> {
        writeln!(self.out)?;
        Ok(())
    }
}

/// One comma-separated record, fields in run order.
pub struct CsvEmitter<W: Write> {
    out: W,
}

impl<W: Write> CsvEmitter<W> {
    /// Render to `out`.
    pub fn new(out: W) -> Self {
        CsvEmitter { out }
    }
}

impl<W: Write> Emitter for CsvEmitter<W> {
    fn on_ip_info(&mut self, info: &IpInfo) -> Result<()> {
        write!(
            self.out,
            "{},{},{},{},",
            info.ip_address, info.lat, info.lon, info.isp
        )?;
        Ok(())
    }

    fn on_servers_online(&mut self, _count: usize) -> Result<()> {
        Ok(())
    }

    fn on_probe(&mut self, _success: bool) -> Result<()> {
        Ok(())
    }

    fn on_server_selected(&mut self, server: &ServerInfo, _latency_ms: u64) -> Result<()> {
        write!(
            self.out,
            "{},{},{:.2},",
            server.id, server.sponsor, server.distance_km
        )?;
        Ok(())
    }

    fn on_latency(&mut self, ms: u64) -> Result<()> {
        write!(self.out, "{ms},")?;
        Ok(())
    }

    fn on_jitter(&mut self, ms: u64) -> Result<()> {
        write!(self.out, "{ms},")?;
        Ok(())
    }

    fn on_profile(&mut self, _label: &str) -> Result<()> {
        Ok(())
    }

    fn on_preflight_starting(&mut self, _concurrency: usize) -> Result<()> {
        Ok(())
    }

    fn on_transfer_starting(&mut self, _direction: Direction, _concurrency: usize) -> Result<()> {
        Ok(())
    }

    fn on_download(&mut self, mbps: f64) -> Result<()> {
        write!(self.out, "{mbps:.2},")?;
        Ok(())
    }

    fn on_upload(&mut self, mbps: f64) -> Result<()> {
        write!(self.out, "{mbps:.2},")?;
        Ok(())
    }

    fn on_share(&mut self, url: &str) -> Result<()> {
        write!(self.out, "{url}")?;
        Ok(())
    }

    fn on_summary(&mut self, _summary: &Summary) -> Result<()> {
        writeln!(self.out)?;
        Ok(())
    }
}

/// One JSON object per event, newline-delimited.
pub struct JsonEmitter<W: Write> {
    out: W,
}

impl<W: Write> JsonEmitter<W> {
    /// Render to `out`.
    pub fn new(out: W) -> Self {
        JsonEmitter { out }
    }

    fn emit(&mut self, event: &Event) -> Result<()> {
        let json = serde_json::to_string(event).map_err(std::io::Error::other)?;
        writeln!(self.out, "{json}")?;
        Ok(())
    }
}

impl<W: Write> Emitter for JsonEmitter<W> {
    fn on_ip_info(&mut self, info: &IpInfo) -> Result<()> {
        self.emit(&Event::IpInfo { info })
    }

    fn on_servers_online(&mut self, count: usize) -> Result<()> {
        self.emit(&Event::ServersOnline { count })
    }

    fn on_probe(&mut self, success: bool) -> Result<()> {
        self.emit(&Event::Probe { success })
    }

    fn on_server_selected(&mut self, server: &ServerInfo, latency_ms: u64) -> Result<()> {
        self.emit(&Event::ServerSelected { server, latency_ms })
    }

    fn on_latency(&mut self, ms: u64) -> Result<()> {
        self.emit(&Event::Latency { ms })
    }

    fn on_jitter(&mut self, ms: u64) -> Result<()> {
        self.emit(&Event::Jitter { ms })
    }

    fn on_profile(&mut self, label: &str) -> Result<()> {
        self.emit(&Event::Profile { label })
    }

    fn on_preflight_starting(&mut self, concurrency: usize) -> Result<()> {
        self.emit(&Event::PreflightStarting { concurrency })
    }

    fn on_transfer_starting(&mut self, direction: Direction, concurrency: usize) -> Result<()> {
        self.emit(&Event::TransferStarting {
            test: direction,
            concurrency,
        })
    }

    fn on_download(&mut self, mbps: f64) -> Result<()> {
        self.emit(&Event::Download { mbps })
    }

    fn on_upload(&mut self, mbps: f64) -> Result<()> {
        self.emit(&Event::Upload { mbps })
    }

    fn on_share(&mut self, url: &str) -> Result<()> {
        self.emit(&Event::Share { url })
    }

    fn on_summary(&mut self, summary: &Summary) -> Result<()> {
        self.emit(&Event::Summary { summary })
    }
}
