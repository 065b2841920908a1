use std::future::Future;

use clap::Parser;
use speedtest_client::emitter::{CsvEmitter, Emitter, JsonEmitter, VerboseEmitter};
use speedtest_client::locate::ServerInfo;
use speedtest_client::params;
use speedtest_client::session::Session;
use speedtest_client::summary::Summary;
use speedtest_client::throughput::Direction;
use tokio::sync::mpsc;

#[derive(Clone, Debug, clap::ValueEnum)]
enum Output {
    Verbose,
    Csv,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "speedtest_client")]
#[command(about = "Speedtest.net command line interface")]
struct Cli {
    /// Perform latency test only
    #[arg(long)]
    latency: bool,
    /// Perform download test only. It includes the latency test
    #[arg(long)]
    download: bool,
    /// Perform upload test only. It includes the latency test
    #[arg(long)]
    upload: bool,
    /// Generate and print a URL to the speedtest.net results image
    #[arg(long)]
    share: bool,
    /// Run the test against a specific server
    #[arg(long, value_name = "HOST:PORT")]
    test_server: Option<String>,
    /// Run the test against a specific catalogue server id
    #[arg(long, value_name = "ID")]
    server_id: Option<u32>,
    /// Output format to use: 'verbose', 'csv' or 'json' for batch processing
    #[arg(long, default_value = "verbose")]
    output: Output,
}

/// Await `fut` while forwarding its probe outcomes to the emitter's
/// dot trail. Returns once the future is done and the channel drained.
async fn with_probes<T>(
    fut: impl Future<Output = T>,
    mut rx: mpsc::UnboundedReceiver<bool>,
    emitter: &mut dyn Emitter,
) -> T {
    let (value, ()) = tokio::join!(fut, async {
        while let Some(ok) = rx.recv().await {
            let _ = emitter.on_probe(ok);
        }
    });
    value
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let verbose = matches!(cli.output, Output::Verbose);
    let mut emitter: Box<dyn Emitter> = match cli.output {
        Output::Verbose => Box::new(VerboseEmitter::new(std::io::stdout())),
        Output::Csv => Box::new(CsvEmitter::new(std::io::stdout())),
        Output::Json => Box::new(JsonEmitter::new(std::io::stdout())),
    };

    if verbose {
        println!("speedtest-client {}", env!("CARGO_PKG_VERSION"));
        println!("Speedtest.net command line interface");
        println!();
    }

    let mut session = Session::new()?;

    let ip = match session.ip_info().await {
        Ok(info) => info,
        Err(_) => {
            eprintln!("Unable to retrieve your IP info. Try again later");
            std::process::exit(1);
        }
    };
    emitter.on_ip_info(&ip)?;

    let servers = match session.server_list().await {
        Ok(list) if !list.is_empty() => list.to_vec(),
        _ => {
            eprintln!("Unable to download the server list. Try again later");
            std::process::exit(1);
        }
    };

    let server = if cli.test_server.is_none() && cli.server_id.is_none() {
        emitter.on_servers_online(servers.len())?;
        let (tx, rx) = mpsc::unbounded_channel();
        with_probes(
            session.best_server(params::SERVER_SAMPLE_COUNT, Some(tx)),
            rx,
            emitter.as_mut(),
        )
        .await?
    } else {
        // Resolve the requested server against the catalogue so distance
        // and sponsor metadata are available; an unlisted --test-server
        // host is still dialed as given.
        let wanted_host = cli.test_server.clone().unwrap_or_default();
        let mut chosen = ServerInfo {
            host: wanted_host.clone(),
            ..Default::default()
        };
        for server in &servers {
            if cli.server_id.is_some_and(|id| id == server.id) || server.host == wanted_host {
                chosen = server.clone();
                break;
            }
        }
        if chosen.host.is_empty() {
            eprintln!("Host name is empty.");
            std::process::exit(1);
        }
        session.set_server(chosen.clone()).await?;
        chosen
    };

    let latency = session.latency().unwrap_or(0);
    emitter.on_server_selected(&server, latency)?;
    emitter.on_latency(latency)?;

    let jitter = match session.jitter(params::JITTER_SAMPLE_COUNT).await {
        Ok(jitter) => jitter,
        Err(_) => {
            eprintln!("Jitter measurement is unavailable at this time.");
            std::process::exit(1);
        }
    };
    emitter.on_jitter(jitter)?;

    let mut summary = Summary::new(&ip, &server, latency, jitter);

    if cli.latency {
        emitter.on_summary(&summary)?;
        return Ok(());
    }

    emitter.on_preflight_starting(params::PREFLIGHT_DOWNLOAD.concurrency)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let pre_speed = with_probes(
        session.download_speed(&params::PREFLIGHT_DOWNLOAD, Some(tx)),
        rx,
        emitter.as_mut(),
    )
    .await?;

    let (download_config, upload_config) = params::profile_for(pre_speed);
    emitter.on_profile(download_config.label)?;

    if !cli.upload {
        emitter.on_transfer_starting(Direction::Download, download_config.concurrency)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let speed = with_probes(
            session.download_speed(download_config, Some(tx)),
            rx,
            emitter.as_mut(),
        )
        .await?;
        emitter.on_download(speed)?;
        summary.download_mbps = Some(speed);
    }

    if cli.download {
        emitter.on_summary(&summary)?;
        return Ok(());
    }

    emitter.on_transfer_starting(Direction::Upload, upload_config.concurrency)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let speed = with_probes(
        session.upload_speed(upload_config, Some(tx)),
        rx,
        emitter.as_mut(),
    )
    .await?;
    emitter.on_upload(speed)?;
    summary.upload_mbps = Some(speed);

    if cli.share {
        match session.share().await {
            Ok(url) => {
                emitter.on_share(&url)?;
                summary.share_url = Some(url);
            }
            Err(e) => tracing::warn!(error = %e, "share submission failed"),
        }
    }

    emitter.on_summary(&summary)?;
    Ok(())
}
