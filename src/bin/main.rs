//! pharos-dns binary entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pharos_dns::{telemetry, Config, Defaults, DnsError, DnsServer};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// How long reload signals are coalesced before the server restarts.
const RELOAD_DEBOUNCE: Duration = Duration::from_secs(15);

/// Authoritative DNS responder serving probe-verified A records.
#[derive(Parser, Debug)]
#[command(name = "pharos-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file; when set, its values override the flag defaults below.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address of the DNS server.
    #[arg(short, long, default_value = "127.0.0.1:5353")]
    listen: SocketAddr,

    /// Status/metrics HTTP listen address (disabled when omitted).
    #[arg(long)]
    http_listen: Option<SocketAddr>,

    /// Update interval for records.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10m")]
    interval: Duration,

    /// CIDRs to test against when a domain omits its own.
    #[arg(long = "cidr")]
    cidrs: Vec<String>,

    /// Timeout of execution for each IP.
    #[arg(short, long, value_parser = humantime::parse_duration, default_value = "200ms")]
    timeout: Duration,

    /// SNI address to check the response against.
    #[arg(long, default_value = "")]
    sni: String,

    /// HTTP path to request during status checks.
    #[arg(long, default_value = "/")]
    path: String,

    /// Port to test against.
    #[arg(long, default_value_t = 443)]
    port: u16,

    /// HTTP status code expected from the server (zero means no HTTP check).
    #[arg(long = "status", default_value_t = 0)]
    status_code: u16,

    /// Probe with plain TCP/HTTP instead of a TLS handshake.
    #[arg(long, default_value_t = false)]
    http_only: bool,

    /// Minimum IP samples from each CIDR.
    #[arg(long = "min-count", default_value_t = 0)]
    sample_min: usize,

    /// Maximum IP samples from each CIDR.
    #[arg(long = "max-count", default_value_t = 8)]
    sample_max: usize,

    /// Chance of picking each IP sample from a CIDR.
    #[arg(long = "chance", default_value_t = 0.05)]
    sample_chance: f64,

    /// Maximum concurrent probe executions across all domains.
    #[arg(long = "max-workers", default_value_t = 50)]
    max_workers: usize,

    /// Enable debug logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn defaults(&self) -> Defaults {
        let base = Defaults::default();
        Defaults {
            listen: self.listen,
            http_listen: self.http_listen,
            interval: self.interval,
            max_workers: self.max_workers,
            cidrs: if self.cidrs.is_empty() {
                base.cidrs
            } else {
                self.cidrs.clone()
            },
            sni: self.sni.clone(),
            path: self.path.clone(),
            timeout: self.timeout,
            port: self.port,
            status_code: self.status_code,
            sample_min: self.sample_min,
            sample_max: self.sample_max,
            sample_chance: self.sample_chance,
            http_only: self.http_only,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    telemetry::init_tracing(args.verbose);

    if let Err(e) = run(args).await {
        error!("pharos-dns failed: {e}");
        std::process::exit(1);
    }
    info!("pharos-dns shutdown complete");
}

async fn run(args: Args) -> Result<(), DnsError> {
    let prometheus = telemetry::install_metrics_recorder()?;
    let defaults = args.defaults();

    // Root token fires on SIGINT/SIGTERM and stops every generation.
    let root = CancellationToken::new();
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    {
        let shutdown = root.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
                _ = terminate.recv() => info!("terminate received, shutting down"),
            }
            shutdown.cancel();
        });
    }

    loop {
        if root.is_cancelled() {
            return Ok(());
        }

        let config = Config::load(args.config.as_deref(), &defaults)?;
        let generation = root.child_token();
        let server = DnsServer::new(config);
        let mut running = tokio::spawn(server.run(generation.clone(), Some(prometheus.clone())));

        tokio::select! {
            finished = &mut running => {
                return finished?;
            }
            _ = hangup.recv() => {
                info!(debounce = ?RELOAD_DEBOUNCE, "reload requested");
                let deadline = tokio::time::sleep(RELOAD_DEBOUNCE);
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        _ = &mut deadline => break,
                        _ = hangup.recv() => debug!("coalescing reload signal"),
                    }
                }
                generation.cancel();
                if let Ok(Err(e)) = (&mut running).await {
                    error!(error = %e, "server exited with error during reload");
                }
                info!("restarting with reloaded configuration");
            }
        }
    }
}
