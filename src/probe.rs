//! Probe programs: the liveness checks run against each candidate address.
//!
//! A probe program is a short line-oriented script, one instruction per line:
//!
//! ```text
//! tls.connect port=443 sni=origin.example.com timeout=200ms
//! tls.http.get header.host=origin.example.com path=/ expect.status=200 timeout=200ms
//! ```
//!
//! Instructions execute in order against a single IP; the first failing
//! instruction aborts the sequence and the probe reports failure. `tls.http.get`
//! reuses the TLS session opened by a preceding `tls.connect`, and `http.get`
//! reuses an open `tcp.connect` stream when one exists.
//!
//! Timeout arguments accept humantime literals (`200ms`, `1s`) or bare integer
//! nanoseconds. A compiled [`ProbeProgram`] is immutable and safe to execute
//! concurrently for different IPs.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use crate::error::DnsError;

/// Fallback per-instruction timeout when a step omits `timeout=`.
const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest HTTP status line we are willing to buffer.
const MAX_STATUS_LINE: usize = 1024;

static SHARED_TLS_CONFIG: LazyLock<Arc<rustls::ClientConfig>> = LazyLock::new(|| {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
});

/// Result of probing one candidate address.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Whether every instruction succeeded.
    pub success: bool,
    /// Diagnostic for the failing instruction, if any.
    pub detail: Option<String>,
}

impl ProbeOutcome {
    /// A successful probe.
    pub fn pass() -> Self {
        Self {
            success: true,
            detail: None,
        }
    }

    /// A failed probe with a diagnostic.
    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: Some(detail.into()),
        }
    }
}

/// Executes liveness probes against candidate addresses.
///
/// The scan pipeline only depends on this trait; tests substitute stub
/// implementations for the real [`ProbeProgram`].
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe one address. A cancelled token aborts in-flight network
    /// operations promptly; a cancelled probe is a failure.
    async fn probe(&self, ip: Ipv4Addr, cancel: &CancellationToken) -> ProbeOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProbeStep {
    TcpConnect {
        port: u16,
        timeout: Duration,
    },
    TlsConnect {
        port: u16,
        sni: String,
        timeout: Duration,
    },
    HttpGet {
        port: Option<u16>,
        host: String,
        path: String,
        expect_status: Option<u16>,
        timeout: Duration,
    },
    TlsHttpGet {
        host: String,
        path: String,
        expect_status: Option<u16>,
        timeout: Duration,
    },
}

/// A compiled probe program.
#[derive(Debug, Clone)]
pub struct ProbeProgram {
    steps: Vec<ProbeStep>,
}

impl ProbeProgram {
    /// Compile `source` into an instruction sequence.
    pub fn compile(source: &str) -> Result<Self, DnsError> {
        let mut steps = Vec::new();
        for (lineno, line) in source.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            steps.push(parse_step(line).map_err(|e| {
                DnsError::Program(format!("line {}: {e}", lineno + 1))
            })?);
        }
        if steps.is_empty() {
            return Err(DnsError::Program("program has no instructions".into()));
        }
        Ok(Self { steps })
    }

    /// Number of instructions in the program.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the program has no instructions. Never true for a compiled
    /// program; present to pair with [`len`](Self::len).
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    async fn run(&self, ip: Ipv4Addr) -> ProbeOutcome {
        let mut session = Session {
            ip,
            tcp: None,
            tls: None,
        };
        for step in &self.steps {
            if let Err(detail) = session.apply(step).await {
                return ProbeOutcome::fail(detail);
            }
        }
        ProbeOutcome::pass()
    }
}

#[async_trait]
impl Prober for ProbeProgram {
    async fn probe(&self, ip: Ipv4Addr, cancel: &CancellationToken) -> ProbeOutcome {
        tokio::select! {
            _ = cancel.cancelled() => ProbeOutcome::fail("probe cancelled"),
            outcome = self.run(ip) => outcome,
        }
    }
}

/// Per-execution connection state shared between instructions.
struct Session {
    ip: Ipv4Addr,
    tcp: Option<TcpStream>,
    tls: Option<TlsStream<TcpStream>>,
}

impl Session {
    async fn apply(&mut self, step: &ProbeStep) -> Result<(), String> {
        match step {
            ProbeStep::TcpConnect { port, timeout } => {
                self.tcp = Some(self.dial(*port, *timeout).await?);
                Ok(())
            }
            ProbeStep::TlsConnect { port, sni, timeout } => {
                let tcp = self.dial(*port, *timeout).await?;
                let server_name = ServerName::try_from(sni.clone())
                    .map_err(|e| format!("invalid sni {sni:?}: {e}"))?;
                let connector = TlsConnector::from(SHARED_TLS_CONFIG.clone());
                let tls = timeout_op(*timeout, "tls handshake", connector.connect(server_name, tcp))
                    .await?;
                self.tls = Some(tls);
                Ok(())
            }
            ProbeStep::HttpGet {
                port,
                host,
                path,
                expect_status,
                timeout,
            } => {
                let mut stream = match self.tcp.take() {
                    Some(stream) => stream,
                    None => {
                        let port = port.ok_or("http.get needs port= or a preceding tcp.connect")?;
                        self.dial(port, *timeout).await?
                    }
                };
                http_exchange(&mut stream, host, path, *expect_status, *timeout).await
            }
            ProbeStep::TlsHttpGet {
                host,
                path,
                expect_status,
                timeout,
            } => {
                let tls = self
                    .tls
                    .as_mut()
                    .ok_or("tls.http.get needs a preceding tls.connect")?;
                http_exchange(tls, host, path, *expect_status, *timeout).await
            }
        }
    }

    async fn dial(&self, port: u16, limit: Duration) -> Result<TcpStream, String> {
        let addr = SocketAddr::from((self.ip, port));
        timeout_op(limit, "tcp connect", TcpStream::connect(addr)).await
    }
}

async fn timeout_op<T, E: std::fmt::Display>(
    limit: Duration,
    what: &str,
    op: impl std::future::Future<Output = Result<T, E>>,
) -> Result<T, String> {
    match timeout(limit, op).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{what} failed: {e}")),
        Err(_) => Err(format!("{what} timed out after {limit:?}")),
    }
}

/// Issue a minimal HTTP/1.1 GET and assert the response status line.
async fn http_exchange<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &str,
    path: &str,
    expect_status: Option<u16>,
    limit: Duration,
) -> Result<(), String> {
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: pharos-dns/{}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        env!("CARGO_PKG_VERSION"),
    );
    timeout_op(limit, "http request write", stream.write_all(request.as_bytes())).await?;

    let mut buf: Vec<u8> = Vec::with_capacity(256);
    let mut chunk = [0u8; 256];
    let status = loop {
        let read = timeout_op(limit, "http response read", stream.read(&mut chunk)).await?;
        if read == 0 {
            return Err("connection closed before status line".into());
        }
        buf.extend_from_slice(&chunk[..read]);
        if let Some(end) = buf.windows(2).position(|w| w == b"\r\n") {
            break parse_status_line(&buf[..end])?;
        }
        if buf.len() > MAX_STATUS_LINE {
            return Err("oversized status line".into());
        }
    };

    match expect_status {
        Some(want) if status != want => Err(format!("unexpected status {status}, want {want}")),
        _ => Ok(()),
    }
}

fn parse_status_line(raw: &[u8]) -> Result<u16, String> {
    let line = std::str::from_utf8(raw).map_err(|_| "status line is not UTF-8".to_string())?;
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some(version) if version.starts_with("HTTP/") => {}
        _ => return Err(format!("malformed status line {line:?}")),
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| format!("malformed status line {line:?}"))
}

struct Params<'a> {
    op: &'a str,
    values: HashMap<&'a str, &'a str>,
}

impl<'a> Params<'a> {
    fn get(&self, key: &str) -> Option<&'a str> {
        self.values.get(key).copied()
    }

    fn require(&self, key: &str) -> Result<&'a str, String> {
        self.get(key)
            .ok_or_else(|| format!("{} requires {key}=", self.op))
    }

    fn port(&self) -> Result<u16, String> {
        parse_port(self.op, self.require("port")?)
    }

    fn port_opt(&self) -> Result<Option<u16>, String> {
        self.get("port").map(|raw| parse_port(self.op, raw)).transpose()
    }

    /// Host header value; both spellings seen in existing programs.
    fn host(&self) -> &'a str {
        self.get("header.host")
            .or_else(|| self.get("headers.host"))
            .or_else(|| self.get("sni"))
            .unwrap_or("")
    }

    fn path(&self) -> &'a str {
        self.get("path").unwrap_or("/")
    }

    fn expect_status(&self) -> Result<Option<u16>, String> {
        self.get("expect.status")
            .map(|raw| {
                raw.parse::<u16>()
                    .map_err(|_| format!("{}: invalid expect.status {raw:?}", self.op))
            })
            .transpose()
    }

    fn timeout(&self) -> Result<Duration, String> {
        match self.get("timeout") {
            None => Ok(DEFAULT_STEP_TIMEOUT),
            Some(raw) => parse_step_duration(raw)
                .map_err(|e| format!("{}: invalid timeout {raw:?}: {e}", self.op)),
        }
    }
}

fn parse_port(op: &str, raw: &str) -> Result<u16, String> {
    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(format!("{op}: invalid port {raw:?}")),
    }
}

/// Accepts humantime literals (`200ms`) or bare integer nanoseconds.
fn parse_step_duration(raw: &str) -> Result<Duration, String> {
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        let nanos: u64 = raw.parse().map_err(|_| "out of range".to_string())?;
        return Ok(Duration::from_nanos(nanos));
    }
    humantime::parse_duration(raw).map_err(|e| e.to_string())
}

fn parse_step(line: &str) -> Result<ProbeStep, String> {
    let mut tokens = line.split_whitespace();
    let op = tokens.next().ok_or("empty instruction")?;

    let mut values = HashMap::new();
    for token in tokens {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| format!("{op}: expected key=value, got {token:?}"))?;
        values.insert(key, value);
    }
    let params = Params { op, values };

    match op {
        "tcp.connect" => Ok(ProbeStep::TcpConnect {
            port: params.port()?,
            timeout: params.timeout()?,
        }),
        "tls.connect" => Ok(ProbeStep::TlsConnect {
            port: params.port()?,
            sni: params.require("sni")?.to_string(),
            timeout: params.timeout()?,
        }),
        "http.get" => Ok(ProbeStep::HttpGet {
            port: params.port_opt()?,
            host: params.host().to_string(),
            path: params.path().to_string(),
            expect_status: params.expect_status()?,
            timeout: params.timeout()?,
        }),
        "tls.http.get" => Ok(ProbeStep::TlsHttpGet {
            host: params.host().to_string(),
            path: params.path().to_string(),
            expect_status: params.expect_status()?,
            timeout: params.timeout()?,
        }),
        other => Err(format!("unknown instruction {other:?}")),
    }
}
