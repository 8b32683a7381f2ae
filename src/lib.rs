//! pharos-dns - An authoritative DNS responder serving probe-verified `A` records.
//!
//! This crate answers `A` queries for a fixed set of names with addresses it
//! has recently proved reachable. For every configured domain it periodically
//! samples candidate IPs from CIDR blocks, runs each candidate through a
//! programmable liveness probe (TCP connect / TLS handshake with SNI / HTTP
//! GET with status assertion), and publishes the first K survivors as the
//! domain's answer set.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          pharos-dns                            │
//! │                                                                │
//! │  CIDR samplers ──▶ candidate channel ──▶ probe workers         │
//! │   (per CIDR)        (rendezvous)       (budget-gated)          │
//! │                                              │                 │
//! │                                              ▼                 │
//! │  Refresh scheduler ──────────────▶    Record Store             │
//! │   (per-domain cycles                  (RwLock map)             │
//! │    every interval)                           │                 │
//! │                                              ▼                 │
//! │                                     Hickory DNS  ◀── UDP :5353 │
//! │                                     RequestHandler             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only candidates that pass their probe in the current refresh cycle are
//! published; the responder never serves an address that was not verified in
//! the most recent completed cycle for its domain.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use pharos_dns::{Config, Defaults, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load(Some("pharos-dns.yaml".as_ref()), &Defaults::default()).unwrap();
//!     let cancel = CancellationToken::new();
//!
//!     let server = DnsServer::new(config);
//!     server.run(cancel, None).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod probe;
pub mod refresh;
pub mod responder;
pub mod sampler;
pub mod scan;
pub mod server;
pub mod store;
pub mod telemetry;

// Re-export main types
pub use config::{Config, Defaults, DomainConfig};
pub use error::DnsError;
pub use probe::{ProbeOutcome, ProbeProgram, Prober};
pub use responder::RecordHandler;
pub use sampler::CidrSampler;
pub use server::DnsServer;
pub use store::{AnswerSet, RecordStore};
