//! Error types for pharos-dns.

use thiserror::Error;

/// Errors that can occur while configuring or running the server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (socket bind, read, write).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration values.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be read or decoded.
    #[error("failed to load configuration: {0}")]
    ConfigFile(#[from] config::ConfigError),

    /// A CIDR string did not parse as an IPv4 network.
    #[error("invalid CIDR: {0}")]
    Cidr(#[from] ipnet::AddrParseError),

    /// A probe program could not be compiled.
    #[error("invalid probe program: {0}")]
    Program(String),

    /// DNS protocol error.
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Metrics recorder installation failed.
    #[error("metrics recorder error: {0}")]
    Metrics(String),

    /// A spawned task panicked or was aborted.
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
