//! Configuration types for pharos-dns.
//!
//! Flag values act as defaults; a configuration file, when given, supplies the
//! domain list and may override any default. Per-domain fields omitted in the
//! file fall back to the flag defaults, mirroring the CLI table.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use hickory_proto::rr::Name;
use ipnet::Ipv4Net;
use serde::{Deserialize, Deserializer};

use crate::error::DnsError;
use crate::probe::ProbeProgram;
use crate::sampler::CidrSampler;

/// Default `result_limit` when a domain does not set one.
const DEFAULT_RESULT_LIMIT: usize = 4;

/// CIDRs probed when neither the domain nor the CLI provides any:
/// the published Cloudflare IPv4 ranges.
pub const DEFAULT_CIDRS: &[&str] = &[
    "173.245.48.0/20",
    "103.21.244.0/22",
    "103.22.200.0/22",
    "103.31.4.0/22",
    "141.101.64.0/18",
    "108.162.192.0/18",
    "190.93.240.0/20",
    "188.114.96.0/20",
    "197.234.240.0/22",
    "198.41.128.0/17",
    "162.158.0.0/15",
    "104.16.0.0/13",
    "104.24.0.0/14",
    "172.64.0.0/13",
    "131.0.72.0/22",
];

/// Resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// UDP DNS listen address.
    pub listen: SocketAddr,
    /// Status/metrics HTTP listen address; `None` disables the HTTP surface.
    pub http_listen: Option<SocketAddr>,
    /// Refresh period for record updates.
    pub interval: Duration,
    /// Global cap on concurrent probe executions.
    pub max_workers: usize,
    /// Per-domain scan settings.
    pub domains: Vec<DomainConfig>,
}

/// Resolved scan settings for a single domain.
#[derive(Debug, Clone)]
pub struct DomainConfig {
    /// Fully-qualified name served by the responder (trailing dot, lowercase).
    pub domain: String,
    /// CIDR blocks sampled for candidates.
    pub cidrs: Vec<String>,
    /// SNI / host header probed against.
    pub sni: String,
    /// HTTP path for status probes.
    pub path: String,
    /// Per-probe timeout.
    pub timeout: Duration,
    /// Probe port.
    pub port: u16,
    /// Expected HTTP status; 0 disables the HTTP check.
    pub status_code: u16,
    /// Addresses emitted unconditionally from the start of each CIDR.
    pub sample_min: usize,
    /// Cap on addresses emitted per CIDR per cycle; 0 means uncapped.
    pub sample_max: usize,
    /// Independent per-address emission probability.
    pub sample_chance: f64,
    /// Probe with plain TCP/HTTP instead of TLS.
    pub http_only: bool,
    /// Custom probe program template, if any.
    pub program: Option<String>,
    /// Maximum number of survivors published per cycle.
    pub result_limit: usize,
}

/// Defaults applied to fields the configuration file omits. Populated from
/// CLI flags by the binary; [`Defaults::default`] matches the flag defaults.
#[derive(Debug, Clone)]
pub struct Defaults {
    /// Default UDP DNS listen address.
    pub listen: SocketAddr,
    /// Default HTTP listen address (disabled).
    pub http_listen: Option<SocketAddr>,
    /// Default refresh period.
    pub interval: Duration,
    /// Default global probe concurrency cap.
    pub max_workers: usize,
    /// Default CIDR list for domains that omit `cidr`.
    pub cidrs: Vec<String>,
    /// Default SNI / host header.
    pub sni: String,
    /// Default HTTP path.
    pub path: String,
    /// Default per-probe timeout.
    pub timeout: Duration,
    /// Default probe port.
    pub port: u16,
    /// Default expected HTTP status.
    pub status_code: u16,
    /// Default minimum samples per CIDR.
    pub sample_min: usize,
    /// Default maximum samples per CIDR.
    pub sample_max: usize,
    /// Default per-address emission probability.
    pub sample_chance: f64,
    /// Default probe flavor.
    pub http_only: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5353)),
            http_listen: None,
            interval: Duration::from_secs(600),
            max_workers: 50,
            cidrs: DEFAULT_CIDRS.iter().map(|c| c.to_string()).collect(),
            sni: String::new(),
            path: "/".to_string(),
            timeout: Duration::from_millis(200),
            port: 443,
            status_code: 0,
            sample_min: 0,
            sample_max: 8,
            sample_chance: 0.05,
            http_only: false,
        }
    }
}

impl Config {
    /// Load configuration: parse the file (plus `PHAROS_DNS__`-prefixed
    /// environment overrides) when a path is given, fill omitted fields from
    /// `defaults`, and validate the result.
    pub fn load(path: Option<&Path>, defaults: &Defaults) -> Result<Self, DnsError> {
        let raw = match path {
            Some(path) => read_file(path)?,
            None => RawConfig::default(),
        };
        let cfg = raw.resolve(defaults)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check whether the resolved configuration is usable; collects every
    /// problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), DnsError> {
        let mut problems = Vec::new();
        if self.interval.is_zero() {
            problems.push("interval: must be greater than zero".to_string());
        }
        if self.domains.is_empty() {
            problems.push("domains: must contain at least one item".to_string());
        }
        for (i, domain) in self.domains.iter().enumerate() {
            domain.collect_problems(&format!("domains[{i}]: "), &mut problems);
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(DnsError::Config(problems.join("; ")))
        }
    }
}

impl DomainConfig {
    /// Build one sampler per configured CIDR.
    pub fn build_samplers(&self) -> Result<Vec<CidrSampler>, DnsError> {
        self.cidrs
            .iter()
            .map(|cidr| {
                CidrSampler::parse(cidr, self.sample_chance, self.sample_max, self.sample_min)
            })
            .collect()
    }

    /// Compile this domain's probe program.
    pub fn build_probe(&self) -> Result<ProbeProgram, DnsError> {
        ProbeProgram::compile(&self.probe_source())
    }

    /// The probe program source for this domain: the custom template with
    /// `{port}`/`{sni}`/`{path}`/`{timeout}`/`{status_code}` substituted, or
    /// one of the built-in defaults.
    pub fn probe_source(&self) -> String {
        let timeout = self.timeout.as_nanos().to_string();

        if let Some(template) = &self.program {
            return template
                .replace("{port}", &self.port.to_string())
                .replace("{sni}", &self.sni)
                .replace("{path}", &self.path)
                .replace("{timeout}", &timeout)
                .replace("{status_code}", &self.status_code.to_string());
        }

        let mut lines = Vec::with_capacity(2);
        if self.http_only {
            lines.push(format!("tcp.connect port={} timeout={timeout}", self.port));
            if self.status_code > 0 {
                lines.push(format!(
                    "http.get port={} path={} expect.status={} header.host={} timeout={timeout}",
                    self.port, self.path, self.status_code, self.sni,
                ));
            }
        } else {
            lines.push(format!(
                "tls.connect port={} sni={} timeout={timeout}",
                self.port, self.sni,
            ));
            if self.status_code > 0 {
                lines.push(format!(
                    "tls.http.get header.host={} path={} expect.status={} timeout={timeout}",
                    self.sni, self.path, self.status_code,
                ));
            }
        }
        lines.join("\n")
    }

    fn collect_problems(&self, prefix: &str, problems: &mut Vec<String>) {
        if !is_fqdn(&self.domain) {
            problems.push(format!(
                "{prefix}domain: must be a valid FQDN (got {:?})",
                self.domain
            ));
        }
        if self.cidrs.is_empty() {
            problems.push(format!("{prefix}cidr: must contain at least one item"));
        }
        for cidr in &self.cidrs {
            if cidr.trim().parse::<Ipv4Net>().is_err() {
                problems.push(format!("{prefix}cidr: invalid CIDR {cidr:?}"));
            }
        }
        if !self.path.starts_with('/') {
            problems.push(format!(
                "{prefix}path: must start with '/' (got {:?})",
                self.path
            ));
        }
        if self.timeout.is_zero() {
            problems.push(format!("{prefix}timeout: must be greater than zero"));
        }
        if self.port == 0 {
            problems.push(format!("{prefix}port: must be between 1 and 65535"));
        }
        if self.status_code != 0 && !(100..=599).contains(&self.status_code) {
            problems.push(format!(
                "{prefix}status_code: must be 0 or between 100 and 599"
            ));
        }
        if !(0.0..=1.0).contains(&self.sample_chance) {
            problems.push(format!("{prefix}sample_chance: must be between 0 and 1"));
        }
        if self.sample_max > 0 && self.sample_min > self.sample_max {
            problems.push(format!(
                "{prefix}sample_min: must be less than or equal to sample_max when sample_max > 0"
            ));
        }
        if self.result_limit == 0 {
            problems.push(format!("{prefix}result_limit: must be at least 1"));
        }
    }
}

fn is_fqdn(name: &str) -> bool {
    if name.len() < 2 || !name.ends_with('.') {
        return false;
    }
    Name::from_ascii(name)
        .map(|parsed| parsed.is_fqdn())
        .unwrap_or(false)
}

// --- raw (file-shaped) structs ------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    listen: Option<String>,
    http_listen: Option<String>,
    #[serde(default, deserialize_with = "de_opt_duration")]
    interval: Option<Duration>,
    max_workers: Option<usize>,
    #[serde(default)]
    domains: Vec<RawDomain>,
}

#[derive(Debug, Deserialize)]
struct RawDomain {
    domain: String,
    #[serde(default)]
    cidr: Vec<String>,
    sni: Option<String>,
    path: Option<String>,
    #[serde(default, deserialize_with = "de_opt_duration")]
    timeout: Option<Duration>,
    port: Option<u16>,
    status_code: Option<u16>,
    sample_min: Option<usize>,
    sample_max: Option<usize>,
    sample_chance: Option<f64>,
    http_only: Option<bool>,
    program: Option<String>,
    result_limit: Option<usize>,
}

fn read_file(path: &Path) -> Result<RawConfig, DnsError> {
    let raw = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix("PHAROS_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    Ok(raw)
}

impl RawConfig {
    fn resolve(self, defaults: &Defaults) -> Result<Config, DnsError> {
        let listen = match self.listen {
            Some(raw) => parse_listen("listen", &raw)?,
            None => defaults.listen,
        };
        let http_listen = match self.http_listen {
            Some(raw) if !raw.is_empty() => Some(parse_listen("http_listen", &raw)?),
            Some(_) => None,
            None => defaults.http_listen,
        };
        let domains = self
            .domains
            .into_iter()
            .map(|raw| raw.resolve(defaults))
            .collect();
        Ok(Config {
            listen,
            http_listen,
            interval: self.interval.unwrap_or(defaults.interval),
            max_workers: self.max_workers.unwrap_or(defaults.max_workers).max(1),
            domains,
        })
    }
}

impl RawDomain {
    fn resolve(self, defaults: &Defaults) -> DomainConfig {
        DomainConfig {
            domain: self.domain.trim().to_ascii_lowercase(),
            cidrs: if self.cidr.is_empty() {
                defaults.cidrs.clone()
            } else {
                self.cidr
            },
            sni: self.sni.unwrap_or_else(|| defaults.sni.clone()),
            path: self.path.unwrap_or_else(|| defaults.path.clone()),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            port: self.port.unwrap_or(defaults.port),
            status_code: self.status_code.unwrap_or(defaults.status_code),
            sample_min: self.sample_min.unwrap_or(defaults.sample_min),
            sample_max: self.sample_max.unwrap_or(defaults.sample_max),
            sample_chance: self.sample_chance.unwrap_or(defaults.sample_chance),
            http_only: self.http_only.unwrap_or(defaults.http_only),
            program: self.program.filter(|p| !p.trim().is_empty()),
            result_limit: self.result_limit.unwrap_or(DEFAULT_RESULT_LIMIT),
        }
    }
}

fn parse_listen(field: &str, raw: &str) -> Result<SocketAddr, DnsError> {
    raw.parse()
        .map_err(|_| DnsError::Config(format!("{field}: invalid address {raw:?}")))
}

/// Durations in the file are either integer nanoseconds or a humantime
/// string such as `200ms` or `10m`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Nanos(u64),
    Text(String),
}

fn de_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawDuration>::deserialize(deserializer)?;
    raw.map(|raw| match raw {
        RawDuration::Nanos(nanos) => Ok(Duration::from_nanos(nanos)),
        RawDuration::Text(text) => {
            humantime::parse_duration(&text).map_err(serde::de::Error::custom)
        }
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn load_yaml(body: &str, defaults: &Defaults) -> Result<Config, DnsError> {
        let raw: RawConfig = config::Config::builder()
            .add_source(config::File::from_str(body, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        let cfg = raw.resolve(defaults)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn test_defaults() -> Defaults {
        Defaults {
            sni: "origin.example.com".to_string(),
            cidrs: vec!["198.51.100.0/24".to_string()],
            ..Defaults::default()
        }
    }

    #[test]
    fn test_defaults_fill_omitted_fields() {
        let mut defaults = test_defaults();
        defaults.path = "/healthz".to_string();

        let cfg = load_yaml(
            "listen: 127.0.0.1:5657\ninterval: 1m\ndomains:\n  - domain: \"edge.example.com.\"\n",
            &defaults,
        )
        .unwrap();

        assert_eq!(cfg.listen, "127.0.0.1:5657".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.interval, Duration::from_secs(60));
        let domain = &cfg.domains[0];
        assert_eq!(domain.path, "/healthz");
        assert_eq!(domain.sni, "origin.example.com");
        assert_eq!(domain.cidrs, vec!["198.51.100.0/24".to_string()]);
        assert_eq!(domain.result_limit, DEFAULT_RESULT_LIMIT);
    }

    #[test]
    fn test_timeout_accepts_nanoseconds_and_humantime() {
        let cfg = load_yaml(
            "domains:\n  - domain: \"a.example.com.\"\n    timeout: 200000000\n  - domain: \"b.example.com.\"\n    timeout: 150ms\n",
            &test_defaults(),
        )
        .unwrap();
        assert_eq!(cfg.domains[0].timeout, Duration::from_millis(200));
        assert_eq!(cfg.domains[1].timeout, Duration::from_millis(150));
    }

    #[test]
    fn test_rejects_path_without_leading_slash() {
        let err = load_yaml(
            "domains:\n  - domain: \"edge.example.com.\"\n    path: \"health\"\n",
            &test_defaults(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("path: must start with '/'"));
    }

    #[test]
    fn test_rejects_invalid_sampling_bounds() {
        let err = load_yaml(
            "domains:\n  - domain: \"edge.example.com.\"\n    sample_min: 9\n    sample_max: 2\n",
            &test_defaults(),
        )
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("sample_min: must be less than or equal to sample_max"));
    }

    #[test]
    fn test_sample_max_zero_allows_any_min() {
        let cfg = load_yaml(
            "domains:\n  - domain: \"edge.example.com.\"\n    sample_min: 9\n    sample_max: 0\n",
            &test_defaults(),
        )
        .unwrap();
        assert_eq!(cfg.domains[0].sample_max, 0);
    }

    #[test]
    fn test_rejects_missing_domains() {
        let err = load_yaml("listen: 127.0.0.1:5657\n", &test_defaults()).unwrap_err();
        assert!(err
            .to_string()
            .contains("domains: must contain at least one item"));
    }

    #[test]
    fn test_rejects_non_fqdn_and_bad_cidr() {
        let err = load_yaml(
            "domains:\n  - domain: \"edge.example.com\"\n    cidr: [\"bogus\"]\n",
            &test_defaults(),
        )
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("must be a valid FQDN"));
        assert!(text.contains("invalid CIDR"));
    }

    #[test]
    fn test_domain_name_is_normalized_to_lowercase() {
        let cfg = load_yaml(
            "domains:\n  - domain: \"EDGE.Example.COM.\"\n",
            &test_defaults(),
        )
        .unwrap();
        assert_eq!(cfg.domains[0].domain, "edge.example.com.");
    }

    #[test]
    fn test_probe_source_default_tls() {
        let cfg = load_yaml(
            "domains:\n  - domain: \"edge.example.com.\"\n    status_code: 200\n    timeout: 200ms\n",
            &test_defaults(),
        )
        .unwrap();
        let source = cfg.domains[0].probe_source();
        assert!(source.starts_with("tls.connect port=443 sni=origin.example.com"));
        assert!(source.contains("tls.http.get header.host=origin.example.com path=/ expect.status=200"));
        cfg.domains[0].build_probe().unwrap();
    }

    #[test]
    fn test_probe_source_http_only_without_status_is_single_step() {
        let cfg = load_yaml(
            "domains:\n  - domain: \"edge.example.com.\"\n    http_only: true\n    port: 8080\n",
            &test_defaults(),
        )
        .unwrap();
        let source = cfg.domains[0].probe_source();
        assert_eq!(source.lines().count(), 1);
        assert!(source.starts_with("tcp.connect port=8080"));
    }

    #[test]
    fn test_custom_program_placeholders_are_rendered() {
        let cfg = load_yaml(
            "domains:\n  - domain: \"edge.example.com.\"\n    port: 8443\n    program: \"tls.connect port={port} sni={sni} timeout={timeout}\"\n",
            &test_defaults(),
        )
        .unwrap();
        let source = cfg.domains[0].probe_source();
        assert_eq!(
            source,
            format!(
                "tls.connect port=8443 sni=origin.example.com timeout={}",
                Duration::from_millis(200).as_nanos()
            )
        );
        cfg.domains[0].build_probe().unwrap();
    }

    #[test]
    fn test_build_samplers_surfaces_bad_cidr() {
        let domain = DomainConfig {
            domain: "edge.example.com.".to_string(),
            cidrs: vec!["198.51.100.0/33".to_string()],
            sni: String::new(),
            path: "/".to_string(),
            timeout: Duration::from_millis(200),
            port: 443,
            status_code: 0,
            sample_min: 0,
            sample_max: 8,
            sample_chance: 0.05,
            http_only: false,
            program: None,
            result_limit: 4,
        };
        assert!(domain.build_samplers().is_err());
    }

    #[test]
    fn test_load_without_file_requires_domains() {
        assert!(Config::load(None, &test_defaults()).is_err());
    }
}
