//! Metrics instrumentation for pharos-dns.
//!
//! All metrics are prefixed with `pharos_dns.`

use std::time::{SystemTime, UNIX_EPOCH};

use metrics::{counter, gauge};

/// Record a received DNS request for a (domain, sni) pair.
pub fn record_dns_request(domain: &str, sni: &str) {
    counter!("pharos_dns.requests.count", "domain" => domain.to_string(), "sni" => sni.to_string())
        .increment(1);
}

/// Record a non-empty DNS answer and the number of records it carried.
pub fn record_dns_answer(domain: &str, sni: &str, records: usize) {
    counter!("pharos_dns.answers.count", "domain" => domain.to_string(), "sni" => sni.to_string())
        .increment(1);
    counter!("pharos_dns.answer_records.count", "domain" => domain.to_string(), "sni" => sni.to_string())
        .increment(records as u64);
}

/// Record the outcome of one probe execution.
pub fn record_scan_result(domain: &str, sni: &str, accepted: bool) {
    if accepted {
        counter!("pharos_dns.scan.accepted.count", "domain" => domain.to_string(), "sni" => sni.to_string())
            .increment(1);
    } else {
        counter!("pharos_dns.scan.rejected.count", "domain" => domain.to_string(), "sni" => sni.to_string())
            .increment(1);
    }
}

/// Record a publication: per-domain record count and last-update timestamp.
pub fn record_published(domain: &str, records: usize, updated_at: SystemTime) {
    let unix = updated_at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    gauge!("pharos_dns.records.count", "domain" => domain.to_string()).set(records as f64);
    gauge!("pharos_dns.last_update.timestamp", "domain" => domain.to_string()).set(unix as f64);
}
