//! In-memory record store published by scan cycles and read by the responder.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::debug;

use crate::metrics;

/// The addresses currently published for a domain, with the wall-clock time
/// of publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerSet {
    /// Published addresses, in admission order.
    pub ips: Vec<Ipv4Addr>,
    /// When this set was published.
    pub updated_at: SystemTime,
}

/// Thread-safe map from domain name to its published [`AnswerSet`].
///
/// Concurrent readers are permitted; a publication excludes readers and other
/// writers for the duration of the replace. Published lists are never mutated
/// in place, each publication substitutes a freshly allocated list.
#[derive(Debug, Clone)]
pub struct RecordStore {
    records: Arc<RwLock<HashMap<String, AnswerSet>>>,
    /// Static `domain -> SNI` table so DNS-side metrics can be labelled
    /// without taking the record lock.
    sni_by_domain: Arc<HashMap<String, String>>,
}

impl RecordStore {
    /// Create an empty store for the given domain set.
    pub fn new(sni_by_domain: HashMap<String, String>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            sni_by_domain: Arc::new(sni_by_domain),
        }
    }

    /// Replace the answer set for `name` and record the publication time.
    pub fn publish(&self, name: &str, ips: Vec<Ipv4Addr>) {
        let updated_at = SystemTime::now();
        let count = ips.len();
        {
            let mut records = self.records.write();
            records.insert(name.to_string(), AnswerSet { ips, updated_at });
        }
        debug!(domain = name, records = count, "published answer set");
        metrics::record_published(name, count, updated_at);
    }

    /// Current answer set for `name`, if one has been published.
    pub fn lookup(&self, name: &str) -> Option<AnswerSet> {
        self.records.read().get(name).cloned()
    }

    /// Deep copy of every published entry, for the HTTP status surface.
    pub fn snapshot(&self) -> HashMap<String, AnswerSet> {
        self.records.read().clone()
    }

    /// SNI configured for `name`, or an empty string for unknown names.
    pub fn sni_for(&self, name: &str) -> &str {
        self.sni_by_domain
            .get(name)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Number of domains with a published answer set.
    pub fn published_count(&self) -> usize {
        self.records.read().len()
    }
}
