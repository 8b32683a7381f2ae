//! The UDP DNS request handler serving `A` records from the record store.
//!
//! Every reply is NOERROR. Queries with no question, a qtype other than `A`,
//! or a name without a published answer set get an empty answer section;
//! unknown names are deliberately not NXDOMAIN. TTLs equal the refresh
//! interval in seconds, floored at one second so sub-second intervals never
//! serve a zero TTL.

use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Header;
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use tracing::{debug, info};

use crate::metrics;
use crate::store::RecordStore;

/// Stateless, re-entrant request handler over the record store.
#[derive(Clone)]
pub struct RecordHandler {
    store: RecordStore,
    ttl: u32,
}

impl RecordHandler {
    /// Create a handler serving TTLs derived from `update_interval`.
    pub fn new(store: RecordStore, update_interval: Duration) -> Self {
        let ttl = u32::try_from(update_interval.as_secs())
            .unwrap_or(u32::MAX)
            .max(1);
        Self { store, ttl }
    }

    /// TTL stamped on served `A` records, in seconds.
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    fn build_answers(&self, name: &Name, ips: &[std::net::Ipv4Addr]) -> Vec<Record> {
        ips.iter()
            .map(|ip| {
                let mut record = Record::from_rdata(name.clone(), self.ttl, RData::A(A::from(*ip)));
                record.set_dns_class(DNSClass::IN);
                record
            })
            .collect()
    }
}

#[async_trait]
impl RequestHandler for RecordHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let header = Header::response_from_request(request.header());

        let request_info = match request.request_info() {
            Ok(info) => info,
            Err(_) => {
                debug!(id = request.header().id(), "request without question");
                return send_reply(request, &mut response_handle, header, &[]).await;
            }
        };

        // Only the first question is examined.
        let query = &request_info.query;
        let name = query.name().to_string();
        let sni = self.store.sni_for(&name).to_string();
        metrics::record_dns_request(&name, &sni);
        debug!(
            name = %name,
            qtype = ?query.query_type(),
            class = ?query.query_class(),
            from = %request.src(),
            "handling dns request"
        );

        if query.query_type() != RecordType::A {
            return send_reply(request, &mut response_handle, header, &[]).await;
        }

        let answers = match self.store.lookup(&name) {
            None => Vec::new(),
            Some(set) => {
                metrics::record_dns_answer(&name, &sni, set.ips.len());
                let record_name = Name::from(query.name().clone());
                self.build_answers(&record_name, &set.ips)
            }
        };

        send_reply(request, &mut response_handle, header, &answers).await
    }
}

async fn send_reply<R: ResponseHandler>(
    request: &Request,
    response_handle: &mut R,
    header: Header,
    answers: &[Record],
) -> ResponseInfo {
    let response = MessageResponseBuilder::from_message_request(request).build(
        header,
        answers.iter(),
        &[],
        &[],
        &[],
    );
    match response_handle.send_response(response).await {
        Ok(info) => info,
        Err(e) => {
            // Write failures are logged, not retried.
            info!(error = %e, "failed to write dns reply");
            ResponseInfo::from(header)
        }
    }
}
