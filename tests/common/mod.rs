//! Shared test infrastructure for scan pipeline and responder tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use tokio_util::sync::CancellationToken;

use pharos_dns::config::DomainConfig;
use pharos_dns::probe::{ProbeOutcome, Prober};
use pharos_dns::responder::RecordHandler;
use pharos_dns::store::RecordStore;

// --- Stub prober ---

/// Scriptable [`Prober`] that records how it was driven: total executions and
/// the peak number of concurrent in-flight probes.
pub struct StubProber {
    accept: Box<dyn Fn(Ipv4Addr) -> bool + Send + Sync>,
    delay: Option<Duration>,
    probed: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StubProber {
    /// Succeed only for the listed addresses.
    pub fn accepting(addrs: &[&str]) -> Self {
        let set: HashSet<Ipv4Addr> = addrs.iter().map(|a| a.parse().unwrap()).collect();
        Self::with_fn(move |ip| set.contains(&ip))
    }

    /// Succeed for every address.
    pub fn accept_all() -> Self {
        Self::with_fn(|_| true)
    }

    /// Fail for every address.
    pub fn reject_all() -> Self {
        Self::with_fn(|_| false)
    }

    fn with_fn(accept: impl Fn(Ipv4Addr) -> bool + Send + Sync + 'static) -> Self {
        Self {
            accept: Box::new(accept),
            delay: None,
            probed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every probe before reporting the outcome.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of probe executions started.
    pub fn probed(&self) -> usize {
        self.probed.load(Ordering::SeqCst)
    }

    /// Highest number of probes that were in flight at the same instant.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for StubProber {
    async fn probe(&self, ip: Ipv4Addr, cancel: &CancellationToken) -> ProbeOutcome {
        self.probed.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let mut cancelled = false;
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => cancelled = true,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if cancelled {
            ProbeOutcome::fail("probe cancelled")
        } else if (self.accept)(ip) {
            ProbeOutcome::pass()
        } else {
            ProbeOutcome::fail("stub rejected")
        }
    }
}

// --- Config and store builders ---

/// A domain with uncapped sampling (`sample_max = 0`) and sane probe fields.
pub fn domain_config(
    name: &str,
    cidrs: &[&str],
    limit: usize,
    sample_min: usize,
    sample_chance: f64,
) -> DomainConfig {
    DomainConfig {
        domain: name.to_string(),
        cidrs: cidrs.iter().map(|c| c.to_string()).collect(),
        sni: "origin.example.com".to_string(),
        path: "/".to_string(),
        timeout: Duration::from_millis(200),
        port: 443,
        status_code: 0,
        sample_min,
        sample_max: 0,
        sample_chance,
        http_only: false,
        program: None,
        result_limit: limit,
    }
}

/// An empty store carrying the SNI side table for the given domains.
pub fn store_for(domains: &[&DomainConfig]) -> RecordStore {
    RecordStore::new(
        domains
            .iter()
            .map(|d| (d.domain.clone(), d.sni.clone()))
            .collect(),
    )
}

pub fn ip(addr: &str) -> Ipv4Addr {
    addr.parse().unwrap()
}

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to
/// `RecordHandler::handle_request()`. The response is serialized via
/// `MessageResponse::destructive_emit()` and stored as raw wire-format bytes,
/// which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Build wire-format bytes for a message with an empty question section.
pub fn build_empty_question_bytes(id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` as the server would see it.
pub fn build_request(bytes: &[u8]) -> Request {
    let msg = parse_message_request(bytes);
    let src: SocketAddr = "127.0.0.1:54321".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

// --- Response helpers ---

/// Execute a query through the handler and return the parsed response.
pub async fn execute_query(
    handler: &RecordHandler,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    execute_raw(handler, &build_query_bytes(name, record_type, id)).await
}

/// Execute raw query bytes through the handler and return the parsed response.
pub async fn execute_raw(handler: &RecordHandler, bytes: &[u8]) -> Message {
    let request = build_request(bytes);
    let capture = TestResponseHandler::new();
    handler.handle_request(&request, capture.clone()).await;
    capture.into_message()
}

/// Extract A record addresses from a response, in answer order.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}
