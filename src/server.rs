//! DNS server setup and lifecycle management.

use std::sync::Arc;

use hickory_server::ServerFuture;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::error::DnsError;
use crate::http;
use crate::refresh;
use crate::responder::RecordHandler;
use crate::scan;
use crate::store::RecordStore;

/// DNS server backed by probe-verified scan results.
pub struct DnsServer {
    config: Arc<Config>,
    store: RecordStore,
}

impl DnsServer {
    /// Create a new server with the given configuration.
    pub fn new(config: Config) -> Self {
        let sni_by_domain = config
            .domains
            .iter()
            .map(|domain| (domain.domain.clone(), domain.sni.clone()))
            .collect();
        Self {
            config: Arc::new(config),
            store: RecordStore::new(sni_by_domain),
        }
    }

    /// Get a reference to the record store.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Run the server until `cancel` fires or a component fails.
    ///
    /// Binds the UDP DNS listener, starts the record updater and the optional
    /// HTTP status surface, and joins everything on the way out. The first
    /// component error cancels its siblings and is returned.
    pub async fn run(
        self,
        cancel: CancellationToken,
        prometheus: Option<PrometheusHandle>,
    ) -> Result<(), DnsError> {
        info!(
            listen = %self.config.listen,
            domains = self.config.domains.len(),
            max_workers = self.config.max_workers,
            "starting pharos-dns server"
        );

        // Component failures cancel this local scope without touching the
        // caller's token; the caller cancelling propagates down to it.
        let local = cancel.child_token();
        let mut group: JoinSet<Result<(), DnsError>> = JoinSet::new();

        let handler = RecordHandler::new(self.store.clone(), self.config.interval);
        let ttl = handler.ttl();
        let mut server = ServerFuture::new(handler);
        let udp_socket = UdpSocket::bind(self.config.listen).await?;
        info!(addr = %self.config.listen, ttl, "dns udp listening");
        server.register_socket(udp_socket);

        {
            let dns_cancel = local.clone();
            group.spawn(async move {
                tokio::select! {
                    _ = dns_cancel.cancelled() => {
                        info!("dns server shutdown requested");
                        Ok(())
                    }
                    result = server.block_until_done() => result.map_err(DnsError::from),
                }
            });
        }

        {
            let budget = scan::worker_budget(self.config.max_workers);
            let config = self.config.clone();
            let store = self.store.clone();
            let updater_cancel = local.clone();
            group.spawn(refresh::run(config, store, budget, updater_cancel));
        }

        if let Some(addr) = self.config.http_listen {
            let config = self.config.clone();
            let store = self.store.clone();
            let http_cancel = local.clone();
            group.spawn(http::serve(addr, config, store, prometheus, http_cancel));
        }

        let mut first_error = None;
        while let Some(joined) = group.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_error) => Err(DnsError::Join(join_error)),
            };
            if let Err(e) = result {
                error!(error = %e, "server component failed");
                if first_error.is_none() {
                    first_error = Some(e);
                    local.cancel();
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("pharos-dns server stopped");
                Ok(())
            }
        }
    }
}
