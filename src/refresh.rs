//! The refresh scheduler: runs a scan cycle for every domain at startup and
//! on every `interval` tick thereafter.
//!
//! Each tick runs all domains concurrently in a structured group; the first
//! non-cancellation error cancels the group's siblings and is surfaced to the
//! caller. Ticks never overlap: a tick waits for the previous group to finish
//! (delayed missed-tick behavior).

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{Config, DomainConfig};
use crate::error::DnsError;
use crate::probe::Prober;
use crate::scan;
use crate::store::RecordStore;

/// Run the scheduler until `cancel` fires or a cycle fails.
pub async fn run(
    config: Arc<Config>,
    store: RecordStore,
    budget: Arc<Semaphore>,
    cancel: CancellationToken,
) -> Result<(), DnsError> {
    info!(
        domains = config.domains.len(),
        interval = ?config.interval,
        "record updater started"
    );

    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; it is the startup pass.
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("record updater stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                refresh_all(&config, &store, &budget, &cancel).await?;
            }
        }
    }
}

/// Run one scan cycle for every domain, concurrently, in a structured group.
async fn refresh_all(
    config: &Config,
    store: &RecordStore,
    budget: &Arc<Semaphore>,
    parent: &CancellationToken,
) -> Result<(), DnsError> {
    let group = parent.child_token();
    let mut cycles = JoinSet::new();
    for domain in config.domains.iter().cloned() {
        let store = store.clone();
        let budget = budget.clone();
        let scope = group.clone();
        cycles.spawn(async move {
            let result = process_domain(&domain, &store, budget, &scope).await;
            (domain.domain, result)
        });
    }

    let mut first_error = None;
    while let Some(joined) = cycles.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((domain, Err(e))) => {
                error!(domain = %domain, error = %e, "domain cycle failed");
                if first_error.is_none() {
                    first_error = Some(e);
                    group.cancel();
                }
            }
            Err(join_error) => {
                error!(error = %join_error, "domain cycle task failed");
                if first_error.is_none() {
                    first_error = Some(DnsError::Join(join_error));
                    group.cancel();
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn process_domain(
    domain: &DomainConfig,
    store: &RecordStore,
    budget: Arc<Semaphore>,
    scope: &CancellationToken,
) -> Result<(), DnsError> {
    debug!(
        domain = %domain.domain,
        sni = %domain.sni,
        limit = domain.result_limit,
        "processing domain"
    );
    let prober: Arc<dyn Prober> = Arc::new(domain.build_probe()?);
    scan::run_cycle(domain, prober, budget, store, scope).await
}
