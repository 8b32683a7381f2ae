//! The per-domain scan pipeline.
//!
//! One cycle drives candidates from the domain's CIDR samplers through the
//! probe executor and publishes the survivors:
//!
//! - one producer task per CIDR drains its sampler into a rendezvous channel,
//! - one worker task per CIDR pulls candidates, acquires a token from the
//!   process-wide worker budget, probes, and offers successes to the survivor
//!   list,
//! - survivor admission is serialized by a mutex: duplicates and overflow are
//!   discarded, and reaching `result_limit` cancels the cycle's scope so the
//!   remaining producers and workers wind down,
//! - the channel closes once every producer has finished; workers exit on
//!   close or cancellation.
//!
//! Reaching the limit is a successful cycle and publishes the full survivor
//! list. Cancellation of the parent token is not: after the children join,
//! the parent is re-checked and publication is skipped if it fired.

use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::DomainConfig;
use crate::error::DnsError;
use crate::metrics;
use crate::probe::Prober;
use crate::sampler::CidrSampler;
use crate::store::RecordStore;

/// Build the process-wide worker budget capping concurrent probe executions.
pub fn worker_budget(max_workers: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(max_workers.max(1)))
}

/// Run one scan cycle for `domain` and publish the survivors.
///
/// Publication is skipped when `parent` is cancelled before the cycle
/// completes. Sampler construction failure aborts the cycle with an error;
/// probe failures are expected negative results.
pub async fn run_cycle(
    domain: &DomainConfig,
    prober: Arc<dyn Prober>,
    budget: Arc<Semaphore>,
    store: &RecordStore,
    parent: &CancellationToken,
) -> Result<(), DnsError> {
    let samplers = domain.build_samplers()?;
    let worker_count = samplers.len();
    let limit = domain.result_limit.max(1);
    let scope = parent.child_token();
    let survivors: Arc<Mutex<Vec<Ipv4Addr>>> = Arc::new(Mutex::new(Vec::with_capacity(limit)));

    let (tx, rx) = flume::bounded::<Ipv4Addr>(0);

    let mut producers = JoinSet::new();
    for sampler in samplers {
        producers.spawn(drain_sampler(sampler, tx.clone(), scope.clone()));
    }
    // The channel closes once the last producer drops its sender.
    drop(tx);

    let mut workers = JoinSet::new();
    for _ in 0..worker_count {
        workers.spawn(probe_candidates(WorkerContext {
            rx: rx.clone(),
            prober: prober.clone(),
            budget: budget.clone(),
            survivors: survivors.clone(),
            limit,
            scope: scope.clone(),
            domain: domain.domain.clone(),
            sni: domain.sni.clone(),
        }));
    }
    drop(rx);

    while producers.join_next().await.is_some() {}
    while workers.join_next().await.is_some() {}

    if parent.is_cancelled() {
        debug!(domain = %domain.domain, "cycle cancelled, skipping publication");
        return Ok(());
    }

    let accepted = std::mem::take(&mut *survivors.lock());
    info!(
        domain = %domain.domain,
        accepted_ips = accepted.len(),
        "records updated"
    );
    store.publish(&domain.domain, accepted);
    Ok(())
}

/// Feed one sampler into the candidate channel until it is exhausted, the
/// scope is cancelled, or every worker is gone.
async fn drain_sampler(
    sampler: CidrSampler,
    tx: flume::Sender<Ipv4Addr>,
    scope: CancellationToken,
) {
    for candidate in sampler {
        tokio::select! {
            _ = scope.cancelled() => return,
            sent = tx.send_async(candidate) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

struct WorkerContext {
    rx: flume::Receiver<Ipv4Addr>,
    prober: Arc<dyn Prober>,
    budget: Arc<Semaphore>,
    survivors: Arc<Mutex<Vec<Ipv4Addr>>>,
    limit: usize,
    scope: CancellationToken,
    domain: String,
    sni: String,
}

async fn probe_candidates(ctx: WorkerContext) {
    loop {
        let candidate = tokio::select! {
            _ = ctx.scope.cancelled() => return,
            received = ctx.rx.recv_async() => match received {
                Ok(candidate) => candidate,
                Err(_) => return,
            },
        };

        let permit = tokio::select! {
            _ = ctx.scope.cancelled() => return,
            permit = ctx.budget.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        debug!(domain = %ctx.domain, ip = %candidate, "testing candidate");
        let outcome = ctx.prober.probe(candidate, &ctx.scope).await;
        // The budget token is released before the outcome is inspected.
        drop(permit);

        metrics::record_scan_result(&ctx.domain, &ctx.sni, outcome.success);
        if !outcome.success {
            debug!(domain = %ctx.domain, ip = %candidate, detail = ?outcome.detail, "candidate rejected");
            continue;
        }

        let mut accepted = ctx.survivors.lock();
        if accepted.len() >= ctx.limit || accepted.contains(&candidate) {
            continue;
        }
        accepted.push(candidate);
        debug!(
            domain = %ctx.domain,
            ip = %candidate,
            accepted_count = accepted.len(),
            "candidate accepted"
        );
        if accepted.len() == ctx.limit {
            ctx.scope.cancel();
        }
    }
}
