use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::ResultAggregator;
use crate::error::ScanError;
use crate::probe::{probe_one, NetProber, Prober};
use crate::progress::ProgressTracker;
use crate::types::{
    PortStatus, ProbeOutcome, Protocol, ProtocolResults, ScanPhase, ScanProgress, ScanRequest,
    ScanSummary, ScanUpdate,
};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const MAX_CONCURRENCY: usize = 5_000;

/// How probes are scheduled. Both variants bound the number of sockets open
/// at once.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Consecutive batches of at most `batch_size` ports. Every probe of a
    /// batch runs concurrently and the batch drains before the next starts.
    /// Progress is reported once per batch.
    Batched { batch_size: usize },
    /// `workers` ports in flight at any time across the whole port list,
    /// with progress reported as each port finishes.
    Pooled { workers: usize },
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Batched { batch_size: DEFAULT_BATCH_SIZE }
    }
}

/// Scan with real sockets and no progress reporting.
pub async fn scan(req: &ScanRequest, schedule: Schedule) -> Result<ScanSummary, ScanError> {
    scan_internal(Arc::new(NetProber), req, schedule, None, None).await
}

/// Variant that accepts a `CancellationToken` to allow external cancellation.
pub async fn scan_with_cancel(
    req: &ScanRequest,
    schedule: Schedule,
    cancel: CancellationToken,
) -> Result<ScanSummary, ScanError> {
    scan_internal(Arc::new(NetProber), req, schedule, Some(cancel), None).await
}

/// Variant that streams a [`ScanUpdate`] into `progress` after every batch
/// (or port, when pooled). If the receiver goes away the scan stops with
/// [`ScanError::StreamTransport`].
pub async fn scan_with_progress(
    req: &ScanRequest,
    schedule: Schedule,
    cancel: CancellationToken,
    progress: mpsc::Sender<ScanUpdate>,
) -> Result<ScanSummary, ScanError> {
    scan_internal(Arc::new(NetProber), req, schedule, Some(cancel), Some(progress)).await
}

/// Fully general entry point with a caller-supplied prober.
pub async fn scan_with_prober<P: Prober>(
    prober: Arc<P>,
    req: &ScanRequest,
    schedule: Schedule,
    cancel: CancellationToken,
    progress: Option<mpsc::Sender<ScanUpdate>>,
) -> Result<ScanSummary, ScanError> {
    scan_internal(prober, req, schedule, Some(cancel), progress).await
}

async fn scan_internal<P: Prober>(
    prober: Arc<P>,
    req: &ScanRequest,
    schedule: Schedule,
    cancel_opt: Option<CancellationToken>,
    progress: Option<mpsc::Sender<ScanUpdate>>,
) -> Result<ScanSummary, ScanError> {
    let cancel = cancel_opt.unwrap_or_default();
    let sink = Sink { tx: progress };

    info!(
        target_ip = %req.target(),
        ports = req.ports().len(),
        protocol = ?req.protocol(),
        timeout_ms = req.timeout().as_millis() as u64,
        ?schedule,
        "scan started"
    );

    let summary = match schedule {
        Schedule::Batched { batch_size } => {
            run_batched(prober, req, batch_size.clamp(1, MAX_CONCURRENCY), &cancel, &sink).await?
        }
        Schedule::Pooled { workers } => {
            run_pooled(prober, req, workers.clamp(1, MAX_CONCURRENCY), &cancel, &sink).await?
        }
    };

    info!(
        target_ip = %summary.target,
        scanned = summary.total_scanned,
        open = summary.counts.open,
        closed = summary.counts.closed,
        filtered = summary.counts.filtered,
        open_filtered = summary.counts.open_filtered,
        errors = summary.counts.error,
        completed = summary.completed,
        "scan finished"
    );
    Ok(summary)
}

async fn run_batched<P: Prober>(
    prober: Arc<P>,
    req: &ScanRequest,
    batch_size: usize,
    cancel: &CancellationToken,
    sink: &Sink,
) -> Result<ScanSummary, ScanError> {
    let target = req.target();
    let timeout = req.timeout();
    let protocols = req.protocol().protocols();
    let mut agg = ResultAggregator::new(target, req.protocol());
    let mut tracker = ProgressTracker::new(req.ports().len());

    sink.send(tracker.started(), ProtocolResults::default(), None).await?;

    for (idx, batch) in req.ports().chunks(batch_size).enumerate() {
        if cancel.is_cancelled() {
            return Ok(cancelled(agg));
        }

        let mut set = JoinSet::new();
        let mut pending = HashMap::with_capacity(batch.len() * protocols.len());
        for &port in batch {
            for &protocol in protocols {
                let prober = prober.clone();
                let handle = set.spawn(async move {
                    probe_one(prober.as_ref(), target, port, protocol, timeout).await
                });
                pending.insert(handle.id(), vec![(port, protocol)]);
            }
        }

        // Dropping `set` on cancellation aborts the in-flight probes, which
        // closes their sockets.
        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(cancelled(agg)),
            outcomes = drain(&mut set, pending) => outcomes,
        };

        let delta = agg.record_batch(outcomes);
        let current = batch.last().copied().unwrap_or_default();
        let progress = tracker.advance(batch.len(), current);
        debug!(
            batch = idx,
            scanned = progress.scanned,
            total = progress.total,
            current_port = current,
            "batch complete"
        );

        if progress.status == ScanPhase::Completed {
            return finish(agg, progress, sink).await;
        }
        sink.send(progress, delta, None).await?;
    }

    // Only reachable if the port set was empty, which ScanRequest rules out.
    Ok(agg.finish(true))
}

async fn run_pooled<P: Prober>(
    prober: Arc<P>,
    req: &ScanRequest,
    workers: usize,
    cancel: &CancellationToken,
    sink: &Sink,
) -> Result<ScanSummary, ScanError> {
    let target = req.target();
    let timeout = req.timeout();
    let protocols = req.protocol().protocols();
    let mut agg = ResultAggregator::new(target, req.protocol());
    let mut tracker = ProgressTracker::new(req.ports().len());

    sink.send(tracker.started(), ProtocolResults::default(), None).await?;

    let sem = Arc::new(Semaphore::new(workers));
    let mut set = JoinSet::new();
    let mut pending = HashMap::with_capacity(req.ports().len());
    for &port in req.ports() {
        let prober = prober.clone();
        let sem = sem.clone();
        let cancel = cancel.clone();
        let handle = set.spawn(async move {
            // Permit is held until every protocol of this port is probed.
            let _permit = sem.acquire_owned().await.ok();
            let mut out = Vec::with_capacity(protocols.len());
            for &protocol in protocols {
                if cancel.is_cancelled() {
                    break;
                }
                out.push(probe_one(prober.as_ref(), target, port, protocol, timeout).await);
            }
            out
        });
        pending.insert(handle.id(), protocols.iter().map(|&p| (port, p)).collect());
    }

    loop {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(cancelled(agg)),
            joined = set.join_next_with_id() => joined,
        };
        let Some(joined) = joined else { break };
        let outcomes = match joined {
            Ok((id, outcomes)) => {
                pending.remove(&id);
                outcomes
            }
            Err(e) => failed_task_outcomes(&mut pending, e),
        };
        let Some(port) = outcomes.first().map(|o| o.port) else { continue };

        let delta = agg.record_batch(outcomes);
        let progress = tracker.advance(1, port);
        if progress.status == ScanPhase::Completed {
            return finish(agg, progress, sink).await;
        }
        sink.send(progress, delta, None).await?;
    }

    Ok(agg.finish(true))
}

/// Await every probe of a batch. A probe task that panics is recorded as
/// `Error` so each (port, protocol) pair still gets exactly one outcome.
async fn drain(
    set: &mut JoinSet<ProbeOutcome>,
    mut pending: HashMap<task::Id, Vec<(u16, Protocol)>>,
) -> Vec<ProbeOutcome> {
    let mut out = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((id, outcome)) => {
                pending.remove(&id);
                out.push(outcome);
            }
            Err(e) => out.extend(failed_task_outcomes(&mut pending, e)),
        }
    }
    out
}

fn failed_task_outcomes(
    pending: &mut HashMap<task::Id, Vec<(u16, Protocol)>>,
    err: task::JoinError,
) -> Vec<ProbeOutcome> {
    warn!(error = %err, "probe task failed");
    pending
        .remove(&err.id())
        .unwrap_or_default()
        .into_iter()
        .map(|(port, protocol)| ProbeOutcome { port, protocol, status: PortStatus::Error })
        .collect()
}

async fn finish(
    agg: ResultAggregator,
    progress: ScanProgress,
    sink: &Sink,
) -> Result<ScanSummary, ScanError> {
    let summary = agg.finish(true);
    sink.send(progress, summary.results(), Some(summary.clone())).await?;
    Ok(summary)
}

fn cancelled(agg: ResultAggregator) -> ScanSummary {
    info!(probed = agg.outcome_count(), "scan cancelled");
    agg.finish(false)
}

/// Optional consumer of progress updates.
struct Sink {
    tx: Option<mpsc::Sender<ScanUpdate>>,
}

impl Sink {
    async fn send(
        &self,
        progress: ScanProgress,
        results: ProtocolResults,
        summary: Option<ScanSummary>,
    ) -> Result<(), ScanError> {
        let Some(tx) = &self.tx else { return Ok(()) };
        let update = ScanUpdate { progress, results, summary };
        if tx.send(update).await.is_err() {
            warn!("progress receiver dropped; stopping scan");
            return Err(ScanError::StreamTransport);
        }
        Ok(())
    }
}
