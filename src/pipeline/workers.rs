//! # Round Workers
//!
//! Fans the targets of one round out over worker threads. Each target is
//! scanned start to finish by a single worker, so block order within a
//! file is never interleaved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::{bounded, unbounded};
use tracing::{debug, warn};

use crate::pipeline::scan::ScanStats;

use super::PendingTarget;

/// Result of handing one target to a worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOutcome {
    /// `None` when the target could not be opened or read.
    pub stats: Option<ScanStats>,
}

impl FileOutcome {
    pub fn scanned(stats: ScanStats) -> Self {
        Self { stats: Some(stats) }
    }

    pub fn failed() -> Self {
        Self { stats: None }
    }
}

/// Scan every target of a round with `scan_one`. Outcomes come back in
/// target order. Targets not started before cancellation are left out.
pub fn scan_round<F>(
    workers: usize,
    cancel: Option<&AtomicBool>,
    targets: &[PendingTarget],
    scan_one: F,
) -> Vec<(usize, FileOutcome)>
where
    F: Fn(&PendingTarget) -> FileOutcome + Sync,
{
    let is_cancelled = || cancel.is_some_and(|flag| flag.load(Ordering::Relaxed));

    if workers <= 1 || targets.len() <= 1 {
        let mut outcomes = Vec::with_capacity(targets.len());
        for (idx, target) in targets.iter().enumerate() {
            if is_cancelled() {
                debug!("cancelled before {}", target.path.display());
                break;
            }
            outcomes.push((idx, scan_one(target)));
        }
        return outcomes;
    }

    let worker_count = workers.min(targets.len());
    let (job_tx, job_rx) = bounded::<usize>(worker_count * 2);
    let (out_tx, out_rx) = unbounded::<(usize, FileOutcome)>();

    thread::scope(|scope| {
        for _ in 0..worker_count {
            let job_rx = job_rx.clone();
            let out_tx = out_tx.clone();
            let scan_one = &scan_one;
            scope.spawn(move || {
                for idx in job_rx {
                    let outcome = scan_one(&targets[idx]);
                    if let Err(err) = out_tx.send((idx, outcome)) {
                        warn!("outcome channel closed: {err}");
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(out_tx);

        for idx in 0..targets.len() {
            if is_cancelled() {
                debug!("cancelled with {} target(s) unqueued", targets.len() - idx);
                break;
            }
            if job_tx.send(idx).is_err() {
                break;
            }
        }
        drop(job_tx);
    });

    let mut outcomes: Vec<(usize, FileOutcome)> = out_rx.try_iter().collect();
    outcomes.sort_by_key(|(idx, _)| *idx);
    outcomes
}
