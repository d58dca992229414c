//! # Pipeline Module
//!
//! Drives scanning across targets. The initial targets form round one;
//! files carved during a round become the targets of the next. Rounds run
//! until one carves nothing new.

pub mod scan;
pub mod validate;
pub mod workers;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Sender, unbounded};
use tracing::{debug, info, warn};

use crate::carve::{CarvedFile, Extractor};
use crate::metadata::{MatchSink, MetadataError, RunSummary};
use crate::scanner::Match;
use crate::stream::{FileOpener, TargetInfo};

use scan::{ScanEngine, ScanStats};
use workers::{FileOutcome, scan_round};

/// A file queued for a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTarget {
    pub path: PathBuf,
    pub depth: u32,
}

/// Deepest extraction level rescanned when no limit is configured.
pub const DEFAULT_MAX_DEPTH: u32 = 8;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub run_id: String,
    pub workers: usize,
    /// Rescan carved files in later rounds.
    pub recursive: bool,
    /// Deepest carved file that is still rescanned.
    pub max_depth: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            run_id: String::new(),
            workers: 1,
            recursive: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

pub struct WorklistRunner {
    engine: Arc<ScanEngine>,
    opener: Arc<dyn FileOpener>,
    extractor: Option<Arc<dyn Extractor>>,
    sink: Arc<dyn MatchSink>,
    options: RunOptions,
    cancel: Option<Arc<AtomicBool>>,
}

impl WorklistRunner {
    pub fn new(
        engine: Arc<ScanEngine>,
        opener: Arc<dyn FileOpener>,
        sink: Arc<dyn MatchSink>,
        options: RunOptions,
    ) -> Self {
        Self {
            engine,
            opener,
            extractor: None,
            sink,
            options,
            cancel: None,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Stop between files and rounds once `flag` is set. The engine needs
    /// the same flag to stop between blocks.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Scan `targets` and everything carved from them. Per-file failures
    /// are logged and counted, never returned.
    pub fn run(&self, targets: &[PathBuf]) -> RunSummary {
        let mut summary = RunSummary {
            run_id: self.options.run_id.clone(),
            ..RunSummary::default()
        };
        let mut seen_hashes: HashSet<String> = HashSet::new();
        let mut pending: Vec<PendingTarget> = targets
            .iter()
            .map(|path| PendingTarget {
                path: path.clone(),
                depth: 0,
            })
            .collect();

        while !pending.is_empty() {
            if self.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            summary.rounds += 1;
            info!("round {}: {} target(s)", summary.rounds, pending.len());

            let (carved_tx, carved_rx) = unbounded::<CarvedFile>();
            let outcomes = scan_round(
                self.options.workers,
                self.cancel.as_deref(),
                &pending,
                |target| self.scan_one(target, &carved_tx),
            );
            drop(carved_tx);

            if outcomes.len() < pending.len() {
                summary.cancelled = true;
            }
            for (_, outcome) in &outcomes {
                fold_outcome(&mut summary, outcome);
            }

            let carved: Vec<CarvedFile> = carved_rx.try_iter().collect();
            summary.files_carved += carved.len() as u64;
            if summary.cancelled {
                break;
            }
            pending = self.next_round(carved, &mut seen_hashes);
        }

        info!(
            "run {} finished: rounds={} scanned={} failed={} matches={} carved={}",
            summary.run_id,
            summary.rounds,
            summary.files_scanned,
            summary.files_failed,
            summary.matches,
            summary.files_carved
        );
        if let Err(err) = self.sink.record_run_summary(&summary) {
            warn!("failed to record run summary: {err}");
        }
        if let Err(err) = self.sink.flush() {
            warn!("failed to flush sink: {err}");
        }
        summary
    }

    /// Open, scan and close one target.
    fn scan_one(&self, pending: &PendingTarget, carved_tx: &Sender<CarvedFile>) -> FileOutcome {
        let mut target = match self.opener.open(&pending.path, pending.depth) {
            Ok(target) => target,
            Err(err) => {
                warn!("cannot open {}: {err}", pending.path.display());
                return FileOutcome::failed();
            }
        };
        let info = Arc::clone(&target.info);
        if let Err(err) = self.sink.header(&info) {
            warn!("sink header error for {}: {err}", info.path.display());
        }

        let sink = ExtractingSink {
            inner: self.sink.as_ref(),
            extractor: self.extractor.as_deref(),
            carved_tx,
        };
        let result = self.engine.scan_target(&mut target, &sink);
        drop(target);

        match result {
            Ok(stats) => {
                if let Err(err) = self.sink.footer(&info, &stats) {
                    warn!("sink footer error for {}: {err}", info.path.display());
                }
                debug!(
                    "{}: blocks={} matches={} jumps={} seeks={}",
                    info.path.display(),
                    stats.blocks,
                    stats.matches,
                    stats.jumps,
                    stats.seeks
                );
                FileOutcome::scanned(stats)
            }
            Err(err) => {
                warn!("scan aborted: {err}");
                FileOutcome::failed()
            }
        }
    }

    /// Carved files worth scanning next round, in path order.
    fn next_round(
        &self,
        carved: Vec<CarvedFile>,
        seen_hashes: &mut HashSet<String>,
    ) -> Vec<PendingTarget> {
        if !self.options.recursive {
            return Vec::new();
        }
        let mut next: Vec<PendingTarget> = carved
            .into_iter()
            .filter(|file| {
                if file.depth > self.options.max_depth {
                    debug!("{}: depth {} over limit", file.path, file.depth);
                    return false;
                }
                if !seen_hashes.insert(file.sha256.clone()) {
                    debug!("{}: duplicate content, not rescanned", file.path);
                    return false;
                }
                true
            })
            .map(|file| PendingTarget {
                path: PathBuf::from(file.path),
                depth: file.depth,
            })
            .collect();
        next.sort_by(|a, b| a.path.cmp(&b.path));
        next
    }
}

fn fold_outcome(summary: &mut RunSummary, outcome: &FileOutcome) {
    let Some(stats) = &outcome.stats else {
        summary.files_failed += 1;
        return;
    };
    summary.files_scanned += 1;
    summary.bytes_scanned += stats.bytes_scanned;
    summary.candidates += stats.candidates;
    summary.matches += stats.matches;
    summary.invalid_matches += stats.invalid_matches;
    summary.jumps += stats.jumps;
    summary.seeks += stats.seeks;
    summary.cancelled |= stats.cancelled;
}

/// Passes matches through to the real sink and carves the ones the
/// extractor wants, queueing the results for the next round.
struct ExtractingSink<'a> {
    inner: &'a dyn MatchSink,
    extractor: Option<&'a dyn Extractor>,
    carved_tx: &'a Sender<CarvedFile>,
}

impl ExtractingSink<'_> {
    fn extract(&self, m: &Match) {
        let Some(extractor) = self.extractor else {
            return;
        };
        match extractor.extract(m) {
            Ok(Some(file)) => {
                debug!("carved {} bytes to {}", file.size, file.path);
                if let Err(err) = self.inner.record_carved(&file) {
                    warn!("failed to record carved file {}: {err}", file.path);
                }
                if let Err(err) = self.carved_tx.send(file) {
                    warn!("carved file channel closed: {err}");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(
                "extraction failed at 0x{:X} in {}: {err}",
                m.offset,
                m.target.path.display()
            ),
        }
    }
}

impl MatchSink for ExtractingSink<'_> {
    fn header(&self, target: &TargetInfo) -> Result<(), MetadataError> {
        self.inner.header(target)
    }

    fn record_match(&self, m: &Match) -> Result<(), MetadataError> {
        let recorded = self.inner.record_match(m);
        self.extract(m);
        recorded
    }

    fn record_carved(&self, file: &CarvedFile) -> Result<(), MetadataError> {
        self.inner.record_carved(file)
    }

    fn footer(&self, target: &TargetInfo, stats: &ScanStats) -> Result<(), MetadataError> {
        self.inner.footer(target, stats)
    }

    fn record_run_summary(&self, summary: &RunSummary) -> Result<(), MetadataError> {
        self.inner.record_run_summary(summary)
    }

    fn flush(&self) -> Result<(), MetadataError> {
        self.inner.flush()
    }
}
