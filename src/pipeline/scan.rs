//! # Scan Orchestration
//!
//! Scans one target block by block. Every candidate the locator reports
//! is classified, filtered, translated, positioned, validated and handed
//! to the sink. A valid match with a jump moves the scan forward: inside
//! the buffered block by raising the skip pointer, beyond it by seeking
//! the stream and dropping the rest of the block.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::evidence::EvidenceError;
use crate::filter::ResultFilter;
use crate::metadata::MatchSink;
use crate::scanner::{CandidateLocator, Match, SignatureMatcher};
use crate::smart::ResultTranslator;
use crate::stream::{TargetFile, TargetInfo};

use super::validate::validate;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("stream error in {path}: {source}")]
    Stream {
        path: PathBuf,
        #[source]
        source: EvidenceError,
    },
}

/// Per-target counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ScanStats {
    pub blocks: u64,
    pub bytes_scanned: u64,
    pub candidates: u64,
    pub skipped_candidates: u64,
    pub matches: u64,
    pub invalid_matches: u64,
    pub jumps: u64,
    pub seeks: u64,
    pub cancelled: bool,
}

/// What a single candidate does to the scan of its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Continue,
    /// Ignore candidates before this in-block offset.
    SkipTo(usize),
    /// Seek the stream to this absolute offset and abandon the block.
    Redirect(u64),
}

/// Where a candidate sits, in block and file coordinates.
#[derive(Debug, Clone, Copy)]
struct CandidatePos {
    in_block: usize,
    absolute: u64,
    /// Absolute end of the bytes consumed so far (the stream's `tell`).
    buffered_end: u64,
}

pub struct ScanEngine {
    locator: Arc<dyn CandidateLocator>,
    matcher: Arc<dyn SignatureMatcher>,
    filter: Arc<dyn ResultFilter>,
    translator: Arc<dyn ResultTranslator>,
    cancel: Option<Arc<AtomicBool>>,
}

impl ScanEngine {
    pub fn new(
        locator: Arc<dyn CandidateLocator>,
        matcher: Arc<dyn SignatureMatcher>,
        filter: Arc<dyn ResultFilter>,
        translator: Arc<dyn ResultTranslator>,
    ) -> Self {
        Self {
            locator,
            matcher,
            filter,
            translator,
            cancel: None,
        }
    }

    /// Stop between blocks once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Scan `target` from its current position to the end of its window.
    pub fn scan_target(
        &self,
        target: &mut TargetFile,
        sink: &dyn MatchSink,
    ) -> Result<ScanStats, ScanError> {
        let info = Arc::clone(&target.info);
        let stream = &mut target.stream;
        let trailing = stream.trailing_size();
        let mut stats = ScanStats::default();

        loop {
            if self.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            let block = match stream.read_block() {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(source) => {
                    return Err(ScanError::Stream {
                        path: info.path.clone(),
                        source,
                    });
                }
            };
            let block_start = stream.block_start(&block);
            let buffered_end = stream.tell();
            stats.blocks += 1;
            stats.bytes_scanned += block.len as u64;

            let mut current_block_offset = 0usize;
            let mut redirect = None;
            for candidate in self.locator.find_candidates(&block.data, block.len) {
                if candidate < current_block_offset {
                    stats.skipped_candidates += 1;
                    continue;
                }
                stats.candidates += 1;

                let window_end = candidate.saturating_add(trailing).min(block.data.len());
                let window = &block.data[candidate..window_end];
                let pos = CandidatePos {
                    in_block: candidate,
                    absolute: block_start + candidate as u64,
                    buffered_end,
                };
                match self.process_candidate(window, pos, &info, sink, &mut stats) {
                    CandidateOutcome::Continue => {}
                    CandidateOutcome::SkipTo(next) => current_block_offset = next,
                    CandidateOutcome::Redirect(position) => {
                        redirect = Some(position);
                        break;
                    }
                }
            }

            if let Some(position) = redirect {
                trace!("{}: seeking to 0x{:X}", info.path.display(), position);
                stream.seek(position);
                stats.seeks += 1;
            }
        }

        Ok(stats)
    }

    fn process_candidate(
        &self,
        window: &[u8],
        pos: CandidatePos,
        target: &Arc<TargetInfo>,
        sink: &dyn MatchSink,
        stats: &mut ScanStats,
    ) -> CandidateOutcome {
        for raw in self.matcher.classify(window) {
            if !self.filter.accepts(&raw) {
                trace!("filtered result at 0x{:X}: {raw:?}", pos.absolute);
                continue;
            }
            let cls = match self.translator.translate(&raw) {
                Ok(cls) => cls,
                Err(err) => {
                    debug!("dropping result at 0x{:X}: {err}", pos.absolute);
                    continue;
                }
            };

            let mut m = Match::new(cls, pos.absolute, Arc::clone(target));
            validate(&mut m);
            stats.matches += 1;
            if !m.valid {
                stats.invalid_matches += 1;
            }
            if let Err(err) = sink.record_match(&m) {
                warn!("sink error for match at 0x{:X}: {err}", m.offset);
            }

            let outcome = jump_outcome(&m, pos);
            if outcome != CandidateOutcome::Continue {
                stats.jumps += 1;
                return outcome;
            }
        }
        CandidateOutcome::Continue
    }
}

/// Only valid matches with a positive jump move the scan.
fn jump_outcome(m: &Match, pos: CandidatePos) -> CandidateOutcome {
    let jump = m.jump_len();
    if !m.valid || jump == 0 {
        return CandidateOutcome::Continue;
    }
    // Valid implies a non-negative offset.
    let absolute_jump_offset = (m.offset as u64).saturating_add(jump);
    if absolute_jump_offset >= pos.buffered_end {
        CandidateOutcome::Redirect(absolute_jump_offset)
    } else {
        let next = usize::try_from(jump)
            .map(|j| pos.in_block.saturating_add(j))
            .unwrap_or(usize::MAX);
        CandidateOutcome::SkipTo(next)
    }
}
