pub mod csv;
pub mod jsonl;
pub mod terminal;

use std::path::Path;
use std::sync::Mutex;

use thiserror::Error;

use crate::carve::CarvedFile;
use crate::pipeline::scan::ScanStats;
use crate::scanner::Match;
use crate::stream::TargetInfo;

#[derive(Debug, Clone, Default, serde::Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub rounds: u32,
    pub files_scanned: u64,
    pub files_failed: u64,
    pub bytes_scanned: u64,
    pub candidates: u64,
    pub matches: u64,
    pub invalid_matches: u64,
    pub jumps: u64,
    pub seeks: u64,
    pub files_carved: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum MetadataBackendKind {
    Jsonl,
    Csv,
    None,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("other error: {0}")]
    Other(String),
}

pub(crate) fn poisoned() -> MetadataError {
    MetadataError::Other("sink lock poisoned".to_string())
}

/// Destination for everything a run reports.
///
/// `header` and `footer` bracket each scanned target. `record_match` sees
/// every match, valid or not; sinks decide for themselves whether to show
/// invalid ones.
///
/// # Example
/// ```rust
/// use sigwalk::metadata::{MatchSink, NullSink, RunSummary};
///
/// let sink = NullSink;
/// sink.record_run_summary(&RunSummary::default()).unwrap();
/// sink.flush().unwrap();
/// ```
pub trait MatchSink: Send + Sync {
    fn header(&self, _target: &TargetInfo) -> Result<(), MetadataError> {
        Ok(())
    }
    fn record_match(&self, m: &Match) -> Result<(), MetadataError>;
    fn record_carved(&self, file: &CarvedFile) -> Result<(), MetadataError>;
    fn footer(&self, _target: &TargetInfo, _stats: &ScanStats) -> Result<(), MetadataError> {
        Ok(())
    }
    fn record_run_summary(&self, summary: &RunSummary) -> Result<(), MetadataError>;
    fn flush(&self) -> Result<(), MetadataError>;
}

/// Discards everything.
pub struct NullSink;

impl MatchSink for NullSink {
    fn record_match(&self, _m: &Match) -> Result<(), MetadataError> {
        Ok(())
    }
    fn record_carved(&self, _file: &CarvedFile) -> Result<(), MetadataError> {
        Ok(())
    }
    fn record_run_summary(&self, _summary: &RunSummary) -> Result<(), MetadataError> {
        Ok(())
    }
    fn flush(&self) -> Result<(), MetadataError> {
        Ok(())
    }
}

/// Keeps everything in memory, for embedding and tests.
#[derive(Default)]
pub struct MemorySink {
    matches: Mutex<Vec<Match>>,
    carved: Mutex<Vec<CarvedFile>>,
    targets: Mutex<Vec<TargetInfo>>,
    summary: Mutex<Option<RunSummary>>,
}

impl MemorySink {
    pub fn matches(&self) -> Vec<Match> {
        self.matches.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn carved(&self) -> Vec<CarvedFile> {
        self.carved.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Targets in the order their headers were seen.
    pub fn targets(&self) -> Vec<TargetInfo> {
        self.targets.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn summary(&self) -> Option<RunSummary> {
        self.summary.lock().ok().and_then(|g| g.clone())
    }
}

impl MatchSink for MemorySink {
    fn header(&self, target: &TargetInfo) -> Result<(), MetadataError> {
        self.targets.lock().map_err(|_| poisoned())?.push(target.clone());
        Ok(())
    }
    fn record_match(&self, m: &Match) -> Result<(), MetadataError> {
        self.matches.lock().map_err(|_| poisoned())?.push(m.clone());
        Ok(())
    }
    fn record_carved(&self, file: &CarvedFile) -> Result<(), MetadataError> {
        self.carved.lock().map_err(|_| poisoned())?.push(file.clone());
        Ok(())
    }
    fn record_run_summary(&self, summary: &RunSummary) -> Result<(), MetadataError> {
        *self.summary.lock().map_err(|_| poisoned())? = Some(summary.clone());
        Ok(())
    }
    fn flush(&self) -> Result<(), MetadataError> {
        Ok(())
    }
}

/// Forwards every call to each inner sink; the first error wins but every
/// sink still sees the call.
pub struct FanoutSink {
    sinks: Vec<Box<dyn MatchSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn MatchSink>>) -> Self {
        Self { sinks }
    }

    fn each(
        &self,
        mut f: impl FnMut(&dyn MatchSink) -> Result<(), MetadataError>,
    ) -> Result<(), MetadataError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = f(sink.as_ref()) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl MatchSink for FanoutSink {
    fn header(&self, target: &TargetInfo) -> Result<(), MetadataError> {
        self.each(|s| s.header(target))
    }
    fn record_match(&self, m: &Match) -> Result<(), MetadataError> {
        self.each(|s| s.record_match(m))
    }
    fn record_carved(&self, file: &CarvedFile) -> Result<(), MetadataError> {
        self.each(|s| s.record_carved(file))
    }
    fn footer(&self, target: &TargetInfo, stats: &ScanStats) -> Result<(), MetadataError> {
        self.each(|s| s.footer(target, stats))
    }
    fn record_run_summary(&self, summary: &RunSummary) -> Result<(), MetadataError> {
        self.each(|s| s.record_run_summary(summary))
    }
    fn flush(&self) -> Result<(), MetadataError> {
        self.each(|s| s.flush())
    }
}

pub fn build_sink(
    backend: MetadataBackendKind,
    run_id: &str,
    tool_version: &str,
    config_hash: &str,
    run_output_dir: &Path,
) -> Result<Box<dyn MatchSink>, MetadataError> {
    match backend {
        MetadataBackendKind::Jsonl => Ok(Box::new(jsonl::JsonlSink::new(
            run_id,
            tool_version,
            config_hash,
            run_output_dir,
        )?)),
        MetadataBackendKind::Csv => Ok(Box::new(csv::CsvSink::new(
            run_id,
            tool_version,
            config_hash,
            run_output_dir,
        )?)),
        MetadataBackendKind::None => Ok(Box::new(NullSink)),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::scanner::Classification;

    struct FailingSink;

    impl MatchSink for FailingSink {
        fn record_match(&self, _m: &Match) -> Result<(), MetadataError> {
            Err(MetadataError::Other("full".to_string()))
        }
        fn record_carved(&self, _file: &CarvedFile) -> Result<(), MetadataError> {
            Ok(())
        }
        fn record_run_summary(&self, _summary: &RunSummary) -> Result<(), MetadataError> {
            Ok(())
        }
        fn flush(&self) -> Result<(), MetadataError> {
            Ok(())
        }
    }

    #[test]
    fn fanout_reaches_every_sink_despite_errors() {
        let memory = Arc::new(MemorySink::default());

        struct Shared(Arc<MemorySink>);
        impl MatchSink for Shared {
            fn record_match(&self, m: &Match) -> Result<(), MetadataError> {
                self.0.record_match(m)
            }
            fn record_carved(&self, file: &CarvedFile) -> Result<(), MetadataError> {
                self.0.record_carved(file)
            }
            fn record_run_summary(&self, summary: &RunSummary) -> Result<(), MetadataError> {
                self.0.record_run_summary(summary)
            }
            fn flush(&self) -> Result<(), MetadataError> {
                self.0.flush()
            }
        }

        let fanout = FanoutSink::new(vec![Box::new(FailingSink), Box::new(Shared(memory.clone()))]);
        let target = Arc::new(TargetInfo {
            path: PathBuf::from("a.bin"),
            len: 10,
            depth: 0,
        });
        let m = Match::new(Classification::new("thing"), 3, target);
        assert!(fanout.record_match(&m).is_err());
        assert_eq!(memory.matches().len(), 1);
    }
}
