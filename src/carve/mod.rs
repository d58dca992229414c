//! # Carving
//!
//! Copies the region described by a valid match out of its target into a
//! new file. Carved files are what the worklist rescans in later rounds.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::ExtractRuleConfig;
use crate::evidence::{EvidenceError, EvidenceSource, RawFileSource};
use crate::scanner::Match;

const COPY_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CarvedFile {
    pub run_id: String,
    pub source_path: String,
    pub source_offset: u64,
    pub description: String,
    /// Where the carved bytes were written.
    pub path: String,
    pub extension: String,
    pub size: u64,
    pub md5: String,
    pub sha256: String,
    pub truncated: bool,
    /// Depth the carved file will have when scanned.
    pub depth: u32,
}

#[derive(Debug, Error)]
pub enum CarveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("evidence error: {0}")]
    Evidence(#[from] EvidenceError),
    #[error("invalid extract rule {pattern:?}: {source}")]
    Rule {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Turns matches into files on disk.
pub trait Extractor: Send + Sync {
    /// `Ok(None)` when no rule wants this match or there is nothing to copy.
    fn extract(&self, m: &Match) -> Result<Option<CarvedFile>, CarveError>;
}

#[derive(Debug)]
struct ExtractRule {
    pattern: Regex,
    extension: String,
}

pub struct CarveExtractor {
    run_id: String,
    output_root: PathBuf,
    rules: Vec<ExtractRule>,
    max_size: u64,
    dirs: Mutex<ExtractionDirs>,
}

/// Extraction directory handed out to each target so far.
#[derive(Default)]
struct ExtractionDirs {
    by_target: HashMap<PathBuf, PathBuf>,
    taken: HashSet<PathBuf>,
}

impl CarveExtractor {
    /// `max_size` of zero means no cap.
    pub fn new(
        run_id: &str,
        output_root: &Path,
        rules: &[ExtractRuleConfig],
        max_size: u64,
    ) -> Result<Self, CarveError> {
        let rules = rules
            .iter()
            .map(|rule| {
                let pattern = RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| CarveError::Rule {
                        pattern: rule.pattern.clone(),
                        source,
                    })?;
                Ok(ExtractRule {
                    pattern,
                    extension: sanitize_extension(&rule.extension),
                })
            })
            .collect::<Result<Vec<_>, CarveError>>()?;
        Ok(Self {
            run_id: run_id.to_string(),
            output_root: output_root.to_path_buf(),
            rules,
            max_size,
            dirs: Mutex::new(ExtractionDirs::default()),
        })
    }

    fn rule_for(&self, description: &str) -> Option<&ExtractRule> {
        self.rules.iter().find(|r| r.pattern.is_match(description))
    }

    /// Carved files of a nested target land inside that target's own
    /// extraction directory. Targets sharing a file name get numbered
    /// directories (`_fw.bin.extracted`, `_fw.bin-1.extracted`, ...).
    fn extraction_dir(&self, target_path: &Path) -> Result<PathBuf, CarveError> {
        let mut dirs = self
            .dirs
            .lock()
            .map_err(|_| std::io::Error::other("extraction dir lock poisoned"))?;
        if let Some(dir) = dirs.by_target.get(target_path) {
            return Ok(dir.clone());
        }

        let name = target_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "target".to_string());
        let base = match target_path.parent() {
            Some(parent) if target_path.starts_with(&self.output_root) => parent.to_path_buf(),
            _ => self.output_root.clone(),
        };
        let mut dir = base.join(format!("_{name}.extracted"));
        let mut n = 1u32;
        while dirs.taken.contains(&dir) {
            dir = base.join(format!("_{name}-{n}.extracted"));
            n += 1;
        }
        dirs.taken.insert(dir.clone());
        dirs.by_target.insert(target_path.to_path_buf(), dir.clone());
        Ok(dir)
    }
}

impl Extractor for CarveExtractor {
    fn extract(&self, m: &Match) -> Result<Option<CarvedFile>, CarveError> {
        if !m.valid || m.offset < 0 {
            return Ok(None);
        }
        let Some(rule) = self.rule_for(&m.description) else {
            return Ok(None);
        };
        let start = m.offset as u64;
        let file_len = m.target.len;
        if start >= file_len {
            return Ok(None);
        }

        let mut end = m.size.map_or(file_len, |s| start.saturating_add(s).min(file_len));
        if start == 0 && end == file_len {
            // The whole target; carving it would only reproduce it.
            return Ok(None);
        }
        let mut truncated = false;
        if self.max_size > 0 && end - start > self.max_size {
            end = start + self.max_size;
            truncated = true;
        }
        if end == start {
            return Ok(None);
        }

        let dir = self.extraction_dir(&m.target.path)?;
        std::fs::create_dir_all(&dir)?;
        let full_path = dir.join(format!("{:X}.{}", start, rule.extension));

        let source = RawFileSource::open(&m.target.path)?;
        // Never overwrite a file another carve already produced.
        let out = File::options()
            .write(true)
            .create_new(true)
            .open(&full_path)?;
        let copied = copy_range(&source, start, end, out)?;
        if copied.written < end - start {
            truncated = true;
        }

        Ok(Some(CarvedFile {
            run_id: self.run_id.clone(),
            source_path: m.target.path.to_string_lossy().to_string(),
            source_offset: start,
            description: m.description.clone(),
            path: full_path.to_string_lossy().to_string(),
            extension: rule.extension.clone(),
            size: copied.written,
            md5: copied.md5,
            sha256: copied.sha256,
            truncated,
            depth: m.target.depth + 1,
        }))
    }
}

pub fn sanitize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_ascii_lowercase()
}

pub(crate) struct CopiedRange {
    pub written: u64,
    pub md5: String,
    pub sha256: String,
}

/// Copy `[start, end)` of `source` into `out`, hashing as it goes. Stops
/// early at end of source.
pub(crate) fn copy_range(
    source: &dyn EvidenceSource,
    start: u64,
    end: u64,
    out: File,
) -> Result<CopiedRange, CarveError> {
    let mut writer = BufWriter::new(out);
    let mut md5 = md5::Context::new();
    let mut sha256 = Sha256::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut offset = start;

    while offset < end {
        let want = ((end - offset) as usize).min(buf.len());
        let n = source.read_at(offset, &mut buf[..want])?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        md5.consume(&buf[..n]);
        sha256.update(&buf[..n]);
        offset += n as u64;
    }
    writer.flush()?;

    Ok(CopiedRange {
        written: offset - start,
        md5: format!("{:x}", md5.compute()),
        sha256: hex::encode(sha256.finalize()),
    })
}
