use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::carve::CarvedFile;
use crate::metadata::{MatchSink, MetadataError, RunSummary, poisoned};
use crate::scanner::Match;

pub struct CsvSink {
    run_id: String,
    tool_version: String,
    config_hash: String,
    matches_writer: Mutex<csv::Writer<File>>,
    carved_writer: Mutex<csv::Writer<File>>,
    run_writer: Mutex<csv::Writer<File>>,
}

#[derive(Serialize)]
struct MatchCsv<'a> {
    run_id: &'a str,
    target_path: String,
    target_depth: u32,
    offset: i64,
    description: &'a str,
    size: Option<u64>,
    jump: Option<u64>,
    adjust: i64,
    valid: bool,
    tool_version: &'a str,
    config_hash: &'a str,
}

#[derive(Serialize)]
struct CarvedFileCsv<'a> {
    run_id: &'a str,
    source_path: &'a str,
    source_offset: u64,
    description: &'a str,
    path: &'a str,
    extension: &'a str,
    size: u64,
    md5: &'a str,
    sha256: &'a str,
    truncated: bool,
    depth: u32,
    tool_version: &'a str,
    config_hash: &'a str,
}

#[derive(Serialize)]
struct RunSummaryCsv<'a> {
    run_id: &'a str,
    rounds: u32,
    files_scanned: u64,
    files_failed: u64,
    bytes_scanned: u64,
    candidates: u64,
    matches: u64,
    invalid_matches: u64,
    jumps: u64,
    seeks: u64,
    files_carved: u64,
    cancelled: bool,
    tool_version: &'a str,
    config_hash: &'a str,
}

impl CsvSink {
    pub fn new(
        run_id: &str,
        tool_version: &str,
        config_hash: &str,
        run_output_dir: &Path,
    ) -> Result<Self, MetadataError> {
        let meta_dir = run_output_dir.join("metadata");
        std::fs::create_dir_all(&meta_dir)?;

        let matches_file = File::create(meta_dir.join("matches.csv"))?;
        let carved_file = File::create(meta_dir.join("carved_files.csv"))?;
        let run_file = File::create(meta_dir.join("run_summary.csv"))?;

        // Headers come from the record structs on the first serialize.
        let matches_writer = csv::WriterBuilder::new().from_writer(matches_file);
        let carved_writer = csv::WriterBuilder::new().from_writer(carved_file);
        let run_writer = csv::WriterBuilder::new().from_writer(run_file);

        Ok(Self {
            run_id: run_id.to_string(),
            tool_version: tool_version.to_string(),
            config_hash: config_hash.to_string(),
            matches_writer: Mutex::new(matches_writer),
            carved_writer: Mutex::new(carved_writer),
            run_writer: Mutex::new(run_writer),
        })
    }
}

impl MatchSink for CsvSink {
    fn record_match(&self, m: &Match) -> Result<(), MetadataError> {
        let row = MatchCsv {
            run_id: &self.run_id,
            target_path: m.target.path.to_string_lossy().to_string(),
            target_depth: m.target.depth,
            offset: m.offset,
            description: &m.description,
            size: m.size,
            jump: m.jump,
            adjust: m.adjust,
            valid: m.valid,
            tool_version: &self.tool_version,
            config_hash: &self.config_hash,
        };
        let mut guard = self.matches_writer.lock().map_err(|_| poisoned())?;
        guard.serialize(row)?;
        Ok(())
    }

    fn record_carved(&self, file: &CarvedFile) -> Result<(), MetadataError> {
        let row = CarvedFileCsv {
            run_id: &file.run_id,
            source_path: &file.source_path,
            source_offset: file.source_offset,
            description: &file.description,
            path: &file.path,
            extension: &file.extension,
            size: file.size,
            md5: &file.md5,
            sha256: &file.sha256,
            truncated: file.truncated,
            depth: file.depth,
            tool_version: &self.tool_version,
            config_hash: &self.config_hash,
        };
        let mut guard = self.carved_writer.lock().map_err(|_| poisoned())?;
        guard.serialize(row)?;
        Ok(())
    }

    fn record_run_summary(&self, summary: &RunSummary) -> Result<(), MetadataError> {
        let row = RunSummaryCsv {
            run_id: &summary.run_id,
            rounds: summary.rounds,
            files_scanned: summary.files_scanned,
            files_failed: summary.files_failed,
            bytes_scanned: summary.bytes_scanned,
            candidates: summary.candidates,
            matches: summary.matches,
            invalid_matches: summary.invalid_matches,
            jumps: summary.jumps,
            seeks: summary.seeks,
            files_carved: summary.files_carved,
            cancelled: summary.cancelled,
            tool_version: &self.tool_version,
            config_hash: &self.config_hash,
        };
        let mut guard = self.run_writer.lock().map_err(|_| poisoned())?;
        guard.serialize(row)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), MetadataError> {
        self.matches_writer.lock().map_err(|_| poisoned())?.flush()?;
        self.carved_writer.lock().map_err(|_| poisoned())?.flush()?;
        self.run_writer.lock().map_err(|_| poisoned())?.flush()?;
        Ok(())
    }
}
