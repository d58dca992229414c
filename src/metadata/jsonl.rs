use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::carve::CarvedFile;
use crate::metadata::{MatchSink, MetadataError, RunSummary, poisoned};
use crate::scanner::Match;

pub struct JsonlSink {
    run_id: String,
    tool_version: String,
    config_hash: String,
    matches: Mutex<BufWriter<File>>,
    carved: Mutex<BufWriter<File>>,
    runs: Mutex<BufWriter<File>>,
}

#[derive(Serialize)]
struct MatchRecord<'a> {
    run_id: &'a str,
    target_path: String,
    target_len: u64,
    target_depth: u32,
    #[serde(flatten)]
    m: &'a Match,
    tool_version: &'a str,
    config_hash: &'a str,
}

#[derive(Serialize)]
struct CarvedFileRecord<'a> {
    #[serde(flatten)]
    file: &'a CarvedFile,
    tool_version: &'a str,
    config_hash: &'a str,
}

#[derive(Serialize)]
struct RunSummaryRecord<'a> {
    #[serde(flatten)]
    summary: &'a RunSummary,
    tool_version: &'a str,
    config_hash: &'a str,
}

impl JsonlSink {
    pub fn new(
        run_id: &str,
        tool_version: &str,
        config_hash: &str,
        run_output_dir: &Path,
    ) -> Result<Self, MetadataError> {
        let meta_dir = run_output_dir.join("metadata");
        std::fs::create_dir_all(&meta_dir)?;
        let open = |name: &str| -> Result<Mutex<BufWriter<File>>, MetadataError> {
            Ok(Mutex::new(BufWriter::new(File::create(meta_dir.join(name))?)))
        };
        Ok(Self {
            run_id: run_id.to_string(),
            tool_version: tool_version.to_string(),
            config_hash: config_hash.to_string(),
            matches: open("matches.jsonl")?,
            carved: open("carved_files.jsonl")?,
            runs: open("run_summary.jsonl")?,
        })
    }
}

fn write_line<T: Serialize>(writer: &Mutex<BufWriter<File>>, record: &T) -> Result<(), MetadataError> {
    let mut guard = writer.lock().map_err(|_| poisoned())?;
    serde_json::to_writer(&mut *guard, record)?;
    guard.write_all(b"\n")?;
    Ok(())
}

impl MatchSink for JsonlSink {
    fn record_match(&self, m: &Match) -> Result<(), MetadataError> {
        let record = MatchRecord {
            run_id: &self.run_id,
            target_path: m.target.path.to_string_lossy().to_string(),
            target_len: m.target.len,
            target_depth: m.target.depth,
            m,
            tool_version: &self.tool_version,
            config_hash: &self.config_hash,
        };
        write_line(&self.matches, &record)
    }

    fn record_carved(&self, file: &CarvedFile) -> Result<(), MetadataError> {
        let record = CarvedFileRecord {
            file,
            tool_version: &self.tool_version,
            config_hash: &self.config_hash,
        };
        write_line(&self.carved, &record)
    }

    fn record_run_summary(&self, summary: &RunSummary) -> Result<(), MetadataError> {
        let record = RunSummaryRecord {
            summary,
            tool_version: &self.tool_version,
            config_hash: &self.config_hash,
        };
        write_line(&self.runs, &record)
    }

    fn flush(&self) -> Result<(), MetadataError> {
        for writer in [&self.matches, &self.carved, &self.runs] {
            writer.lock().map_err(|_| poisoned())?.flush()?;
        }
        Ok(())
    }
}
