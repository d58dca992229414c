//! Shared test infrastructure for end-to-end scans.
//!
//! Builds a run the same way the binary does (default config, JSONL
//! metadata, filesystem opener) and reads the metadata back.

#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use sigwalk::carve::CarveExtractor;
use sigwalk::config;
use sigwalk::metadata::terminal::TerminalSink;
use sigwalk::metadata::{self, FanoutSink, MatchSink, MetadataBackendKind, RunSummary};
use sigwalk::pipeline::{RunOptions, WorklistRunner};
use sigwalk::signature::SignatureSet;
use sigwalk::stream::{FsOpener, ScanWindow};
use sigwalk::util;

// ============================================================================
// Byte Builders
// ============================================================================

pub fn insert_bytes(target: &mut Vec<u8>, offset: usize, data: &[u8]) {
    let end = offset + data.len();
    if end > target.len() {
        target.resize(end, 0u8);
    }
    target[offset..end].copy_from_slice(data);
}

pub fn gzip_header() -> Vec<u8> {
    vec![0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03]
}

/// 64-byte uImage header declaring `data_size` bytes of payload.
pub fn uimage_header(data_size: u32) -> Vec<u8> {
    let mut data = vec![0u8; 64];
    data[0..4].copy_from_slice(&[0x27, 0x05, 0x19, 0x56]);
    data[12..16].copy_from_slice(&data_size.to_be_bytes());
    data[32..40].copy_from_slice(b"firmware");
    data
}

/// Little-endian squashfs superblock with `bytes_used` at offset 40.
pub fn squashfs_header(bytes_used: u64) -> Vec<u8> {
    let mut data = vec![0u8; 96];
    data[0..4].copy_from_slice(b"hsqs");
    data[28..30].copy_from_slice(&4u16.to_le_bytes());
    data[40..48].copy_from_slice(&bytes_used.to_le_bytes());
    data
}

pub fn write_input(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).expect("write input");
    path
}

// ============================================================================
// Run Helpers
// ============================================================================

#[derive(Debug, Clone)]
pub struct ScanSetup {
    pub block_size: usize,
    pub trailing_size: usize,
    pub window: ScanWindow,
    pub workers: usize,
    pub extract: bool,
    pub recursive: bool,
    pub max_depth: u32,
    pub exclude: Vec<String>,
}

impl Default for ScanSetup {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
            trailing_size: 8 * 1024,
            window: ScanWindow::default(),
            workers: 1,
            extract: false,
            recursive: false,
            max_depth: 8,
            exclude: Vec::new(),
        }
    }
}

/// Captures what the terminal table would print.
#[derive(Clone, Default)]
pub struct TerminalCapture(Arc<Mutex<Vec<u8>>>);

impl Write for TerminalCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| std::io::Error::other("capture lock poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl TerminalCapture {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().expect("capture lock").clone()).expect("utf8")
    }
}

pub struct ScanRun {
    pub summary: RunSummary,
    pub run_output_dir: PathBuf,
    /// Terminal table output of the run.
    pub terminal: String,
}

impl ScanRun {
    pub fn matches(&self) -> Vec<Value> {
        read_jsonl(&self.run_output_dir, "matches.jsonl")
    }

    pub fn carved(&self) -> Vec<Value> {
        read_jsonl(&self.run_output_dir, "carved_files.jsonl")
    }

    pub fn run_summaries(&self) -> Vec<Value> {
        read_jsonl(&self.run_output_dir, "run_summary.jsonl")
    }

    /// `(offset, description, valid)` for every match, in report order.
    pub fn match_triples(&self) -> Vec<(i64, String, bool)> {
        self.matches()
            .iter()
            .map(|m| {
                (
                    m["offset"].as_i64().expect("offset"),
                    m["description"].as_str().expect("description").to_string(),
                    m["valid"].as_bool().expect("valid"),
                )
            })
            .collect()
    }
}

pub fn read_jsonl(run_output_dir: &Path, name: &str) -> Vec<Value> {
    let path = run_output_dir.join("metadata").join(name);
    let content = fs::read_to_string(&path).unwrap_or_default();
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("jsonl record"))
        .collect()
}

/// Scan `targets` with the built-in signature set, writing metadata and
/// carved files under `out_dir`.
pub fn run_scan(out_dir: &Path, targets: &[PathBuf], setup: &ScanSetup) -> ScanRun {
    let loaded = config::load_config(None).expect("config");
    let mut cfg = loaded.config;
    cfg.run_id = "test_run".to_string();
    cfg.block_size = setup.block_size;
    cfg.trailing_size = setup.trailing_size;
    cfg.exclude = setup.exclude.clone();

    let run_output_dir = out_dir.join(&cfg.run_id);
    util::ensure_output_dir(&run_output_dir).expect("output dir");

    let signatures = SignatureSet::compile(&cfg.signatures).expect("signatures");
    let cancel = Arc::new(AtomicBool::new(false));
    let engine = util::build_engine(signatures, &cfg, false, cancel.clone()).expect("engine");

    let capture = TerminalCapture::default();
    let jsonl = metadata::build_sink(
        MetadataBackendKind::Jsonl,
        &cfg.run_id,
        env!("CARGO_PKG_VERSION"),
        &loaded.config_hash,
        &run_output_dir,
    )
    .expect("metadata sink");
    let sink: Arc<dyn MatchSink> = Arc::new(FanoutSink::new(vec![
        Box::new(TerminalSink::new(Box::new(capture.clone()), false)),
        jsonl,
    ]));

    let opener = FsOpener {
        block_size: cfg.block_size,
        trailing_size: cfg.trailing_size,
        window: setup.window,
    };
    let options = RunOptions {
        run_id: cfg.run_id.clone(),
        workers: setup.workers,
        recursive: setup.recursive,
        max_depth: setup.max_depth,
    };
    let mut runner = WorklistRunner::new(Arc::new(engine), Arc::new(opener), sink, options)
        .with_cancel(cancel);
    if setup.extract || setup.recursive {
        let extractor = CarveExtractor::new(
            &cfg.run_id,
            &run_output_dir,
            &cfg.extract_rules,
            cfg.carve_max_size,
        )
        .expect("extractor");
        runner = runner.with_extractor(Arc::new(extractor));
    }

    let summary = runner.run(targets);
    ScanRun {
        summary,
        run_output_dir,
        terminal: capture.text(),
    }
}
