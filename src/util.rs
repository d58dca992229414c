//! # Utility Module
//!
//! Glue between the CLI, the loaded config and the scan components.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, warn};

use crate::carve::CarveExtractor;
use crate::cli::CliOptions;
use crate::config::{Config, load_signature_file};
use crate::filter::RegexFilter;
use crate::metadata::MetadataBackendKind;
use crate::pipeline::scan::ScanEngine;
use crate::scanner::locator::PrefixLocator;
use crate::scanner::magic::MagicMatcher;
use crate::signature::{Signature, SignatureSet};
use crate::smart::SmartTranslator;
use crate::stream::{FsOpener, ScanWindow};

/// Convert CLI metadata backend to internal enum
pub fn backend_from_cli(backend: crate::cli::MetadataBackend) -> MetadataBackendKind {
    match backend {
        crate::cli::MetadataBackend::Jsonl => MetadataBackendKind::Jsonl,
        crate::cli::MetadataBackend::Csv => MetadataBackendKind::Csv,
        crate::cli::MetadataBackend::None => MetadataBackendKind::None,
    }
}

/// Ensure output directory exists and is writable, warning on unsafe permissions.
pub fn ensure_output_dir(path: &Path) -> Result<()> {
    if path.exists() {
        if !std::fs::metadata(path)?.is_dir() {
            bail!("output path is not a directory: {}", path.display());
        }
    } else {
        std::fs::create_dir_all(path)
            .with_context(|| format!("creating output directory {}", path.display()))?;
    }

    let probe_path = path.join(".sigwalk_write_probe");
    match OpenOptions::new().write(true).create(true).truncate(true).open(&probe_path) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe_path);
        }
        Err(err) => {
            return Err(anyhow!(
                "output directory is not writable: {} ({err})",
                path.display()
            ));
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)?.permissions().mode();
        if mode & 0o002 != 0 {
            warn!("output directory is world-writable: {}", path.display());
        }
    }

    Ok(())
}

/// Fold command-line overrides into the loaded config and check the
/// result is usable.
pub fn apply_cli_overrides(cfg: &mut Config, cli: &CliOptions) -> Result<()> {
    if let Some(kib) = cli.block_size_kib {
        cfg.block_size = kib.saturating_mul(1024);
    }
    if let Some(workers) = cli.workers {
        cfg.workers = workers;
    }
    if cfg.workers == 0 {
        cfg.workers = num_cpus::get();
    }
    if let Some(depth) = cli.depth {
        cfg.max_depth = depth;
    }
    if cli.show_invalid {
        cfg.show_invalid = true;
    }
    cfg.include.extend(cli.include.iter().cloned());
    cfg.exclude.extend(cli.exclude.iter().cloned());

    if cfg.block_size == 0 {
        bail!("block size must be greater than zero");
    }
    if cfg.trailing_size == 0 {
        bail!("trailing size must be greater than zero");
    }
    Ok(())
}

/// Signatures for this run. A raw byte string replaces everything else;
/// otherwise user signature files come first, then the built-in set (or
/// the opcode set with `--opcodes`).
pub fn build_signature_set(cfg: &Config, cli: &CliOptions) -> Result<SignatureSet> {
    if let Some(raw) = &cli.raw_bytes {
        let sig = Signature::from_raw_bytes(raw)
            .with_context(|| format!("invalid raw byte string {raw:?}"))?;
        return Ok(SignatureSet::new(vec![sig]));
    }

    let mut configs = Vec::new();
    for path in &cli.magic {
        let loaded = load_signature_file(path)?;
        debug!("{} signature(s) from {}", loaded.len(), path.display());
        configs.extend(loaded);
    }
    if cli.opcodes {
        configs.extend(cfg.opcode_signatures.iter().cloned());
    } else {
        configs.extend(cfg.signatures.iter().cloned());
    }

    let set = SignatureSet::compile(&configs)?;
    if set.is_empty() {
        bail!("no signatures to scan for");
    }
    Ok(set)
}

pub fn build_engine(
    signatures: SignatureSet,
    cfg: &Config,
    dumb: bool,
    cancel: Arc<AtomicBool>,
) -> Result<ScanEngine> {
    let locator = PrefixLocator::new(&signatures);
    let matcher = MagicMatcher::new(signatures);
    let filter = RegexFilter::new(&cfg.include, &cfg.exclude)?;
    let translator = if dumb {
        SmartTranslator::dumb()
    } else {
        SmartTranslator::new()
    };
    Ok(ScanEngine::new(
        Arc::new(locator),
        Arc::new(matcher),
        Arc::new(filter),
        Arc::new(translator),
    )
    .with_cancel(cancel))
}

pub fn build_opener(cfg: &Config, cli: &CliOptions) -> FsOpener {
    FsOpener {
        block_size: cfg.block_size,
        trailing_size: cfg.trailing_size,
        window: ScanWindow {
            offset: cli.offset,
            length: cli.length,
        },
    }
}

pub fn build_extractor(cfg: &Config, run_output_dir: &Path) -> Result<CarveExtractor> {
    if cfg.extract_rules.is_empty() {
        warn!("extraction requested but no extract rules are configured");
    }
    Ok(CarveExtractor::new(
        &cfg.run_id,
        run_output_dir,
        &cfg.extract_rules,
        cfg.carve_max_size,
    )?)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::config::load_config;

    fn cli(args: &[&str]) -> CliOptions {
        let mut argv = vec!["sigwalk"];
        argv.extend_from_slice(args);
        argv.push("fw.bin");
        CliOptions::try_parse_from(argv).expect("parse")
    }

    fn default_config() -> Config {
        load_config(None).expect("default config").config
    }

    #[test]
    fn overrides_merge_filters_and_sizes() {
        let mut cfg = default_config();
        apply_cli_overrides(
            &mut cfg,
            &cli(&["--block-size-kib", "4", "--workers", "3", "-x", "junk", "-d", "2"]),
        )
        .expect("overrides");
        assert_eq!(cfg.block_size, 4096);
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.max_depth, 2);
        assert!(cfg.exclude.contains(&"junk".to_string()));
    }

    #[test]
    fn zero_workers_means_every_core() {
        let mut cfg = default_config();
        apply_cli_overrides(&mut cfg, &cli(&["--workers", "0"])).expect("overrides");
        assert!(cfg.workers >= 1);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let mut cfg = default_config();
        assert!(apply_cli_overrides(&mut cfg, &cli(&["--block-size-kib", "0"])).is_err());
    }

    #[test]
    fn raw_bytes_replace_signature_set() {
        let cfg = default_config();
        let set = build_signature_set(&cfg, &cli(&["-R", "\\xde\\xad\\xbe\\xef"])).expect("set");
        assert_eq!(set.len(), 1);
        let sig = set.iter().next().expect("sig");
        assert_eq!(sig.anchor(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn opcodes_select_opcode_set() {
        let cfg = default_config();
        let files = build_signature_set(&cfg, &cli(&[])).expect("files");
        let opcodes = build_signature_set(&cfg, &cli(&["-A"])).expect("opcodes");
        assert_eq!(files.len(), cfg.signatures.len());
        assert_eq!(opcodes.len(), cfg.opcode_signatures.len());
    }

    #[test]
    fn user_magic_file_comes_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("custom.yml");
        std::fs::write(
            &path,
            "- id: custom\n  description: custom blob\n  magic: \"c0ffee\"\n",
        )
        .expect("write");
        let cfg = default_config();
        let set = build_signature_set(&cfg, &cli(&["-m", path.to_str().expect("utf8")]))
            .expect("set");
        assert_eq!(set.len(), cfg.signatures.len() + 1);
        assert_eq!(set.iter().next().expect("first").anchor(), &[0xc0, 0xff, 0xee]);
    }

    #[test]
    fn output_dir_is_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("nested").join("out");
        ensure_output_dir(&out).expect("ensure");
        assert!(out.is_dir());
    }

    #[test]
    fn output_path_that_is_a_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").expect("write");
        assert!(ensure_output_dir(&file).is_err());
    }
}
