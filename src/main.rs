use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use tracing::{info, warn};

use sigwalk::metadata::terminal::TerminalSink;
use sigwalk::metadata::{FanoutSink, MatchSink};
use sigwalk::pipeline::{RunOptions, WorklistRunner};
use sigwalk::{cli, config, logging, metadata, util};

fn main() -> Result<()> {
    let cli_opts = cli::parse();
    logging::init_logging(cli_opts.log_json);

    let loaded = config::load_config(cli_opts.config_path.as_deref())?;
    let mut cfg = loaded.config;
    util::apply_cli_overrides(&mut cfg, &cli_opts)?;

    let run_output_dir = cli_opts.output.join(&cfg.run_id);
    util::ensure_output_dir(&run_output_dir)?;

    let tool_version = env!("CARGO_PKG_VERSION");
    info!(
        "starting run_id={} targets={} output={} workers={} block_kib={}",
        cfg.run_id,
        cli_opts.targets.len(),
        run_output_dir.display(),
        cfg.workers,
        cfg.block_size / 1024
    );

    let cancel_flag = Arc::new(AtomicBool::new(false));
    {
        let flag = cancel_flag.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        }) {
            warn!("failed to install Ctrl+C handler: {err}");
        }
    }

    let signatures = util::build_signature_set(&cfg, &cli_opts)?;
    info!("loaded {} signature(s)", signatures.len());
    let engine = util::build_engine(signatures, &cfg, cli_opts.dumb, cancel_flag.clone())?;

    let meta_backend = util::backend_from_cli(cli_opts.metadata_backend);
    let meta_sink = metadata::build_sink(
        meta_backend,
        &cfg.run_id,
        tool_version,
        &loaded.config_hash,
        &run_output_dir,
    )?;
    let sinks: Vec<Box<dyn MatchSink>> = vec![
        Box::new(TerminalSink::stdout(cfg.show_invalid)),
        meta_sink,
    ];
    let sink: Arc<dyn MatchSink> = Arc::new(FanoutSink::new(sinks));

    let options = RunOptions {
        run_id: cfg.run_id.clone(),
        workers: cfg.workers,
        recursive: cli_opts.matryoshka,
        max_depth: cfg.max_depth,
    };
    let mut runner = WorklistRunner::new(
        Arc::new(engine),
        Arc::new(util::build_opener(&cfg, &cli_opts)),
        sink,
        options,
    )
    .with_cancel(cancel_flag.clone());
    if cli_opts.wants_extraction() {
        let extractor = util::build_extractor(&cfg, &run_output_dir)?;
        runner = runner.with_extractor(Arc::new(extractor));
    }

    let summary = runner.run(&cli_opts.targets);

    if summary.files_scanned == 0 && summary.files_failed == cli_opts.targets.len() as u64 {
        bail!("none of the {} target(s) could be scanned", cli_opts.targets.len());
    }
    if summary.cancelled {
        info!("shutdown requested; stopped early");
    }
    info!(
        "sigwalk run finished: files={} bytes={} matches={} invalid={} carved={}",
        summary.files_scanned,
        summary.bytes_scanned,
        summary.matches,
        summary.invalid_matches,
        summary.files_carved
    );
    Ok(())
}
