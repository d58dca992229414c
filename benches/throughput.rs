use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use sigwalk::config;
use sigwalk::metadata::{MatchSink, NullSink, RunSummary};
use sigwalk::pipeline::{RunOptions, WorklistRunner};
use sigwalk::signature::SignatureSet;
use sigwalk::stream::FsOpener;
use sigwalk::util;

fn gzip_header() -> Vec<u8> {
    vec![0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03]
}

fn run_scan(targets: &[PathBuf], workers: usize) -> RunSummary {
    let loaded = config::load_config(None).expect("config");
    let mut cfg = loaded.config;
    cfg.run_id = "bench".to_string();

    let signatures = SignatureSet::compile(&cfg.signatures).expect("signatures");
    let engine = util::build_engine(signatures, &cfg, false, Arc::new(AtomicBool::new(false)))
        .expect("engine");
    let sink: Arc<dyn MatchSink> = Arc::new(NullSink);
    let opener = FsOpener {
        block_size: cfg.block_size,
        trailing_size: cfg.trailing_size,
        ..FsOpener::default()
    };
    let options = RunOptions {
        run_id: cfg.run_id.clone(),
        workers,
        ..RunOptions::default()
    };

    WorklistRunner::new(Arc::new(engine), Arc::new(opener), sink, options).run(targets)
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    for size in [8 * 1024 * 1024usize, 32 * 1024 * 1024usize] {
        group.bench_with_input(BenchmarkId::new("zeroes", size), &size, |b, &size| {
            let temp_dir = tempfile::tempdir().expect("tempdir");
            let input_path = temp_dir.path().join("image.bin");
            let file = File::create(&input_path).expect("create");
            file.set_len(size as u64).expect("set len");
            b.iter(|| run_scan(std::slice::from_ref(&input_path), 1));
        });
    }

    group.bench_function("gzip_dense", |b| {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let input_path = temp_dir.path().join("dense.bin");
        let mut file = File::create(&input_path).expect("create");
        let header = gzip_header();
        let padding = vec![0u8; 54];
        for _ in 0..16_384 {
            file.write_all(&header).expect("write");
            file.write_all(&padding).expect("write");
        }
        file.flush().expect("flush");
        b.iter(|| run_scan(std::slice::from_ref(&input_path), 1));
    });

    group.bench_function("many_targets_parallel", |b| {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let paths: Vec<PathBuf> = (0..8)
            .map(|i| {
                let path = temp_dir.path().join(format!("t{i}.bin"));
                let file = File::create(&path).expect("create");
                file.set_len(4 * 1024 * 1024).expect("set len");
                path
            })
            .collect();
        b.iter(|| run_scan(&paths, 4));
    });

    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
