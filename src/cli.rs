use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataBackend {
    Jsonl,
    Csv,
    None,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Files to scan
    #[arg(required = true)]
    pub targets: Vec<PathBuf>,

    /// Output directory for extracted files and metadata
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Extra signature file (YAML list), loaded ahead of the built-in set
    #[arg(short = 'm', long)]
    pub magic: Vec<PathBuf>,

    /// Scan for a raw byte string instead of the signature set (\xNN escapes allowed)
    #[arg(short = 'R', long)]
    pub raw_bytes: Option<String>,

    /// Scan for executable opcode prologues instead of file signatures
    #[arg(short = 'A', long)]
    pub opcodes: bool,

    /// Do not act on size, jump or offset keywords in results
    #[arg(short = 'b', long)]
    pub dumb: bool,

    /// Only report results matching this regex (repeatable)
    #[arg(short = 'y', long)]
    pub include: Vec<String>,

    /// Drop results matching this regex (repeatable)
    #[arg(short = 'x', long)]
    pub exclude: Vec<String>,

    /// Show results that failed validation
    #[arg(short = 'I', long)]
    pub show_invalid: bool,

    /// Carve recognised content out of each target
    #[arg(short = 'e', long)]
    pub extract: bool,

    /// Rescan carved files recursively (implies --extract)
    #[arg(short = 'M', long)]
    pub matryoshka: bool,

    /// Deepest nesting level rescanned with --matryoshka (overrides config)
    #[arg(short = 'd', long)]
    pub depth: Option<u32>,

    /// Start scanning initial targets at this offset; negative counts from the end
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub offset: i64,

    /// Number of bytes to scan in initial targets
    #[arg(long)]
    pub length: Option<u64>,

    /// Block size, in KiB (overrides config when set)
    #[arg(long)]
    pub block_size_kib: Option<usize>,

    /// Number of worker threads; 0 uses every core (overrides config when set)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Metadata backend
    #[arg(long, value_enum, default_value_t = MetadataBackend::Jsonl)]
    pub metadata_backend: MetadataBackend,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl CliOptions {
    pub fn wants_extraction(&self) -> bool {
        self.extract || self.matryoshka
    }
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
