use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::pipeline::DEFAULT_MAX_DEPTH;
use crate::stream::{DEFAULT_BLOCK_SIZE, DEFAULT_TRAILING_SIZE};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldKeyword {
    Size,
    Jump,
    Adjust,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Integer read out of the matched structure and turned into a smart
/// keyword. `offset` is relative to the magic bytes.
#[derive(Debug, Deserialize, Clone)]
pub struct FieldConfig {
    pub keyword: FieldKeyword,
    pub offset: u64,
    pub width: u8,
    #[serde(default)]
    pub endian: Endian,
    #[serde(default)]
    pub add: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignatureConfig {
    pub id: String,
    pub description: String,
    /// Hex bytes; `??` matches any byte.
    pub magic: String,
    /// Position of the magic inside the structure it identifies.
    #[serde(default)]
    pub magic_offset: u64,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractRuleConfig {
    pub pattern: String,
    pub extension: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub run_id: String,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_trailing_size")]
    pub trailing_size: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub show_invalid: bool,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub carve_max_size: u64,
    pub signatures: Vec<SignatureConfig>,
    #[serde(default)]
    pub opcode_signatures: Vec<SignatureConfig>,
    #[serde(default)]
    pub extract_rules: Vec<ExtractRuleConfig>,
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_trailing_size() -> usize {
    DEFAULT_TRAILING_SIZE
}

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

fn default_workers() -> usize {
    1
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p).with_context(|| format!("reading config {}", p.display()))?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let mut config: Config = serde_yaml::from_slice(&bytes)?;
    if config.run_id.trim().is_empty() {
        config.run_id = generate_run_id();
    }

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig { config, config_hash })
}

/// Load a user signature file: a YAML list of signature definitions.
pub fn load_signature_file(path: &Path) -> Result<Vec<SignatureConfig>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading signature file {}", path.display()))?;
    let signatures: Vec<SignatureConfig> = serde_yaml::from_slice(&bytes)
        .with_context(|| format!("parsing signature file {}", path.display()))?;
    Ok(signatures)
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}

fn generate_run_id() -> String {
    let now = chrono::Utc::now();
    format!("{}_{}", now.format("%Y%m%dT%H%M%SZ"), rand_suffix())
}

fn rand_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:08x}", nanos)
}
