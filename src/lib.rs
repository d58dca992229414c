//! # sigwalk
//!
//! Signature scanner for firmware images and other binary blobs. Targets
//! are read in overlapping blocks, candidate offsets are classified by a
//! signature set, and structured results can move the scan forward past
//! content they describe. Recognised content can be carved out and
//! rescanned, round after round, until nothing new turns up.

pub mod carve;
pub mod cli;
pub mod config;
pub mod evidence;
pub mod filter;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod scanner;
pub mod signature;
pub mod smart;
pub mod stream;
pub mod util;
