//! # Block Streams
//!
//! Sequential, seekable block reader over one scan target. Every block
//! carries a trailing peek of up to `trailing_size` bytes past its end so a
//! signature that starts near the end of a block still sees its whole
//! matching window. The peek is not consumed: the next block starts right
//! after the current block's `len` bytes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::evidence::{EvidenceError, EvidenceSource, RawFileSource, read_full_at};

pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_TRAILING_SIZE: usize = 8 * 1024;

/// Identity of a scan target, shared by every match found in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub path: PathBuf,
    /// Total file length in bytes, regardless of any scan window.
    pub len: u64,
    /// Number of extraction steps between this file and an initial target.
    pub depth: u32,
}

/// Region of a target to scan. A negative offset counts back from the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanWindow {
    pub offset: i64,
    pub length: Option<u64>,
}

#[derive(Debug)]
pub struct Block {
    /// `len` block bytes followed by the trailing peek.
    pub data: Vec<u8>,
    pub len: usize,
}

pub struct BlockStream {
    source: Box<dyn EvidenceSource>,
    start: u64,
    length: u64,
    total_read: u64,
    block_size: usize,
    trailing_size: usize,
}

impl BlockStream {
    pub fn new(source: Box<dyn EvidenceSource>, block_size: usize, trailing_size: usize) -> Self {
        Self::with_window(source, ScanWindow::default(), block_size, trailing_size)
    }

    pub fn with_window(
        source: Box<dyn EvidenceSource>,
        window: ScanWindow,
        block_size: usize,
        trailing_size: usize,
    ) -> Self {
        let file_len = source.len();
        let start = if window.offset < 0 {
            file_len.saturating_sub(window.offset.unsigned_abs())
        } else {
            (window.offset as u64).min(file_len)
        };
        let available = file_len - start;
        let length = window.length.map_or(available, |l| l.min(available));
        Self {
            source,
            start,
            length,
            total_read: 0,
            block_size: block_size.max(1),
            trailing_size,
        }
    }

    /// Total length of the underlying file.
    pub fn len(&self) -> u64 {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn scan_start(&self) -> u64 {
        self.start
    }

    pub fn scan_length(&self) -> u64 {
        self.length
    }

    /// Bytes consumed since `scan_start`, peeks excluded.
    pub fn total_read(&self) -> u64 {
        self.total_read
    }

    pub fn trailing_size(&self) -> usize {
        self.trailing_size
    }

    /// Absolute file offset of the next byte `read_block` will return.
    pub fn tell(&self) -> u64 {
        self.start + self.total_read
    }

    /// Reposition to an absolute file offset. Positions before the scan
    /// start clamp to it.
    pub fn seek(&mut self, position: u64) {
        self.total_read = position.saturating_sub(self.start);
    }

    /// Absolute offset of byte 0 of a block just returned by `read_block`.
    pub fn block_start(&self, block: &Block) -> u64 {
        self.tell() - block.len as u64
    }

    /// Read the next block. `Ok(None)` means the scan window is exhausted.
    pub fn read_block(&mut self) -> Result<Option<Block>, EvidenceError> {
        if self.total_read >= self.length {
            return Ok(None);
        }
        let remaining = self.length - self.total_read;
        let want = (self.block_size as u64).min(remaining) as usize;
        let peek = (self.trailing_size as u64).min(remaining - want as u64) as usize;

        let mut data = vec![0u8; want + peek];
        let n = read_full_at(self.source.as_ref(), self.tell(), &mut data)?;
        if n == 0 {
            return Ok(None);
        }
        data.truncate(n);
        let len = n.min(want);
        self.total_read += len as u64;
        Ok(Some(Block { data, len }))
    }
}

/// An opened target: its identity plus the stream that scans it.
pub struct TargetFile {
    pub info: Arc<TargetInfo>,
    pub stream: BlockStream,
}

impl TargetFile {
    pub fn from_source(
        path: impl Into<PathBuf>,
        depth: u32,
        source: Box<dyn EvidenceSource>,
        block_size: usize,
        trailing_size: usize,
    ) -> Self {
        let info = Arc::new(TargetInfo {
            path: path.into(),
            len: source.len(),
            depth,
        });
        Self {
            info,
            stream: BlockStream::new(source, block_size, trailing_size),
        }
    }
}

impl std::fmt::Debug for TargetFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetFile")
            .field("info", &self.info)
            .field("tell", &self.stream.tell())
            .finish()
    }
}

pub trait FileOpener: Send + Sync {
    fn open(&self, path: &Path, depth: u32) -> Result<TargetFile, EvidenceError>;
}

/// Opens targets from the filesystem. The scan window only applies to
/// initial targets; extracted files are always scanned whole.
#[derive(Debug, Clone, Copy)]
pub struct FsOpener {
    pub block_size: usize,
    pub trailing_size: usize,
    pub window: ScanWindow,
}

impl Default for FsOpener {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            trailing_size: DEFAULT_TRAILING_SIZE,
            window: ScanWindow::default(),
        }
    }
}

impl FileOpener for FsOpener {
    fn open(&self, path: &Path, depth: u32) -> Result<TargetFile, EvidenceError> {
        let source = RawFileSource::open(path)?;
        let info = Arc::new(TargetInfo {
            path: path.to_path_buf(),
            len: source.len(),
            depth,
        });
        let window = if depth == 0 {
            self.window
        } else {
            ScanWindow::default()
        };
        Ok(TargetFile {
            info,
            stream: BlockStream::with_window(
                Box::new(source),
                window,
                self.block_size,
                self.trailing_size,
            ),
        })
    }
}
