use std::fs::File;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a regular file: {0}")]
    Unsupported(String),
}

/// Random-access byte source backing one scan target.
pub trait EvidenceSource: Send + Sync {
    fn len(&self) -> u64;
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, EvidenceError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct RawFileSource {
    file: File,
    len: u64,
    #[cfg(not(unix))]
    lock: std::sync::Mutex<()>,
}

impl RawFileSource {
    pub fn open(path: &Path) -> Result<Self, EvidenceError> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(EvidenceError::Unsupported(path.display().to_string()));
        }
        Ok(Self {
            file,
            len: metadata.len(),
            #[cfg(not(unix))]
            lock: std::sync::Mutex::new(()),
        })
    }
}

impl EvidenceSource for RawFileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, EvidenceError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let _guard = self
                .lock
                .lock()
                .map_err(|_| std::io::Error::other("evidence lock poisoned"))?;
            let mut f = &self.file;
            f.seek(SeekFrom::Start(offset))?;
            Ok(f.read(buf)?)
        }
    }
}

/// In-memory source, used for tests and for scanning buffers that never
/// touched the disk.
pub struct SliceSource {
    data: Vec<u8>,
}

impl SliceSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl EvidenceSource for SliceSource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, EvidenceError> {
        if offset >= self.data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let to_copy = buf.len().min(self.data.len() - start);
        buf[..to_copy].copy_from_slice(&self.data[start..start + to_copy]);
        Ok(to_copy)
    }
}

/// Fill `buf` from `offset`, stopping early only at end of source.
pub fn read_full_at(
    source: &dyn EvidenceSource,
    offset: u64,
    buf: &mut [u8],
) -> Result<usize, EvidenceError> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = source.read_at(offset + filled as u64, &mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
