use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a local file sequentially in fixed-size chunks.
pub struct ChunkReader {
    file: File,
    chunk_size: usize,
    offset: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn new(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            offset: 0,
            file_size,
        })
    }

    /// Reads the next chunk. Returns `None` at EOF.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        let remaining = self.file_size.saturating_sub(self.offset);
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        let n = self.file.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);

        self.offset += n as u64;
        Ok(Some(buf))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// File size in bytes when it was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// Writes a local file sequentially, replacing any previous content.
///
/// The parent directory must already exist.
pub struct ChunkWriter {
    file: File,
    written: u64,
}

impl ChunkWriter {
    /// Creates (or truncates) `path`.
    pub fn create(path: &Path) -> Result<Self, TransferError> {
        let file = File::create(path)?;
        Ok(Self { file, written: 0 })
    }

    /// Appends `data` and returns the number of bytes written.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<u64, TransferError> {
        self.file.write_all(data)?;
        self.written += data.len() as u64;
        Ok(data.len() as u64)
    }

    /// Flushes to disk and returns the total bytes written.
    pub fn finish(mut self) -> Result<u64, TransferError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(self.written)
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}
