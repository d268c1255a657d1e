//! Seekable byte stores the database lives in.
//!
//! All persistence goes through [`Backing`]; the engine never touches the
//! filesystem directly. Two implementations exist: [`FileBacking`] over a
//! [`std::fs::File`] and [`MemoryBacking`] over a `Vec<u8>`. Everything
//! that differs between a file database and a memory database collapses
//! into the construction choice.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::DbError;

/// A seekable, readable, writable byte store.
pub trait Backing: Send {
    /// Total length in bytes.
    fn len(&self) -> Result<u64, DbError>;

    /// Returns `true` when the store holds no bytes.
    fn is_empty(&self) -> Result<bool, DbError> {
        Ok(self.len()? == 0)
    }

    /// Moves the cursor to an absolute position.
    fn seek(&mut self, pos: u64) -> Result<(), DbError>;

    /// Current cursor position.
    fn position(&mut self) -> Result<u64, DbError>;

    /// Fills `buf` from the cursor, advancing it.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DbError>;

    /// Writes `buf` at the cursor, advancing it.
    fn write_all(&mut self, buf: &[u8]) -> Result<(), DbError>;

    /// Cuts the store down to `len` bytes.
    fn truncate(&mut self, len: u64) -> Result<(), DbError>;

    /// Pushes buffered writes to the underlying medium.
    fn flush(&mut self) -> Result<(), DbError>;

    /// Whether writes are permitted.
    fn writable(&self) -> bool;

    /// Reads the entire store into memory.
    ///
    /// Used for transaction snapshots and the compaction swap.
    fn read_all(&mut self) -> Result<Vec<u8>, DbError>;

    /// Replaces the entire contents and rewinds the cursor.
    fn replace_all(&mut self, bytes: &[u8]) -> Result<(), DbError>;
}

/// Sequential primitive reads over a [`Backing`], little-endian throughout.
pub(crate) trait BackingExt: Backing {
    fn read_u8(&mut self) -> Result<u8, DbError> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_i16(&mut self) -> Result<i16, DbError> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    fn read_i32(&mut self) -> Result<i32, DbError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_u32(&mut self) -> Result<u32, DbError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_f32(&mut self) -> Result<f32, DbError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    fn read_vec(&mut self, n: usize) -> Result<Vec<u8>, DbError> {
        let mut buf = vec![0u8; n];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads a .NET 7-bit varint length.
    fn read_varint(&mut self) -> Result<u32, DbError> {
        let mut value: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 28 {
                return Err(DbError::Corrupted {
                    reason: "varint length overflow".into(),
                });
            }
        }
    }

    /// Reads a length-prefixed UTF-8 string.
    fn read_string(&mut self) -> Result<String, DbError> {
        let len = self.read_varint()? as usize;
        let bytes = self.read_vec(len)?;
        String::from_utf8(bytes).map_err(|_| DbError::Corrupted {
            reason: "string is not valid UTF-8".into(),
        })
    }
}

impl<B: Backing + ?Sized> BackingExt for B {}

/// A database stored in a file.
#[derive(Debug)]
pub struct FileBacking {
    file: File,
    path: PathBuf,
    writable: bool,
}

impl FileBacking {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            writable: true,
        })
    }

    /// Opens an existing file.
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(DbError::DatabaseFileNotFound {
                path: path.display().to_string(),
            });
        }
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            writable: !read_only,
        })
    }

    /// The file's path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backing for FileBacking {
    fn len(&self) -> Result<u64, DbError> {
        Ok(self.file.metadata()?.len())
    }

    fn seek(&mut self, pos: u64) -> Result<(), DbError> {
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn position(&mut self) -> Result<u64, DbError> {
        Ok(self.file.stream_position()?)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DbError> {
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), DbError> {
        self.file.write_all(buf)?;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<(), DbError> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DbError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn read_all(&mut self) -> Result<Vec<u8>, DbError> {
        let mut bytes = Vec::with_capacity(self.len()? as usize);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn replace_all(&mut self, bytes: &[u8]) -> Result<(), DbError> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(bytes)?;
        self.file.flush()?;
        self.file.sync_all()?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

/// A database stored in memory.
#[derive(Debug, Default)]
pub struct MemoryBacking {
    buf: Vec<u8>,
    pos: usize,
}

impl MemoryBacking {
    /// An empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing database image.
    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    /// Consumes the store, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Backing for MemoryBacking {
    fn len(&self) -> Result<u64, DbError> {
        Ok(self.buf.len() as u64)
    }

    fn seek(&mut self, pos: u64) -> Result<(), DbError> {
        self.pos = pos as usize;
        Ok(())
    }

    fn position(&mut self) -> Result<u64, DbError> {
        Ok(self.pos as u64)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DbError> {
        let end = self.pos + buf.len();
        if end > self.buf.len() {
            return Err(DbError::Io {
                source: std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            });
        }
        buf.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), DbError> {
        let end = self.pos + buf.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<(), DbError> {
        self.buf.truncate(len as usize);
        self.pos = self.pos.min(self.buf.len());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DbError> {
        Ok(())
    }

    fn writable(&self) -> bool {
        true
    }

    fn read_all(&mut self) -> Result<Vec<u8>, DbError> {
        Ok(self.buf.clone())
    }

    fn replace_all(&mut self, bytes: &[u8]) -> Result<(), DbError> {
        self.buf = bytes.to_vec();
        self.pos = 0;
        Ok(())
    }
}
