// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data-source capability consumed by [`RandomAccessBuffer`].
//!
//! A buffer never touches the medium directly; it drives one of several
//! source variants through the four-hook [`DataSource`] trait, selected at
//! construction time. The buffer guarantees that at most one thread invokes
//! `read_input` on a given source at any time, so implementations do not
//! need their own read-path serialization.
//!
//! Two in-tree variants exist: [`FileSource`] for plain files and
//! [`MemSource`] for in-memory (optionally circular) regions. Hardware and
//! protocol bindings live outside this crate and plug in through the same
//! trait.
//!
//! [`RandomAccessBuffer`]: crate::buffer::RandomAccessBuffer

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Capability contract supplied by a concrete data-source variant.
pub trait DataSource: Send + Sync {
    /// Total byte size of the medium. Queried lazily by the buffer, at most
    /// once per open session.
    fn query_byte_size(&self) -> Result<u64>;

    /// Acquire the underlying medium. Invoked on the buffer's 0→1 open
    /// transition only.
    fn open_input(&self) -> Result<()>;

    /// Release the underlying medium. Invoked on the buffer's 1→0 close
    /// transition only.
    fn close_input(&self) -> Result<()>;

    /// Positional raw read into `buf`, starting at `position`. Returns the
    /// number of bytes actually read (may be short near the end of a
    /// non-circular medium).
    fn read_input(&self, buf: &mut [u8], position: u64) -> Result<usize>;

    /// Whether positions wrap modulo total size instead of being
    /// range-checked. Changes only the position policy in `read()`.
    fn is_circular(&self) -> bool {
        false
    }
}

// ============================================================================
// FileSource
// ============================================================================

/// Plain-file data source with positional reads.
///
/// The file handle is held only between `open_input` and `close_input`.
pub struct FileSource {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileSource {
    /// Create a file source for `path`. The file is not opened until the
    /// owning buffer's first `open()`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    /// Path this source reads from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(err: &std::io::Error, what: &str) -> Error {
        Error::Io {
            code: err.raw_os_error().unwrap_or(-1),
            message: format!("{}: {}", what, err),
        }
    }
}

impl DataSource for FileSource {
    fn query_byte_size(&self) -> Result<u64> {
        let file = self.file.lock();
        match file.as_ref() {
            Some(f) => Ok(f.metadata()?.len()),
            None => Ok(std::fs::metadata(&self.path)?.len()),
        }
    }

    fn open_input(&self) -> Result<()> {
        let mut file = self.file.lock();
        if file.is_some() {
            return Ok(());
        }
        log::debug!("[FILE] opening '{}'", self.path.display());
        *file = Some(File::open(&self.path)?);
        Ok(())
    }

    fn close_input(&self) -> Result<()> {
        log::debug!("[FILE] closing '{}'", self.path.display());
        *self.file.lock() = None;
        Ok(())
    }

    fn read_input(&self, buf: &mut [u8], position: u64) -> Result<usize> {
        let mut file = self.file.lock();
        let f = file.as_mut().ok_or_else(|| Error::Io {
            code: -1,
            message: format!("file source '{}' is not open", self.path.display()),
        })?;

        f.seek(SeekFrom::Start(position))
            .map_err(|e| Self::io_error(&e, "seek"))?;

        // read() may return short before EOF; loop until full or EOF.
        let mut total = 0;
        while total < buf.len() {
            match f.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Self::io_error(&e, "read")),
            }
        }
        Ok(total)
    }
}

// ============================================================================
// MemSource
// ============================================================================

/// In-memory data source, optionally circular.
///
/// Used by tests and demos, and as the reference semantics for ring-style
/// media: on a circular source every position is valid and reads wrap
/// modulo the region size.
pub struct MemSource {
    data: Vec<u8>,
    circular: bool,
}

impl MemSource {
    /// Linear (non-circular) in-memory source.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            circular: false,
        }
    }

    /// Circular in-memory source; reads wrap modulo the region size.
    pub fn circular(data: Vec<u8>) -> Self {
        Self {
            data,
            circular: true,
        }
    }
}

impl DataSource for MemSource {
    fn query_byte_size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn open_input(&self) -> Result<()> {
        Ok(())
    }

    fn close_input(&self) -> Result<()> {
        Ok(())
    }

    fn read_input(&self, buf: &mut [u8], position: u64) -> Result<usize> {
        if self.data.is_empty() {
            return Err(Error::Io {
                code: -1,
                message: "memory source is empty".into(),
            });
        }

        let len = self.data.len();
        let pos = position as usize;

        if self.circular {
            // Wrapping copy; the region may be traversed more than once.
            let start = pos % len;
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = self.data[(start + i) % len];
            }
            return Ok(buf.len());
        }

        if pos >= len {
            return Ok(0);
        }
        let n = buf.len().min(len - pos);
        buf[..n].copy_from_slice(&self.data[pos..pos + n]);
        Ok(n)
    }

    fn is_circular(&self) -> bool {
        self.circular
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_mem_source_linear_read() {
        let src = MemSource::new((0..=9u8).collect());
        let mut buf = [0u8; 4];
        let n = src.read_input(&mut buf, 3).expect("read");
        assert_eq!(n, 4);
        assert_eq!(buf, [3, 4, 5, 6]);
    }

    #[test]
    fn test_mem_source_short_read_at_end() {
        let src = MemSource::new((0..=9u8).collect());
        let mut buf = [0u8; 8];
        let n = src.read_input(&mut buf, 7).expect("read");
        assert_eq!(n, 3);
        assert_eq!(&buf[..n], &[7, 8, 9]);
    }

    #[test]
    fn test_mem_source_read_past_end_returns_zero() {
        let src = MemSource::new(vec![1, 2, 3]);
        let mut buf = [0u8; 2];
        assert_eq!(src.read_input(&mut buf, 10).expect("read"), 0);
    }

    #[test]
    fn test_mem_source_circular_wraps() {
        let src = MemSource::circular(vec![10, 20, 30, 40]);
        assert!(src.is_circular());

        let mut buf = [0u8; 6];
        let n = src.read_input(&mut buf, 2).expect("read");
        assert_eq!(n, 6);
        assert_eq!(buf, [30, 40, 10, 20, 30, 40]);
    }

    #[test]
    fn test_mem_source_empty_is_error() {
        let src = MemSource::new(Vec::new());
        let mut buf = [0u8; 1];
        assert!(src.read_input(&mut buf, 0).is_err());
    }

    #[test]
    fn test_file_source_read_at_position() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(b"0123456789abcdef").expect("write");

        let src = FileSource::new(tmp.path());
        assert_eq!(src.query_byte_size().expect("size"), 16);

        src.open_input().expect("open");
        let mut buf = [0u8; 6];
        let n = src.read_input(&mut buf, 10).expect("read");
        assert_eq!(n, 6);
        assert_eq!(&buf, b"abcdef");
        src.close_input().expect("close");
    }

    #[test]
    fn test_file_source_read_requires_open() {
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        let src = FileSource::new(tmp.path());
        let mut buf = [0u8; 1];
        match src.read_input(&mut buf, 0) {
            Err(Error::Io { message, .. }) => assert!(message.contains("not open")),
            other => panic!("expected Error::Io, got {:?}", other),
        }
    }

    #[test]
    fn test_file_source_short_read_at_eof() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(b"abc").expect("write");

        let src = FileSource::new(tmp.path());
        src.open_input().expect("open");
        let mut buf = [0u8; 8];
        let n = src.read_input(&mut buf, 1).expect("read");
        assert_eq!(n, 2);
        assert_eq!(&buf[..n], b"bc");
    }
}
