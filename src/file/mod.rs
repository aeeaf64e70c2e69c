//! Byte-level access to snapshot captures.
//!
//! This module abstracts over where a capture's bytes live - a memory-mapped file on disk or
//! an in-memory buffer - and exposes bounds-checked, read-only slices over them. Everything
//! above this layer (blocks, chapters, heap sections) reads through [`File`].
//!
//! # Key Components
//!
//! - [`crate::file::File`] - Owned handle to a capture's bytes
//! - [`crate::file::Backend`] - Trait for different data sources (disk files, memory buffers)
//! - [`crate::file::parser::Parser`] - Cursor for decoding fixed-layout records
//! - [`crate::file::io`] - Little-endian primitive reads
//!
//! # Examples
//!
//! ```rust,no_run
//! use heapscope::File;
//!
//! let file = File::from_file("capture.snap".as_ref())?;
//! let magic = file.read_le::<u32>(0)?;
//! println!("{} bytes, header magic 0x{magic:08X}", file.len());
//! # Ok::<(), heapscope::Error>(())
//! ```

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{file::io::SnapshotIO, Error::Empty, Result};
use memory::Memory;
use physical::Physical;

/// Backend trait for file data sources.
///
/// All implementations must be thread-safe so that independent chapters can be decoded in
/// parallel over the same capture.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// A loaded snapshot capture.
///
/// `File` owns the backend holding the capture's bytes and hands out bounds-checked views
/// into it. It performs no interpretation of the container format itself; see
/// [`crate::lowlevel::ChapterReader`] for that.
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
}

impl File {
    /// Memory-maps the capture at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped, or if it is empty.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Wraps a capture that is already loaded into memory.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Empty`] if the buffer is empty.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        Ok(File {
            data: Box::new(data),
        })
    }

    /// Returns the total size of the loaded file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the file has a length of zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// Returns the complete file contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Returns `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the file.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }

    /// Decodes a little-endian primitive at an absolute file offset.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the value would extend past the end of the file.
    pub fn read_le<T: SnapshotIO>(&self, offset: usize) -> Result<T> {
        let bytes = self.data_slice(offset, std::mem::size_of::<T>())?;
        io::read_le(bytes)
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn load_memory() {
        let file = File::from_mem(vec![0xCD, 0xCD, 0xAB, 0xAE, 0x00]).unwrap();

        assert_eq!(file.len(), 5);
        assert!(!file.is_empty());
        assert_eq!(file.read_le::<u32>(0).unwrap(), 0xAEAB_CDCD);
        assert!(file.read_le::<u32>(2).is_err());
        assert_eq!(file.data_slice(4, 1).unwrap(), &[0x00]);
    }

    #[test]
    fn load_empty() {
        assert!(matches!(File::from_mem(Vec::new()), Err(Error::Empty)));
    }
}
