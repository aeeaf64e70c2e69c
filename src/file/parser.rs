//! Cursor-based byte parser for fixed-layout snapshot records.
//!
//! The container stores its records (directory metadata, block headers, chapter headers,
//! profile target info, VM information, ...) as packed little-endian structs. [`Parser`] walks
//! such a record field by field with bounds checking on every read.
//!
//! # Examples
//!
//! ```rust
//! use heapscope::Parser;
//!
//! let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
//! let mut parser = Parser::new(&data);
//!
//! let first = parser.read_le::<u32>()?;
//! assert_eq!(first, 0x04030201);
//!
//! parser.seek(6)?;
//! assert_eq!(parser.read_le::<u16>()?, 0x0807);
//! # Ok::<(), heapscope::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, SnapshotIO},
    Result,
};

/// A cursor over a byte slice that decodes little-endian primitives.
///
/// The parser maintains an internal position and validates every read against the end of
/// the underlying data, so truncated records produce [`crate::Error::OutOfBounds`] instead of
/// panics.
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`Parser`] from a byte slice.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there are bytes left to read.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current position of the cursor.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Move the cursor to an absolute position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies beyond the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Move the cursor forward by `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the new position lies beyond the end of the data.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let Some(target) = self.position.checked_add(step) else {
            return Err(out_of_bounds_error!());
        };
        self.seek(target)
    }

    /// Read a little-endian value and advance the cursor.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough bytes remain.
    pub fn read_le<T: SnapshotIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read `len` raw bytes and advance the cursor.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let Some(end) = self.position.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };
        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Read a fixed-capacity inline UTF-8 buffer whose used length is stored separately.
    ///
    /// Reads `capacity` bytes and decodes the first `len` of them (clamped to `capacity`),
    /// replacing invalid sequences.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `capacity` bytes remain.
    pub fn read_fixed_string_utf8(&mut self, len: usize, capacity: usize) -> Result<String> {
        let bytes = self.read_bytes(capacity)?;
        let used = len.min(capacity);
        Ok(String::from_utf8_lossy(&bytes[..used]).into_owned())
    }

    /// Returns the data that has not been consumed yet.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        &self.data[self.position..]
    }
}
