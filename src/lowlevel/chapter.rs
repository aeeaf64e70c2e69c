//! Chapter headers and element addressing.
//!
//! A chapter is one logical data stream of the container. Its header names the block it is
//! stored in and how its elements are laid out; for variable-size chapters the header is
//! followed by one cumulative end offset per element.

use std::ops::Range;

use crate::{
    file::{io::read_le_at, parser::Parser, File},
    lowlevel::EntryFormat,
    Error, Result,
};

/// Size of the packed on-disk chapter header.
pub const CHAPTER_HEADER_SIZE: usize = 18;

/// The packed header preceding every chapter.
///
/// The meaning of the two meta fields depends on the format:
///
/// | format | `entries_meta` | `header_meta` |
/// |---|---|---|
/// | single | element size | block offset of the element |
/// | fixed array | element size | element count |
/// | dynamic array | element count | total data size |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterHeader {
    /// Storage format of the chapter
    pub format: EntryFormat,
    /// Index of the block holding the chapter data
    pub block_index: u32,
    /// Format-dependent, see the type documentation
    pub entries_meta: u32,
    /// Format-dependent, see the type documentation
    pub header_meta: u64,
}

impl ChapterHeader {
    /// Decodes a header from the start of `data`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for unknown or undefined formats and
    /// [`Error::OutOfBounds`] if `data` is truncated.
    pub fn parse(data: &[u8]) -> Result<ChapterHeader> {
        let mut parser = Parser::new(data);

        let raw_format = parser.read_le::<u16>()?;
        let format = match EntryFormat::from_repr(raw_format) {
            Some(EntryFormat::Undefined) | None => return Err(Error::InvalidFormat(raw_format)),
            Some(format) => format,
        };

        Ok(ChapterHeader {
            format,
            block_index: parser.read_le::<u32>()?,
            entries_meta: parser.read_le::<u32>()?,
            header_meta: parser.read_le::<u64>()?,
        })
    }

    /// Number of elements stored in the chapter.
    #[must_use]
    pub fn count(&self) -> u64 {
        match self.format {
            EntryFormat::SingleElement => 1,
            EntryFormat::ConstantSizeElementArray => self.header_meta,
            EntryFormat::DynamicSizeElementArray => u64::from(self.entries_meta),
            EntryFormat::Undefined => 0,
        }
    }
}

/// A resolved chapter: its header plus, for dynamic arrays, the element end offsets.
#[derive(Debug, Clone)]
pub struct Chapter {
    header: ChapterHeader,
    end_offsets: Vec<u64>,
}

impl Chapter {
    /// Reads a chapter header (and its end offset table) at `offset`.
    ///
    /// # Errors
    /// Returns an error if the header is truncated, declares an unknown format, or its end
    /// offsets decrease.
    pub fn parse(file: &File, offset: usize) -> Result<Chapter> {
        let header = ChapterHeader::parse(file.data_slice(offset, CHAPTER_HEADER_SIZE)?)?;

        let mut end_offsets = Vec::new();
        if header.format == EntryFormat::DynamicSizeElementArray {
            let count = header.entries_meta as usize;
            let table = file.data_slice(offset + CHAPTER_HEADER_SIZE, count * 8)?;

            end_offsets.reserve(count);
            let mut cursor = 0;
            for _ in 0..count {
                end_offsets.push(read_le_at::<u64>(table, &mut cursor)?);
            }
        }

        Chapter::new(header, end_offsets)
    }

    /// Builds a chapter from decoded parts.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if a dynamic chapter's end offsets are missing or decrease.
    pub fn new(header: ChapterHeader, end_offsets: Vec<u64>) -> Result<Chapter> {
        if header.format == EntryFormat::DynamicSizeElementArray {
            if end_offsets.len() as u64 != header.count() {
                return Err(malformed_error!(
                    "Dynamic chapter declares {} elements but has {} end offsets",
                    header.count(),
                    end_offsets.len()
                ));
            }
            if end_offsets.windows(2).any(|pair| pair[1] < pair[0]) {
                return Err(malformed_error!("Dynamic chapter end offsets are not monotonic"));
            }
        }

        Ok(Chapter {
            header,
            end_offsets,
        })
    }

    /// The chapter header.
    #[must_use]
    pub fn header(&self) -> &ChapterHeader {
        &self.header
    }

    /// Storage format of the chapter.
    #[must_use]
    pub fn format(&self) -> EntryFormat {
        self.header.format
    }

    /// Number of elements stored in the chapter.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.header.count()
    }

    /// Cumulative end offsets of a dynamic chapter's elements (empty for other formats).
    #[must_use]
    pub fn end_offsets(&self) -> &[u64] {
        &self.end_offsets
    }

    fn check_elements(&self, start: u64, count: u64) -> Result<()> {
        let end = start.checked_add(count).ok_or_else(|| out_of_bounds_error!())?;
        if end > self.count() {
            return Err(malformed_error!(
                "Element range {}..{} exceeds chapter element count {}",
                start,
                end,
                self.count()
            ));
        }
        Ok(())
    }

    /// Logical block range holding elements `start..start + count`.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the element range exceeds the chapter.
    pub fn byte_range(&self, start: u64, count: u64) -> Result<Range<u64>> {
        match self.header.format {
            EntryFormat::SingleElement => {
                self.check_elements(start, count)?;
                let begin = self.header.header_meta;
                Ok(begin..begin + u64::from(self.header.entries_meta) * count)
            }
            EntryFormat::ConstantSizeElementArray => {
                self.check_elements(start, count)?;
                let size = u64::from(self.header.entries_meta);
                Ok(size * start..size * (start + count))
            }
            EntryFormat::DynamicSizeElementArray => {
                self.check_elements(start, count)?;
                Ok(self.element_start(start)..self.element_start(start + count))
            }
            EntryFormat::Undefined => Err(Error::InvalidFormat(EntryFormat::Undefined as u16)),
        }
    }

    /// Start offset of a dynamic element: the end offset of its predecessor, or 0.
    fn element_start(&self, index: u64) -> u64 {
        if index == 0 {
            0
        } else {
            self.end_offsets[(index - 1) as usize]
        }
    }

    /// Logical block range of a single element.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if `index` exceeds the chapter.
    pub fn element_range(&self, index: u64) -> Result<Range<u64>> {
        self.byte_range(index, 1)
    }

    /// Splits the block range of `start..start + count` into per-element ranges relative to the
    /// range's own start. Only meaningful for dynamic chapters.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the element range exceeds the chapter.
    pub fn relative_element_ranges(&self, start: u64, count: u64) -> Result<Vec<Range<usize>>> {
        let base = self.byte_range(start, count)?.start;
        (start..start + count)
            .map(|index| {
                let range = self.element_range(index)?;
                Ok((range.start - base) as usize..(range.end - base) as usize)
            })
            .collect()
    }
}
