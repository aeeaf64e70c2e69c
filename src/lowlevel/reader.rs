//! Directory parsing and typed chapter reads.

use std::borrow::Cow;

use strum::EnumCount;

use crate::{
    file::{io::SnapshotIO, parser::Parser, File},
    lowlevel::{
        Block, Chapter, EntryFormat, EntryType, BLOCK_SECTION_HEADER_SIZE, CHAPTER_HEADER_SIZE,
        DIRECTORY_MAGIC, DIRECTORY_METADATA_SIZE, FOOTER_MAGIC, HEADER_MAGIC,
        SUPPORTED_BLOCK_SECTION_VERSION, SUPPORTED_DIRECTORY_VERSION,
    },
    Error, Result,
};

/// Resolves chapters to their blocks and exposes the three chapter read shapes.
///
/// The reader validates the container's magic numbers and versions when it is created and
/// keeps the parsed block and chapter tables for the lifetime of the capture. All reads are
/// pure functions over the immutable backing file, so a `ChapterReader` can be shared across
/// threads.
///
/// Chapters that are absent from the directory (common, since the format grew over time)
/// produce [`Error::ChapterMissing`] from the read methods; use
/// [`ChapterReader::has_chapter`] to probe optional chapters first.
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::{lowlevel::{ChapterReader, EntryType}, File};
///
/// let reader = ChapterReader::new(File::from_file("capture.snap".as_ref())?)?;
/// let names = reader.read_string_array_all(EntryType::TypeDescriptionsName)?;
/// println!("{} managed types", names.len());
/// # Ok::<(), heapscope::Error>(())
/// ```
#[derive(Debug)]
pub struct ChapterReader {
    file: File,
    blocks: Vec<Block>,
    chapters: Vec<Option<Chapter>>,
}

impl ChapterReader {
    /// Parses the container directory of `file`.
    ///
    /// # Errors
    /// Returns [`Error::BadMagic`] or [`Error::UnsupportedVersion`] for files this reader cannot
    /// interpret, and [`Error::Malformed`] / [`Error::OutOfBounds`] if directory, block or
    /// chapter offsets point outside the file.
    pub fn new(file: File) -> Result<ChapterReader> {
        let len = file.len();
        if len < 16 {
            return Err(malformed_error!("File is too small to be a snapshot ({} bytes)", len));
        }

        let magic = file.read_le::<u32>(0)?;
        if magic != HEADER_MAGIC {
            return Err(Error::BadMagic {
                what: "header",
                expected: HEADER_MAGIC,
                found: magic,
            });
        }

        let end_magic = file.read_le::<u32>(len - 4)?;
        if end_magic != FOOTER_MAGIC {
            return Err(Error::BadMagic {
                what: "footer",
                expected: FOOTER_MAGIC,
                found: end_magic,
            });
        }

        let directory_offset = to_offset(file.read_le::<u64>(len - 12)?)?;
        let mut directory = Parser::new(
            file.data_slice(directory_offset, DIRECTORY_METADATA_SIZE)
                .map_err(|_| malformed_error!("Directory offset {} is invalid", directory_offset))?,
        );

        let directory_magic = directory.read_le::<u32>()?;
        if directory_magic != DIRECTORY_MAGIC {
            return Err(Error::BadMagic {
                what: "directory",
                expected: DIRECTORY_MAGIC,
                found: directory_magic,
            });
        }

        let directory_version = directory.read_le::<u32>()?;
        if directory_version != SUPPORTED_DIRECTORY_VERSION {
            return Err(Error::UnsupportedVersion {
                what: "directory",
                expected: SUPPORTED_DIRECTORY_VERSION,
                found: directory_version,
            });
        }

        let blocks_offset = to_offset(directory.read_le::<u64>()?)?;
        let entries_count = directory.read_le::<i32>()?;

        let mut section = Parser::new(
            file.data_slice(blocks_offset, BLOCK_SECTION_HEADER_SIZE)
                .map_err(|_| malformed_error!("Block section offset {} is invalid", blocks_offset))?,
        );
        let section_version = section.read_le::<u32>()?;
        if section_version != SUPPORTED_BLOCK_SECTION_VERSION {
            return Err(Error::UnsupportedVersion {
                what: "block section",
                expected: SUPPORTED_BLOCK_SECTION_VERSION,
                found: section_version,
            });
        }
        let block_count = section.read_le::<i32>()?;

        let mut chapters = vec![None; EntryType::COUNT];
        if block_count < 1 {
            return Ok(ChapterReader {
                file,
                blocks: Vec::new(),
                chapters,
            });
        }

        let mut entry_count = usize::try_from(entries_count)
            .map_err(|_| malformed_error!("Negative directory entry count {}", entries_count))?;
        if entry_count > EntryType::COUNT {
            log::warn!(
                "Decreasing entry offset count from {} to {} to match the known chapter kinds",
                entry_count,
                EntryType::COUNT
            );
            entry_count = EntryType::COUNT;
        }

        let block_table = file.data_slice(
            blocks_offset + BLOCK_SECTION_HEADER_SIZE,
            block_count as usize * 8,
        )?;
        let blocks = decode_values::<u64>(block_table)?
            .into_iter()
            .map(|offset| Block::parse(&file, to_offset(offset)?))
            .collect::<Result<Vec<_>>>()?;

        let entry_table = file.data_slice(directory_offset + DIRECTORY_METADATA_SIZE, entry_count * 8)?;
        for (index, offset) in decode_values::<u64>(entry_table)?.into_iter().enumerate() {
            if offset == 0 {
                continue;
            }
            let Some(entry) = EntryType::from_repr(index as u16) else {
                continue;
            };

            let offset = to_offset(offset)?;
            if offset.saturating_add(CHAPTER_HEADER_SIZE) > len {
                return Err(malformed_error!(
                    "Chapter {} offset {} lies outside the file",
                    entry,
                    offset
                ));
            }

            let chapter = Chapter::parse(&file, offset)?;
            if chapter.header().block_index as usize >= blocks.len() {
                return Err(malformed_error!(
                    "Chapter {} references block {} but only {} blocks exist",
                    entry,
                    chapter.header().block_index,
                    blocks.len()
                ));
            }

            chapters[index] = Some(chapter);
        }

        Ok(ChapterReader {
            file,
            blocks,
            chapters,
        })
    }

    /// The underlying capture.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// All storage blocks, in block-index order.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Returns `true` if the directory references a chapter of this kind.
    #[must_use]
    pub fn has_chapter(&self, entry: EntryType) -> bool {
        self.chapters[entry as usize].is_some()
    }

    /// Returns the chapter of the given kind.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] if the snapshot does not contain it.
    pub fn chapter(&self, entry: EntryType) -> Result<&Chapter> {
        self.chapters[entry as usize]
            .as_ref()
            .ok_or(Error::ChapterMissing(entry))
    }

    /// Number of elements in a chapter, or 0 if the chapter is absent.
    #[must_use]
    pub fn element_count(&self, entry: EntryType) -> u64 {
        self.chapters[entry as usize]
            .as_ref()
            .map_or(0, Chapter::count)
    }

    fn block_of(&self, chapter: &Chapter) -> &Block {
        // block indices are validated when the directory is parsed
        &self.blocks[chapter.header().block_index as usize]
    }

    /// Raw bytes of elements `start..start + count`, borrowed from the file when the range is
    /// physically contiguous.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] for absent chapters and an out-of-range error if the
    /// element range exceeds the chapter or its block.
    pub fn read_chapter_body(&self, entry: EntryType, start: u64, count: u64) -> Result<Cow<'_, [u8]>> {
        let chapter = self.chapter(entry)?;
        let range = chapter.byte_range(start, count)?;
        let length = usize::try_from(range.end - range.start).map_err(|_| out_of_bounds_error!())?;

        self.block_of(chapter).read_cow(&self.file, range.start, length)
    }

    /// Bytes of a single-element chapter.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] for absent chapters and [`Error::Malformed`] if the
    /// chapter is not stored as a single element.
    pub fn read_as_struct(&self, entry: EntryType) -> Result<Cow<'_, [u8]>> {
        let chapter = self.chapter(entry)?;
        if chapter.format() != EntryFormat::SingleElement {
            return Err(malformed_error!(
                "Chapter {} is a {} chapter, not a single element",
                entry,
                chapter.format()
            ));
        }

        self.read_chapter_body(entry, 0, 1)
    }

    /// Decodes elements `start..start + count` of a constant-size chapter.
    ///
    /// Each element is decoded as one `T` from its first `size_of::<T>()` bytes.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] for absent chapters and [`Error::Malformed`] if the
    /// element size is smaller than `T`.
    pub fn read_fixed_array<T: SnapshotIO>(&self, entry: EntryType, start: u64, count: u64) -> Result<Vec<T>> {
        let chapter = self.chapter(entry)?;
        let element_size = match chapter.format() {
            EntryFormat::ConstantSizeElementArray | EntryFormat::SingleElement => {
                chapter.header().entries_meta as usize
            }
            other => {
                return Err(malformed_error!(
                    "Chapter {} is a {} chapter, not a constant-size array",
                    entry,
                    other
                ))
            }
        };

        if element_size < std::mem::size_of::<T>() {
            return Err(malformed_error!(
                "Chapter {} elements are {} bytes, too small for a {}-byte value",
                entry,
                element_size,
                std::mem::size_of::<T>()
            ));
        }

        let body = self.read_chapter_body(entry, start, count)?;
        body.chunks_exact(element_size)
            .map(crate::file::io::read_le::<T>)
            .collect()
    }

    /// Decodes every element of a constant-size chapter.
    ///
    /// # Errors
    /// See [`ChapterReader::read_fixed_array`].
    pub fn read_fixed_array_all<T: SnapshotIO>(&self, entry: EntryType) -> Result<Vec<T>> {
        let count = self.chapter(entry)?.count();
        self.read_fixed_array(entry, 0, count)
    }

    /// Decodes one element of a constant-size chapter without materialising the rest.
    ///
    /// # Errors
    /// See [`ChapterReader::read_fixed_array`].
    pub fn read_fixed_element<T: SnapshotIO>(&self, entry: EntryType, index: u64) -> Result<T> {
        let mut values = self.read_fixed_array::<T>(entry, index, 1)?;
        values.pop().ok_or_else(|| out_of_bounds_error!())
    }

    /// Raw bytes of elements `start..start + count` of a variable-size chapter, one buffer per
    /// element.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] for absent chapters and [`Error::Malformed`] if the
    /// chapter is not a variable-size array.
    pub fn read_variable_array(&self, entry: EntryType, start: u64, count: u64) -> Result<Vec<Vec<u8>>> {
        let chapter = self.chapter(entry)?;
        if chapter.format() != EntryFormat::DynamicSizeElementArray {
            return Err(malformed_error!(
                "Chapter {} is a {} chapter, not a variable-size array",
                entry,
                chapter.format()
            ));
        }

        let body = self.read_chapter_body(entry, start, count)?;
        Ok(chapter
            .relative_element_ranges(start, count)?
            .into_iter()
            .map(|range| body[range].to_vec())
            .collect())
    }

    /// Raw bytes of every element of a variable-size chapter.
    ///
    /// # Errors
    /// See [`ChapterReader::read_variable_array`].
    pub fn read_variable_array_all(&self, entry: EntryType) -> Result<Vec<Vec<u8>>> {
        let count = self.chapter(entry)?.count();
        self.read_variable_array(entry, 0, count)
    }

    /// Raw bytes of one element of an array chapter (either format).
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] for absent chapters and an out-of-range error if
    /// `index` exceeds the chapter.
    pub fn read_single_element_from_array(&self, entry: EntryType, index: u64) -> Result<Cow<'_, [u8]>> {
        self.read_chapter_body(entry, index, 1)
    }

    /// Decodes one variable-size element as a packed array of `T`.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the element length is not a multiple of `size_of::<T>()`.
    pub fn read_element_values<T: SnapshotIO>(&self, entry: EntryType, index: u64) -> Result<Vec<T>> {
        decode_values(&self.read_single_element_from_array(entry, index)?)
    }

    /// Decodes elements `start..start + count` of a variable-size chapter as UTF-8 strings.
    ///
    /// Each element is decoded independently; invalid sequences are replaced.
    ///
    /// # Errors
    /// See [`ChapterReader::read_variable_array`].
    pub fn read_string_array(&self, entry: EntryType, start: u64, count: u64) -> Result<Vec<String>> {
        let chapter = self.chapter(entry)?;
        let body = self.read_chapter_body(entry, start, count)?;

        Ok(chapter
            .relative_element_ranges(start, count)?
            .into_iter()
            .map(|range| String::from_utf8_lossy(&body[range]).into_owned())
            .collect())
    }

    /// Decodes every element of a variable-size chapter as UTF-8 strings.
    ///
    /// # Errors
    /// See [`ChapterReader::read_variable_array`].
    pub fn read_string_array_all(&self, entry: EntryType) -> Result<Vec<String>> {
        let count = self.chapter(entry)?.count();
        self.read_string_array(entry, 0, count)
    }

    /// Decodes a single UTF-8 string element.
    ///
    /// # Errors
    /// See [`ChapterReader::read_single_element_from_array`].
    pub fn read_string(&self, entry: EntryType, index: u64) -> Result<String> {
        let bytes = self.read_single_element_from_array(entry, index)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn to_offset(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| malformed_error!("Offset {} does not fit the address space", value))
}

/// Decodes a packed little-endian array of `T`.
pub(crate) fn decode_values<T: SnapshotIO>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(malformed_error!(
            "{} bytes is not a whole number of {}-byte values",
            bytes.len(),
            size
        ));
    }

    bytes.chunks_exact(size).map(crate::file::io::read_le::<T>).collect()
}
