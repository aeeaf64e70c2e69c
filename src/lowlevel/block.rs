//! Chunked storage blocks.
//!
//! A block is a logical byte range of `total_bytes` that the container stores as a sequence of
//! `chunk_size` chunks placed at arbitrary file offsets. Chunks that happen to be physically
//! adjacent in the file are coalesced into [`MergedRange`]s when the block is constructed, so
//! that reads falling within one range can be served as a borrowed slice of the file.
//!
//! Two read paths exist and must agree byte-for-byte:
//! - [`Block::try_read_as_span`] - zero-copy lookup through the merged ranges
//! - [`Block::read`] - chunk-by-chunk copy that works for any in-bounds range

use std::borrow::Cow;

use crate::{file::File, Result};

/// Size of the on-disk block header (`chunk_size: u64`, `total_bytes: u64`).
pub const BLOCK_HEADER_SIZE: usize = 16;

/// A run of physically contiguous chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedRange {
    /// First logical block offset covered by this range
    pub block_start: u64,
    /// One past the last logical block offset covered by this range
    pub block_end: u64,
    /// File offset of `block_start`
    pub file_offset: u64,
}

impl MergedRange {
    fn contains(&self, offset: u64) -> bool {
        offset >= self.block_start && offset < self.block_end
    }
}

/// A logical byte range stored as scattered fixed-size chunks.
#[derive(Debug, Clone)]
pub struct Block {
    chunk_size: u64,
    total_bytes: u64,
    chunk_offsets: Vec<u64>,
    ranges: Vec<MergedRange>,
}

impl Block {
    /// Parses a block header and its chunk offset table at `offset` in `file`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the chunk size is zero or any chunk lies outside
    /// the file, and [`crate::Error::OutOfBounds`] if the header itself is truncated.
    pub fn parse(file: &File, offset: usize) -> Result<Block> {
        let chunk_size = file.read_le::<u64>(offset)?;
        let total_bytes = file.read_le::<u64>(offset + 8)?;

        if chunk_size == 0 {
            return Err(malformed_error!("Block at {} has a chunk size of 0", offset));
        }

        let chunk_count = usize::try_from(total_bytes.div_ceil(chunk_size))
            .map_err(|_| malformed_error!("Block at {} has too many chunks", offset))?;
        let table_len = chunk_count
            .checked_mul(8)
            .ok_or_else(|| malformed_error!("Block at {} has too many chunks", offset))?;
        let table = file.data_slice(offset + BLOCK_HEADER_SIZE, table_len)?;

        let mut chunk_offsets = Vec::with_capacity(chunk_count);
        let mut cursor = 0;
        for _ in 0..chunk_count {
            chunk_offsets.push(crate::file::io::read_le_at::<u64>(table, &mut cursor)?);
        }

        let block = Block::new(chunk_size, total_bytes, chunk_offsets)?;
        block.validate(file.len() as u64)?;
        Ok(block)
    }

    /// Builds a block from already decoded header values and pre-merges contiguous chunks.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the chunk count does not match
    /// `ceil(total_bytes / chunk_size)`.
    pub fn new(chunk_size: u64, total_bytes: u64, chunk_offsets: Vec<u64>) -> Result<Block> {
        if chunk_size == 0 {
            return Err(malformed_error!("Block chunk size must not be 0"));
        }
        let expected = total_bytes.div_ceil(chunk_size);
        if chunk_offsets.len() as u64 != expected {
            return Err(malformed_error!(
                "Block declares {} chunks but {} are required for {} bytes",
                chunk_offsets.len(),
                expected,
                total_bytes
            ));
        }

        let mut ranges: Vec<MergedRange> = Vec::new();
        for (index, &file_offset) in chunk_offsets.iter().enumerate() {
            let block_start = index as u64 * chunk_size;
            let block_end = block_start.saturating_add(chunk_size).min(total_bytes);

            if let Some(last) = ranges.last_mut() {
                let contiguous = last
                    .file_offset
                    .checked_add(last.block_end - last.block_start)
                    .is_some_and(|end| end == file_offset);
                if contiguous {
                    last.block_end = block_end;
                    continue;
                }
            }

            ranges.push(MergedRange {
                block_start,
                block_end,
                file_offset,
            });
        }

        Ok(Block {
            chunk_size,
            total_bytes,
            chunk_offsets,
            ranges,
        })
    }

    fn validate(&self, file_len: u64) -> Result<()> {
        for range in &self.ranges {
            let end = range
                .file_offset
                .checked_add(range.block_end - range.block_start)
                .ok_or_else(|| malformed_error!("Block chunk offset overflows"))?;
            if end > file_len {
                return Err(malformed_error!(
                    "Block chunk at file offset {} extends past the end of the file ({})",
                    range.file_offset,
                    file_len
                ));
            }
        }
        Ok(())
    }

    /// Size of each chunk in bytes.
    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Logical size of the block in bytes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// File offsets of every chunk, in logical order.
    #[must_use]
    pub fn chunk_offsets(&self) -> &[u64] {
        &self.chunk_offsets
    }

    /// Physically contiguous runs of chunks, in logical order.
    #[must_use]
    pub fn merged_ranges(&self) -> &[MergedRange] {
        &self.ranges
    }

    fn check_range(&self, offset: u64, length: usize) -> Result<u64> {
        let end = offset
            .checked_add(length as u64)
            .ok_or_else(|| out_of_bounds_error!())?;
        if end > self.total_bytes {
            return Err(out_of_bounds_error!());
        }
        Ok(end)
    }

    /// Returns the requested range as a borrowed slice of the file if it lies entirely within
    /// one merged range, or `None` if it spans a discontinuity.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the block.
    pub fn try_read_as_span<'f>(
        &self,
        file: &'f File,
        offset: u64,
        length: usize,
    ) -> Result<Option<&'f [u8]>> {
        let end = self.check_range(offset, length)?;
        if length == 0 {
            return Ok(Some(&[]));
        }

        let index = self.ranges.partition_point(|range| range.block_end <= offset);
        let Some(range) = self.ranges.get(index) else {
            return Err(out_of_bounds_error!());
        };
        debug_assert!(range.contains(offset));

        if end > range.block_end {
            return Ok(None);
        }

        let file_offset = range
            .file_offset
            .checked_add(offset - range.block_start)
            .and_then(|file_offset| usize::try_from(file_offset).ok())
            .ok_or_else(|| out_of_bounds_error!())?;
        file.data_slice(file_offset, length).map(Some)
    }

    /// Copies `length` bytes starting at logical `offset`, stitching together as many chunks
    /// as the range spans.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the block or a chunk exceeds
    /// the file.
    pub fn read(&self, file: &File, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.check_range(offset, length)?;

        let mut out = Vec::with_capacity(length);
        let mut chunk = offset / self.chunk_size;
        let mut chunk_offset = offset % self.chunk_size;

        while out.len() < length {
            let Some(&chunk_start) = self.chunk_offsets.get(chunk as usize) else {
                return Err(out_of_bounds_error!());
            };

            let available = (self.chunk_size - chunk_offset) as usize;
            let take = available.min(length - out.len());
            let start = chunk_start
                .checked_add(chunk_offset)
                .and_then(|start| usize::try_from(start).ok())
                .ok_or_else(|| out_of_bounds_error!())?;
            out.extend_from_slice(file.data_slice(start, take)?);

            chunk_offset = 0;
            chunk += 1;
        }

        Ok(out)
    }

    /// Reads a range, borrowing from the file when possible and copying otherwise.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the block.
    pub fn read_cow<'f>(&self, file: &'f File, offset: u64, length: usize) -> Result<Cow<'f, [u8]>> {
        match self.try_read_as_span(file, offset, length)? {
            Some(span) => Ok(Cow::Borrowed(span)),
            None => Ok(Cow::Owned(self.read(file, offset, length)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    /// Lays `payload` out in `chunk_size` chunks at the given chunk slots of a file whose slots
    /// are `chunk_size` bytes apart, starting at byte 64.
    fn scatter(payload: &[u8], chunk_size: usize, slots: &[usize]) -> (File, Block) {
        let base = 64;
        let slot_count = slots.iter().max().map_or(0, |m| m + 1);
        let mut data = vec![0xEEu8; base + slot_count * chunk_size];

        let mut offsets = Vec::new();
        for (index, chunk) in payload.chunks(chunk_size).enumerate() {
            let start = base + slots[index] * chunk_size;
            data[start..start + chunk.len()].copy_from_slice(chunk);
            offsets.push(start as u64);
        }

        let block = Block::new(chunk_size as u64, payload.len() as u64, offsets).unwrap();
        (File::from_mem(data).unwrap(), block)
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn merges_contiguous_chunks() {
        let bytes = payload(40);
        let (_, block) = scatter(&bytes, 8, &[0, 1, 4, 5, 2]);

        assert_eq!(
            block.merged_ranges(),
            &[
                MergedRange { block_start: 0, block_end: 16, file_offset: 64 },
                MergedRange { block_start: 16, block_end: 32, file_offset: 96 },
                MergedRange { block_start: 32, block_end: 40, file_offset: 80 },
            ]
        );
    }

    #[test]
    fn span_within_merged_range() {
        let bytes = payload(40);
        let (file, block) = scatter(&bytes, 8, &[0, 1, 4, 5, 2]);

        let span = block.try_read_as_span(&file, 3, 12).unwrap().unwrap();
        assert_eq!(span, &bytes[3..15]);

        assert!(block.try_read_as_span(&file, 12, 8).unwrap().is_none());
        assert!(matches!(block.read_cow(&file, 12, 8).unwrap(), Cow::Owned(_)));
        assert!(matches!(block.read_cow(&file, 16, 16).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn both_paths_agree() {
        let bytes = payload(103);
        for slots in [
            vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12],
            vec![12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
            vec![3, 4, 0, 1, 2, 9, 10, 11, 5, 6, 7, 8, 12],
        ] {
            let (file, block) = scatter(&bytes, 8, &slots);
            for offset in 0..bytes.len() {
                for length in 0..=(bytes.len() - offset).min(30) {
                    let copied = block.read(&file, offset as u64, length).unwrap();
                    assert_eq!(copied, &bytes[offset..offset + length]);

                    if let Some(span) =
                        block.try_read_as_span(&file, offset as u64, length).unwrap()
                    {
                        assert_eq!(span, copied.as_slice());
                    }
                }
            }
        }
    }

    #[test]
    fn out_of_range_is_an_error() {
        let bytes = payload(20);
        let (file, block) = scatter(&bytes, 8, &[2, 0, 1]);

        assert!(matches!(block.read(&file, 15, 6), Err(Error::OutOfBounds)));
        assert!(matches!(block.try_read_as_span(&file, 20, 1), Err(Error::OutOfBounds)));
        assert!(block.read(&file, u64::MAX, 2).is_err());
        assert_eq!(block.read(&file, 20, 0).unwrap().len(), 0);
    }

    #[test]
    fn chunk_count_mismatch() {
        assert!(Block::new(8, 17, vec![0, 8]).is_err());
        assert!(Block::new(0, 0, vec![]).is_err());
        assert!(Block::new(8, 0, vec![]).is_ok());
    }

    #[test]
    fn chunk_past_end_of_file() {
        let mut data = vec![0u8; 40];
        data[0..8].copy_from_slice(&8u64.to_le_bytes());
        data[8..16].copy_from_slice(&16u64.to_le_bytes());
        data[16..24].copy_from_slice(&24u64.to_le_bytes());
        data[24..32].copy_from_slice(&36u64.to_le_bytes());
        let file = File::from_mem(data).unwrap();

        assert!(matches!(Block::parse(&file, 0), Err(Error::Malformed { .. })));
    }

    #[test]
    fn chunk_offset_near_u64_max() {
        let mut data = vec![0u8; 40];
        data[0..8].copy_from_slice(&8u64.to_le_bytes());
        data[8..16].copy_from_slice(&16u64.to_le_bytes());
        data[16..24].copy_from_slice(&(u64::MAX - 4).to_le_bytes());
        data[24..32].copy_from_slice(&0u64.to_le_bytes());
        let file = File::from_mem(data).unwrap();

        assert!(matches!(Block::parse(&file, 0), Err(Error::Malformed { .. })));

        let block = Block::new(8, 16, vec![u64::MAX - 4, 0]).unwrap();
        assert_eq!(block.merged_ranges().len(), 2);
        assert!(matches!(block.read(&file, 5, 2), Err(Error::OutOfBounds)));
        assert!(matches!(block.try_read_as_span(&file, 5, 2), Err(Error::OutOfBounds)));
        assert!(matches!(block.read_cow(&file, 6, 4), Err(Error::OutOfBounds)));
        assert_eq!(block.read(&file, 8, 8).unwrap(), &file.data()[0..8]);
    }

    #[test]
    fn huge_chunk_size_does_not_overflow() {
        let chunk_size = (1u64 << 63) + 1;
        let block = Block::new(chunk_size, u64::MAX, vec![0, 64]).unwrap();
        assert_eq!(block.merged_ranges()[1].block_end, u64::MAX);
    }
}
