//! The snapshot container format.
//!
//! A snapshot capture is a self-describing, chunked, chaptered binary container:
//!
//! ```text
//! +--------------------+ 0
//! | header magic       |   u32 0xAEABCDCD
//! | chunk data ...     |
//! | chapter headers    |
//! | block section      |   { version, count } + count x u64 block offsets
//! | directory metadata |   { magic 0xCDCDAEAB, version, blocks_offset, entries_count }
//! | entry offsets      |   entries_count x u64 chapter offsets (0 = absent)
//! | directory offset   |   u64
//! | footer magic       |   u32 0xABCDCDAE
//! +--------------------+ len
//! ```
//!
//! # Key Components
//!
//! - [`crate::lowlevel::Block`] - Chunked storage with merged contiguous ranges
//! - [`crate::lowlevel::Chapter`] - Chapter header and element addressing
//! - [`crate::lowlevel::ChapterReader`] - Directory parsing and typed chapter reads
//! - [`crate::lowlevel::EntryType`] - Every chapter kind known to the directory

mod block;
mod chapter;
mod entry;
mod reader;

pub use block::{Block, MergedRange, BLOCK_HEADER_SIZE};
pub use chapter::{Chapter, ChapterHeader, CHAPTER_HEADER_SIZE};
pub use entry::{EntryFormat, EntryType};
pub use reader::ChapterReader;

/// Magic number at the very start of a capture.
pub const HEADER_MAGIC: u32 = 0xAEAB_CDCD;
/// Magic number opening the directory metadata record.
pub const DIRECTORY_MAGIC: u32 = 0xCDCD_AEAB;
/// Magic number in the last four bytes of a capture.
pub const FOOTER_MAGIC: u32 = 0xABCD_CDAE;
/// The only directory layout version this reader understands.
pub const SUPPORTED_DIRECTORY_VERSION: u32 = 0x2017_0724;
/// The only block section layout version this reader understands.
pub const SUPPORTED_BLOCK_SECTION_VERSION: u32 = 0x2017_0724;
/// Size of the packed directory metadata record.
pub const DIRECTORY_METADATA_SIZE: usize = 20;
/// Size of the block section header (`version: u32`, `count: i32`).
pub const BLOCK_SECTION_HEADER_SIZE: usize = 8;
