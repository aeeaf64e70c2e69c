// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory
#![allow(clippy::too_many_arguments)]

//! # heapscope
//!
//! A reader for Unity memory snapshot captures and an analyzer for the managed heap they contain.
//! Built in pure Rust, `heapscope` opens the chunked, chaptered capture container, decodes the
//! managed type and field metadata, reconstructs the object graph reachable from the garbage
//! collector's roots and static fields, and finds *leaked managed shells*: engine objects whose
//! native counterpart has been destroyed while the managed wrapper is still referenced.
//!
//! ## Features
//!
//! - **Efficient memory access** - Memory-mapped captures, chunk reads without copies where chunks are contiguous
//! - **Complete container support** - Directory, block section and all three chapter storage formats
//! - **Managed heap graph** - Objects, arrays, strings, enums and inline value types with cycle and depth guards
//! - **Leak detection** - Leaked shell detection with retention paths and a plain-text report
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use heapscope::prelude::*;
//!
//! let snapshot = SnapshotFile::from_file("capture.snap")?;
//! println!("Format version {}, taken {:?}", snapshot.format_version(), snapshot.record_date());
//!
//! let mut graph = HeapGraph::new(&snapshot, CrawlConfig::default());
//! graph.crawl()?;
//!
//! print!("{}", LeakReport::collect(&graph)?);
//! # Ok::<(), heapscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`lowlevel`] - The container: blocks, chapters, the directory and typed chapter reads
//! - [`snapshot`] - [`SnapshotFile`], capture metadata, type and field descriptions, the managed heap
//! - [`crawler`] - [`HeapGraph`], the managed object graph
//! - [`leak`] - Leaked shell detection, retention paths and reports
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Error Handling
//!
//! Opening a capture fails on anything structural: wrong magic numbers, unsupported directory
//! versions, chapters pointing outside the file. Chapters a capture does not carry are reported
//! as absent, not as errors. Once open, crawling never fails because of a single bad object;
//! unresolvable pointers, corrupt lengths, cycles and the depth limit are recorded in the graph
//! and logged through the [`log`](https://docs.rs/log) facade.

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use heapscope::prelude::*;
///
/// let snapshot = SnapshotFile::from_file("capture.snap")?;
/// let mut graph = HeapGraph::new(&snapshot, CrawlConfig::shallow());
/// graph.crawl()?;
/// # Ok::<(), heapscope::Error>(())
/// ```
pub mod prelude;

/// The chunked, chaptered capture container.
///
/// A capture is a sequence of *chapters* (named data streams such as "type description names"),
/// each stored in a *block* that is itself split into fixed-size chunks scattered through the
/// file. This module locates and validates the directory, reassembles blocks, and decodes
/// chapters as single values, fixed-size arrays or variable-size arrays.
///
/// # Key Components
///
/// - [`lowlevel::ChapterReader`] - Opens the container and reads chapters
/// - [`lowlevel::EntryType`] - Every chapter kind a directory can reference
/// - [`lowlevel::Block`] - Chunked storage
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::{lowlevel::{ChapterReader, EntryType}, File};
///
/// let reader = ChapterReader::new(File::from_file("capture.snap".as_ref())?)?;
/// let names = reader.read_string_array_all(EntryType::TypeDescriptionsName)?;
/// println!("{} types", names.len());
/// # Ok::<(), heapscope::Error>(())
/// ```
pub mod lowlevel;

/// Capture metadata and the managed type system.
///
/// [`SnapshotFile`] is the entry point: it opens the container, validates the format version and
/// exposes the capture's metadata (version, date, capture flags, target and memory statistics,
/// runtime layout constants), the managed heap sections and the type and field descriptions.
pub mod snapshot;

/// Reconstruction of the managed object graph.
///
/// See [`HeapGraph`] for the crawl and [`crawler::ManagedClassInstance`] for its nodes.
pub mod crawler;

/// Leaked managed shell detection and retention paths.
pub mod leak;

/// `heapscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `heapscope` Error type
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::{Error, SnapshotFile};
///
/// match SnapshotFile::from_file("capture.snap") {
///     Ok(snapshot) => println!("Format version {}", snapshot.format_version()),
///     Err(Error::BadMagic { what, .. }) => println!("Not a snapshot capture ({what})"),
///     Err(Error::UnsupportedVersion { what, found, .. }) => println!("Unsupported {what} version {found}"),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;

/// Main entry point for working with captures.
///
/// See [`snapshot::SnapshotFile`] for metadata and type access.
pub use snapshot::SnapshotFile;

/// The managed object graph and its configuration.
pub use crawler::{CrawlConfig, HeapGraph};

/// Provides access to low-level file and memory parsing utilities.
///
/// [`File`] holds the capture bytes (memory-mapped or owned) and [`Parser`] is a cursor over a
/// byte slice used to decode fixed-layout records. [`SnapshotIO`] is implemented by every
/// primitive that can be read from a capture.
///
/// # Example
///
/// ```rust,no_run
/// use heapscope::Parser;
///
/// let bytes = [0xCD, 0xCD, 0xAB, 0xAE];
/// let mut parser = Parser::new(&bytes);
/// assert_eq!(parser.read_le::<u32>()?, 0xAEAB_CDCD);
/// # Ok::<(), heapscope::Error>(())
/// ```
pub use file::{io::SnapshotIO, parser::Parser, File};
