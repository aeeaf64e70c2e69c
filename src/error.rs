use thiserror::Error;

use crate::lowlevel::EntryType;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors are only ever returned for conditions that make a snapshot (or a requested chapter)
/// impossible to interpret. Problems with individual heap objects - unresolvable type pointers,
/// dangling references, corrupt string lengths - are recorded inside the crawled graph instead
/// and never abort a crawl.
///
/// # Error Categories
///
/// ## Container Errors
/// - [`Error::BadMagic`] - Header, footer or directory magic mismatch
/// - [`Error::UnsupportedVersion`] - Directory or block section version is unknown
/// - [`Error::Malformed`] - Corrupted container structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond file or block boundaries
/// - [`Error::InvalidFormat`] - Chapter header declares an unknown storage format
/// - [`Error::Empty`] - Empty input provided
///
/// ## Chapter Errors
/// - [`Error::ChapterMissing`] - A required chapter is absent from this snapshot
///
/// ## I/O Errors
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// ## Contract Errors
/// - [`Error::Precondition`] - An API was called without the metadata it requires
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::{Error, SnapshotFile};
///
/// match SnapshotFile::from_file("capture.snap") {
///     Ok(snapshot) => println!("version {}", snapshot.format_version()),
///     Err(Error::BadMagic { what, .. }) => eprintln!("not a snapshot: bad {what} magic"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed file: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures, such as a failed memory mapping.
    #[error("{0}")]
    Error(String),

    /// A magic number did not match the container format.
    ///
    /// `what` names the structure whose magic was checked (`header`, `footer`, `directory`).
    #[error("Magic number mismatch in {what} - expected 0x{expected:08X}, found 0x{found:08X}")]
    BadMagic {
        /// Structure whose magic was checked
        what: &'static str,
        /// Expected magic value
        expected: u32,
        /// Magic value read from the file
        found: u32,
    },

    /// A structural version field holds a value this reader does not understand.
    #[error("Unsupported {what} version - expected 0x{expected:08X}, found 0x{found:08X}")]
    UnsupportedVersion {
        /// Structure whose version was checked
        what: &'static str,
        /// Supported version value
        expected: u32,
        /// Version value read from the file
        found: u32,
    },

    /// A chapter the caller requires is not present in this snapshot.
    ///
    /// Optional chapters never produce this error; their accessors return `None` or an
    /// empty collection instead.
    #[error("Chapter {0} is not present in this snapshot")]
    ChapterMissing(EntryType),

    /// A chapter header declares an unknown storage format.
    #[error("Unknown chapter entry format - {0}")]
    InvalidFormat(u16),

    /// An API precondition was violated by the caller.
    #[error("Precondition violated - {0}")]
    Precondition(String),
}
