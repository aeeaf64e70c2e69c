//! # heapscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types from the heapscope
//! library. Import this module to get quick access to everything needed to open a capture,
//! crawl its managed heap and report leaks.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all heapscope operations
pub use crate::Error;

/// The result type used throughout heapscope
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// A decoded capture
pub use crate::SnapshotFile;

/// Low-level file parsing utilities
pub use crate::{File, Parser};

// ================================================================================================
// Container
// ================================================================================================

/// Chapter access
pub use crate::lowlevel::{ChapterReader, EntryFormat, EntryType};

// ================================================================================================
// Capture Metadata and Type System
// ================================================================================================

/// Metadata records and flags
pub use crate::snapshot::{
    CaptureFlags, FormatVersion, ProfileTargetInfo, ProfileTargetMemoryStats, TypeFlags,
    VirtualMachineInformation,
};

/// Runtime types recognised by name
pub use crate::snapshot::{WellKnownType, WellKnownTypes};

/// Field layouts
pub use crate::snapshot::FieldInfo;

// ================================================================================================
// Heap Graph
// ================================================================================================

/// The crawl and its configuration
pub use crate::crawler::{CrawlConfig, CrawlDiagnostics, CrawlSummary, HeapGraph};

/// Graph nodes and field values
pub use crate::crawler::{
    CrawlState, FieldValue, InstanceId, LoadedReason, ManagedClassInstance, Target,
};

// ================================================================================================
// Leak Analysis
// ================================================================================================

/// Leak reports
pub use crate::leak::{LeakReport, LeakedShell};
