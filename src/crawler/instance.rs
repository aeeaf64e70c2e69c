//! Materialised nodes of the heap graph.

use std::fmt;

use crate::{crawler::FieldValue, snapshot::TypeFlags};

/// Handle of an instance inside a [`crate::HeapGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub usize);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why the crawl reached an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadedReason {
    /// Target of a GC handle
    GcRoot,
    /// Referenced by the static field with this field index
    StaticField(u32),
    /// Referenced by the instance field with this field index of the parent
    InstanceField(u32),
    /// Element at this index of the parent array
    ArrayElement(u32),
}

/// How far materialisation of an instance's fields got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlState {
    /// All fields were decoded
    Complete,
    /// An ancestor has the same address; no fields were decoded
    CycleStopped,
    /// The instance sits beyond the depth limit; no fields were decoded
    DepthStopped,
}

/// One object (or inline value type) of the managed graph.
///
/// The parent link records the first path that reached the instance and is used for cycle
/// detection and retention paths; it does not own anything.
#[derive(Debug, Clone)]
pub struct ManagedClassInstance {
    pub(crate) address: u64,
    pub(crate) type_index: u32,
    pub(crate) flags: TypeFlags,
    pub(crate) fields: Vec<FieldValue>,
    pub(crate) parent: Option<InstanceId>,
    pub(crate) reason: LoadedReason,
    pub(crate) state: CrawlState,
}

impl ManagedClassInstance {
    pub(crate) fn new(
        address: u64,
        type_index: u32,
        flags: TypeFlags,
        parent: Option<InstanceId>,
        reason: LoadedReason,
    ) -> ManagedClassInstance {
        ManagedClassInstance {
            address,
            type_index,
            flags,
            fields: Vec::new(),
            parent,
            reason,
            state: CrawlState::Complete,
        }
    }

    /// Heap address of the object; 0 for inline value types.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Type index of the instance.
    #[must_use]
    pub fn type_index(&self) -> u32 {
        self.type_index
    }

    /// Flags of the instance's type.
    #[must_use]
    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    /// Decoded fields in layout order, or array elements in index order.
    #[must_use]
    pub fn fields(&self) -> &[FieldValue] {
        &self.fields
    }

    /// The instance that first reached this one.
    #[must_use]
    pub fn parent(&self) -> Option<InstanceId> {
        self.parent
    }

    /// Why this instance was reached.
    #[must_use]
    pub fn reason(&self) -> LoadedReason {
        self.reason
    }

    /// How far field materialisation got.
    #[must_use]
    pub fn state(&self) -> CrawlState {
        self.state
    }

    /// Returns `true` for arrays.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.flags.is_array()
    }

    /// Returns `true` for value types.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.flags.is_value_type()
    }

    /// Returns `true` for value types stored inside another object.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.address == 0
    }
}
