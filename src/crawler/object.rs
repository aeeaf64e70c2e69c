//! Raw object parsing and sizing.
//!
//! An object on the managed heap starts with a pointer-sized type-info word followed by the
//! rest of its header and its payload. Its length is not stored anywhere: it is derived from
//! the type's flags (arrays and strings are variable-length) and, for arrays, from a length
//! word or an out-of-line bounds block.

use widestring::{U16CStr, U16Str};

use crate::{
    file::io::read_le,
    snapshot::{SnapshotFile, TypeFlags, WellKnownType},
    Result,
};

/// A heap object whose type has been resolved, with a copy of its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManagedObjectInfo {
    /// Address of the object
    pub address: u64,
    /// Address of the type-info structure that resolved its type
    pub type_info_address: u64,
    /// Resolved type index
    pub type_index: u32,
    /// Flags of the resolved type
    pub flags: TypeFlags,
    /// Object bytes, header included, clamped to the captured heap
    pub data: Vec<u8>,
}

impl RawManagedObjectInfo {
    /// Size of the object in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Decodes the payload of a string object.
    ///
    /// Reads at most the prefixed number of UTF-16 units and stops early at the first NUL unit.
    /// Returns `None` if the object is too short to hold the length prefix.
    #[must_use]
    pub fn string_value(&self, object_header_size: usize) -> Option<String> {
        let length = read_le::<i32>(self.data.get(object_header_size..)?).ok()?;
        let payload = self.data.get(object_header_size + 4..)?;

        let units: Vec<u16> = payload
            .chunks_exact(2)
            .take(usize::try_from(length).unwrap_or(0))
            .map(|unit| u16::from_le_bytes([unit[0], unit[1]]))
            .collect();

        let text = match U16CStr::from_slice_truncate(&units) {
            Ok(terminated) => terminated.to_string_lossy(),
            Err(_) => U16Str::from_slice(&units).to_string_lossy(),
        };
        Some(text)
    }
}

/// Resolves the object at `address`.
///
/// The first word of an object is normally the address of its type-info structure; some runtimes
/// store a pointer to that pointer instead, so a failed lookup is retried once through the heap.
/// Returns `Ok(None)` for addresses outside the heap, unresolvable types and corrupt sizes.
///
/// # Errors
/// Returns structural errors from the type description chapters.
pub fn parse_object(snapshot: &SnapshotFile, address: u64) -> Result<Option<RawManagedObjectInfo>> {
    let Some(heap) = snapshot.heap().resolve(address) else {
        return Ok(None);
    };
    let Some(mut type_info_address) = snapshot.read_pointer(heap) else {
        return Ok(None);
    };

    let type_index = match snapshot.type_index_for_pointer(type_info_address) {
        Some(type_index) => type_index,
        None => {
            let indirect = snapshot
                .heap()
                .resolve(type_info_address)
                .and_then(|bytes| snapshot.read_pointer(bytes));
            match indirect.and_then(|pointer| {
                snapshot
                    .type_index_for_pointer(pointer)
                    .map(|type_index| (pointer, type_index))
            }) {
                Some((pointer, type_index)) => {
                    type_info_address = pointer;
                    type_index
                }
                None => {
                    log::warn!("Failed to resolve type for object at 0x{:X}", address);
                    return Ok(None);
                }
            }
        }
    };

    let flags = snapshot.type_flags(type_index)?;
    let size = object_size(snapshot, type_index, flags, heap)?.min(heap.len());
    if size == 0 {
        log::warn!(
            "Object at 0x{:X} of type {} has no usable size",
            address,
            type_index
        );
        return Ok(None);
    }

    Ok(Some(RawManagedObjectInfo {
        address,
        type_info_address,
        type_index,
        flags,
        data: heap[..size].to_vec(),
    }))
}

/// Byte size of an object of the given type whose bytes start at `heap`.
///
/// Returns 0 for strings with a corrupt length.
///
/// # Errors
/// Returns structural errors from the type description chapters.
pub fn object_size(snapshot: &SnapshotFile, type_index: u32, flags: TypeFlags, heap: &[u8]) -> Result<usize> {
    if flags.is_array() {
        return array_size(snapshot, type_index, flags, heap);
    }

    if snapshot.well_known().is(WellKnownType::String, type_index) {
        return Ok(string_size(snapshot, heap));
    }

    Ok(usize::try_from(snapshot.type_size(type_index)?).unwrap_or(0))
}

fn string_size(snapshot: &SnapshotFile, heap: &[u8]) -> usize {
    let header = snapshot.vm_info().object_header_bytes();
    let Some(length) = heap.get(header..).and_then(|rest| read_le::<i32>(rest).ok()) else {
        return 0;
    };

    let remaining = heap.len() - header;
    match usize::try_from(length) {
        Ok(units) if units.saturating_mul(2) <= remaining => header + 4 + units * 2 + 2,
        _ => {
            log::warn!("String length is invalid: {}", length);
            0
        }
    }
}

fn array_size(snapshot: &SnapshotFile, type_index: u32, flags: TypeFlags, heap: &[u8]) -> Result<usize> {
    let length = array_length(snapshot, flags, heap);
    let element = element_type(snapshot, type_index)?;

    let total = element
        .size
        .saturating_mul(length)
        .saturating_add(snapshot.vm_info().array_header_bytes());
    if total > heap.len() {
        log::warn!(
            "Reducing array of {} elements from {} to {} bytes because the heap doesn't contain all the data",
            length,
            total,
            heap.len()
        );
        return Ok(heap.len());
    }

    Ok(total)
}

/// Number of elements of the array whose bytes start at `bytes`.
///
/// Arrays without a bounds block store their length in the header; multi-dimensional arrays
/// point at a bounds block holding one 32-bit extent per dimension at an 8-byte stride.
/// Unreadable or negative lengths count as 0.
#[must_use]
pub fn array_length(snapshot: &SnapshotFile, flags: TypeFlags, bytes: &[u8]) -> usize {
    let vm = snapshot.vm_info();
    let Some(bounds) = bytes
        .get(vm.array_bounds_offset_in_header as usize..)
        .and_then(|rest| snapshot.read_pointer(rest))
    else {
        return 0;
    };

    if bounds == 0 {
        return bytes
            .get(vm.array_size_offset_in_header as usize..)
            .and_then(|rest| read_le::<i32>(rest).ok())
            .and_then(|length| usize::try_from(length).ok())
            .unwrap_or(0);
    }

    let Some(bounds_block) = snapshot.heap().resolve(bounds) else {
        return 0;
    };

    let mut length = 1usize;
    for dimension in 0..flags.rank() as usize {
        let extent = bounds_block
            .get(dimension * 8..)
            .and_then(|rest| read_le::<i32>(rest).ok())
            .and_then(|extent| usize::try_from(extent).ok());
        match extent {
            Some(extent) => length = length.saturating_mul(extent),
            None => return 0,
        }
    }
    length
}

/// Element type of an array type, resolved to a type description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementType {
    /// Type index of the elements
    pub type_index: u32,
    /// Flags of the element type
    pub flags: TypeFlags,
    /// Bytes per element: the declared size for value types, a pointer otherwise
    pub size: usize,
}

/// Resolves the element type of an array type.
///
/// # Errors
/// Returns structural errors from the type description chapters.
pub fn element_type(snapshot: &SnapshotFile, array_type: u32) -> Result<ElementType> {
    let declared = snapshot.base_or_element_type(array_type)?.unwrap_or(array_type);
    let type_index = snapshot.type_position(declared).unwrap_or(declared);
    let flags = snapshot.type_flags(type_index)?;

    let pointer_size = snapshot.vm_info().pointer_bytes();
    let size = if flags.is_value_type() {
        match usize::try_from(snapshot.type_size(type_index)?) {
            Ok(size) if size > 0 => size,
            _ => pointer_size,
        }
    } else {
        pointer_size
    };

    Ok(ElementType {
        type_index,
        flags,
        size,
    })
}
