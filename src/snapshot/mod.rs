//! The snapshot facade: capture metadata, type and field descriptions, and the managed heap.
//!
//! [`SnapshotFile`] wraps a [`crate::lowlevel::ChapterReader`] and exposes the managed-side
//! chapters under semantic names. It owns the derived indices the heap crawler relies on
//! (type-info pointer to type index, type index to array position), the well-known type table,
//! and memoising caches for names and field layouts.
//!
//! # Key Components
//!
//! - [`SnapshotFile`] - Opened capture with metadata, type and field accessors
//! - [`HeapAddressResolver`] - Virtual address to heap bytes
//! - [`WellKnownTypes`] - Indices of runtime types with special decoding rules
//! - [`FieldInfo`] - Resolved field layouts, inherited fields first
//!
//! # Examples
//!
//! ```rust,no_run
//! use heapscope::SnapshotFile;
//!
//! let snapshot = SnapshotFile::from_file("capture.snap")?;
//! println!("format {} captured {:?}", snapshot.format_version(), snapshot.record_date());
//! for type_index in 0..snapshot.type_count().min(10) {
//!     println!("{}: {}", type_index, snapshot.type_name(type_index)?);
//! }
//! # Ok::<(), heapscope::Error>(())
//! ```

mod heap;
mod layout;
mod structures;
mod wellknown;

pub use heap::{HeapAddressResolver, ManagedHeapSection, VM_HEAP_TAG};
pub use layout::{FieldInfo, FieldLayoutCache};
pub use structures::{
    ticks_to_datetime, CaptureFlags, FormatVersion, ProfileTargetInfo, ProfileTargetMemoryStats,
    ScriptingBackend, TypeFlags, VirtualMachineInformation, TYPE_FLAGS_RANK_SHIFT,
};
pub use wellknown::{Primitive, WellKnownType, WellKnownTypes};

use std::{borrow::Cow, collections::HashMap, path::Path, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::{
    file::{io::read_le, File},
    lowlevel::{ChapterReader, EntryType},
    Error, Result,
};

/// An opened heap snapshot capture.
///
/// Opening validates the container, decodes the capture metadata, copies the managed heap
/// sections out of the file and builds the type lookup indices. Everything else is read on
/// demand from the immutable backing file; name and field-layout lookups are memoised.
///
/// `SnapshotFile` is `Send + Sync`. The heap crawl itself keeps its mutable state in a separate
/// [`crate::HeapGraph`] borrowing the snapshot.
#[derive(Debug)]
pub struct SnapshotFile {
    reader: ChapterReader,
    version: FormatVersion,
    vm: VirtualMachineInformation,
    capture_flags: CaptureFlags,
    record_date: Option<DateTime<Utc>>,
    heap: HeapAddressResolver,
    well_known: WellKnownTypes,
    type_count: u32,
    field_count: u32,
    types_by_pointer: HashMap<u64, u32>,
    type_positions: HashMap<u32, u32>,
    type_names: DashMap<u32, Arc<str>>,
    field_names: DashMap<u32, Arc<str>>,
    layouts: FieldLayoutCache,
}

impl SnapshotFile {
    /// Memory-maps and opens the capture at `path`.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be mapped, and any error from
    /// [`SnapshotFile::from_reader`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<SnapshotFile> {
        SnapshotFile::from_reader(ChapterReader::new(File::from_file(path.as_ref())?)?)
    }

    /// Opens a capture held in memory.
    ///
    /// # Errors
    /// See [`SnapshotFile::from_reader`].
    pub fn from_mem(data: Vec<u8>) -> Result<SnapshotFile> {
        SnapshotFile::from_reader(ChapterReader::new(File::from_mem(data)?)?)
    }

    /// Builds the facade over an already parsed container.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] if the version or virtual machine chapters are absent,
    /// [`Error::UnsupportedVersion`] for captures older than [`FormatVersion::MIN_SUPPORTED`],
    /// and structural errors from the managed chapters.
    pub fn from_reader(reader: ChapterReader) -> Result<SnapshotFile> {
        let version = FormatVersion(read_le::<u32>(&reader.read_as_struct(EntryType::MetadataVersion)?)?);
        if !version.supports(FormatVersion::MIN_SUPPORTED) {
            return Err(Error::UnsupportedVersion {
                what: "format",
                expected: FormatVersion::MIN_SUPPORTED.0,
                found: version.0,
            });
        }

        let vm = VirtualMachineInformation::read(
            &reader.read_as_struct(EntryType::MetadataVirtualMachineInformation)?,
        )?;

        let capture_flags = if reader.has_chapter(EntryType::MetadataCaptureFlags) {
            CaptureFlags::from_bits_truncate(read_le::<u32>(
                &reader.read_as_struct(EntryType::MetadataCaptureFlags)?,
            )?)
        } else {
            CaptureFlags::empty()
        };

        let record_date = if reader.has_chapter(EntryType::MetadataRecordDate) {
            ticks_to_datetime(read_le::<i64>(&reader.read_as_struct(EntryType::MetadataRecordDate)?)?)
        } else {
            None
        };

        let heap = HeapAddressResolver::load(&reader, version.heap_addresses_encoded())?;

        let well_known = if reader.has_chapter(EntryType::TypeDescriptionsName) {
            WellKnownTypes::from_names(&reader.read_string_array_all(EntryType::TypeDescriptionsName)?)
        } else {
            WellKnownTypes::default()
        };

        let type_count = count_u32(reader.element_count(EntryType::TypeDescriptionsName))?;
        let field_count = count_u32(reader.element_count(EntryType::FieldDescriptionsName))?;

        let mut types_by_pointer = HashMap::new();
        if reader.has_chapter(EntryType::TypeDescriptionsTypeInfoAddress) {
            let pointers = reader.read_fixed_array_all::<u64>(EntryType::TypeDescriptionsTypeInfoAddress)?;
            for (position, pointer) in pointers.into_iter().enumerate() {
                types_by_pointer.entry(pointer).or_insert(position as u32);
            }
        }

        let mut type_positions = HashMap::new();
        if reader.has_chapter(EntryType::TypeDescriptionsTypeIndex) {
            let indices = reader.read_fixed_array_all::<i32>(EntryType::TypeDescriptionsTypeIndex)?;
            for (position, type_index) in indices.into_iter().enumerate() {
                if let Ok(type_index) = u32::try_from(type_index) {
                    type_positions.entry(type_index).or_insert(position as u32);
                }
            }
        }

        log::info!(
            "Opened snapshot format {} with {} types, {} fields, {} heap sections",
            version,
            type_count,
            field_count,
            heap.sections().len()
        );

        Ok(SnapshotFile {
            reader,
            version,
            vm,
            capture_flags,
            record_date,
            heap,
            well_known,
            type_count,
            field_count,
            types_by_pointer,
            type_positions,
            type_names: DashMap::new(),
            field_names: DashMap::new(),
            layouts: FieldLayoutCache::default(),
        })
    }

    /// The underlying chapter reader.
    #[must_use]
    pub fn reader(&self) -> &ChapterReader {
        &self.reader
    }

    /// Capture format revision.
    #[must_use]
    pub fn format_version(&self) -> FormatVersion {
        self.version
    }

    /// Object geometry of the captured runtime.
    #[must_use]
    pub fn vm_info(&self) -> &VirtualMachineInformation {
        &self.vm
    }

    /// Data categories present in the capture.
    #[must_use]
    pub fn capture_flags(&self) -> CaptureFlags {
        self.capture_flags
    }

    /// When the capture was taken, if recorded.
    #[must_use]
    pub fn record_date(&self) -> Option<DateTime<Utc>> {
        self.record_date
    }

    /// Free-form metadata attached by the capturing tool.
    ///
    /// # Errors
    /// Returns a structural error if the chapter is present but unreadable.
    pub fn user_metadata(&self) -> Result<Option<Vec<u8>>> {
        if !self.reader.has_chapter(EntryType::MetadataUserMetadata) {
            return Ok(None);
        }
        Ok(Some(self.reader.read_chapter_body(EntryType::MetadataUserMetadata, 0, 1)?.into_owned()))
    }

    /// Description of the captured device, available from format 11.
    ///
    /// # Errors
    /// Returns a structural error if the chapter is present but unreadable.
    pub fn profile_target_info(&self) -> Result<Option<ProfileTargetInfo>> {
        if !self.reader.has_chapter(EntryType::ProfileTargetInfo) {
            return Ok(None);
        }
        ProfileTargetInfo::read(&self.reader.read_as_struct(EntryType::ProfileTargetInfo)?).map(Some)
    }

    /// Memory summary of the captured device, available from format 11.
    ///
    /// # Errors
    /// Returns a structural error if the chapter is present but unreadable.
    pub fn profile_target_memory_stats(&self) -> Result<Option<ProfileTargetMemoryStats>> {
        if !self.reader.has_chapter(EntryType::ProfileTargetMemoryStats) {
            return Ok(None);
        }
        ProfileTargetMemoryStats::read(&self.reader.read_as_struct(EntryType::ProfileTargetMemoryStats)?)
            .map(Some)
    }

    /// Target addresses of every GC handle, the roots of the managed graph.
    ///
    /// # Errors
    /// Returns a structural error if the chapter is present but unreadable.
    pub fn gc_handles(&self) -> Result<Vec<u64>> {
        if !self.reader.has_chapter(EntryType::GcHandlesTarget) {
            return Ok(Vec::new());
        }
        self.reader.read_fixed_array_all(EntryType::GcHandlesTarget)
    }

    /// The managed heap.
    #[must_use]
    pub fn heap(&self) -> &HeapAddressResolver {
        &self.heap
    }

    /// Indices of the well-known runtime types.
    #[must_use]
    pub fn well_known(&self) -> &WellKnownTypes {
        &self.well_known
    }

    /// Number of type descriptions.
    #[must_use]
    pub fn type_count(&self) -> u32 {
        self.type_count
    }

    /// Number of field descriptions.
    #[must_use]
    pub fn field_count(&self) -> u32 {
        self.field_count
    }

    /// Type index whose type-info address is `pointer`.
    #[must_use]
    pub fn type_index_for_pointer(&self, pointer: u64) -> Option<u32> {
        self.types_by_pointer.get(&pointer).copied()
    }

    /// Array position of the type description carrying `type_index`.
    ///
    /// Captures without a type index chapter use positions as indices.
    #[must_use]
    pub fn type_position(&self, type_index: u32) -> Option<u32> {
        if self.type_positions.is_empty() {
            return (type_index < self.type_count).then_some(type_index);
        }
        self.type_positions.get(&type_index).copied()
    }

    /// Reads a runtime pointer from the start of `bytes`.
    ///
    /// Returns `None` if `bytes` is shorter than a pointer.
    #[must_use]
    pub fn read_pointer(&self, bytes: &[u8]) -> Option<u64> {
        match self.vm.pointer_size {
            4 => read_le::<u32>(bytes).ok().map(u64::from),
            _ => read_le::<u64>(bytes).ok(),
        }
    }

    /// Fully qualified name of a type.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] or an out-of-range error for unknown indices.
    pub fn type_name(&self, type_index: u32) -> Result<Arc<str>> {
        cached_string(&self.type_names, type_index, || {
            self.reader.read_string(EntryType::TypeDescriptionsName, u64::from(type_index))
        })
    }

    /// Name of the assembly declaring a type.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] or an out-of-range error for unknown indices.
    pub fn type_assembly(&self, type_index: u32) -> Result<String> {
        self.reader.read_string(EntryType::TypeDescriptionsAssembly, u64::from(type_index))
    }

    /// Declared size of a type's instances.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] or an out-of-range error for unknown indices.
    pub fn type_size(&self, type_index: u32) -> Result<i32> {
        self.reader.read_fixed_element(EntryType::TypeDescriptionsSize, u64::from(type_index))
    }

    /// Runtime flags of a type.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] or an out-of-range error for unknown indices.
    pub fn type_flags(&self, type_index: u32) -> Result<TypeFlags> {
        self.reader
            .read_fixed_element::<u32>(EntryType::TypeDescriptionsFlags, u64::from(type_index))
            .map(TypeFlags::from_raw)
    }

    /// Base type of a class, or element type of an array; `None` for roots.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] or an out-of-range error for unknown indices.
    pub fn base_or_element_type(&self, type_index: u32) -> Result<Option<u32>> {
        self.reader
            .read_fixed_element::<i32>(EntryType::TypeDescriptionsBaseOrElementTypeIndex, u64::from(type_index))
            .map(|index| u32::try_from(index).ok())
    }

    /// Address of a type's runtime type-info structure.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] or an out-of-range error for unknown indices.
    pub fn type_info_address(&self, type_index: u32) -> Result<u64> {
        self.reader
            .read_fixed_element(EntryType::TypeDescriptionsTypeInfoAddress, u64::from(type_index))
    }

    /// Indices of the fields declared directly on a type.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] or an out-of-range error for unknown indices.
    pub fn type_field_indices(&self, type_index: u32) -> Result<Vec<u32>> {
        Ok(self
            .reader
            .read_element_values::<i32>(EntryType::TypeDescriptionsFieldIndices, u64::from(type_index))?
            .into_iter()
            .filter_map(|index| u32::try_from(index).ok())
            .collect())
    }

    /// Storage of a type's static fields; empty for types without statics.
    ///
    /// # Errors
    /// Returns an out-of-range error for unknown indices.
    pub fn static_field_bytes(&self, type_index: u32) -> Result<Cow<'_, [u8]>> {
        if !self.reader.has_chapter(EntryType::TypeDescriptionsStaticFieldBytes) {
            return Ok(Cow::Borrowed(&[]));
        }
        self.reader
            .read_single_element_from_array(EntryType::TypeDescriptionsStaticFieldBytes, u64::from(type_index))
    }

    /// Name of a field.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] or an out-of-range error for unknown indices.
    pub fn field_name(&self, field_index: u32) -> Result<Arc<str>> {
        cached_string(&self.field_names, field_index, || {
            self.reader.read_string(EntryType::FieldDescriptionsName, u64::from(field_index))
        })
    }

    /// Byte offset of a field within its declaring type's boxed layout.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] or an out-of-range error for unknown indices.
    pub fn field_offset(&self, field_index: u32) -> Result<i32> {
        self.reader.read_fixed_element(EntryType::FieldDescriptionsOffset, u64::from(field_index))
    }

    /// Type index of a field's declared type.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] for negative type indices, otherwise as
    /// [`SnapshotFile::field_offset`].
    pub fn field_type(&self, field_index: u32) -> Result<u32> {
        let raw = self
            .reader
            .read_fixed_element::<i32>(EntryType::FieldDescriptionsTypeIndex, u64::from(field_index))?;
        u32::try_from(raw).map_err(|_| malformed_error!("Field {} has type index {}", field_index, raw))
    }

    /// Returns `true` for static fields.
    ///
    /// # Errors
    /// Returns [`Error::ChapterMissing`] or an out-of-range error for unknown indices.
    pub fn field_is_static(&self, field_index: u32) -> Result<bool> {
        self.reader
            .read_fixed_element::<u8>(EntryType::FieldDescriptionsIsStatic, u64::from(field_index))
            .map(|value| value != 0)
    }

    /// Instance field layout of a type, base type fields first.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the base type chain is cyclic, or any metadata read error.
    pub fn instance_fields(&self, type_index: u32) -> Result<Arc<[FieldInfo]>> {
        self.layouts.get_or_build(type_index, false, || {
            let mut fields = Vec::new();
            for declaring in self.base_chain(type_index)?.into_iter().rev() {
                fields.extend(self.declared_fields(declaring, false)?);
            }
            Ok(fields)
        })
    }

    /// Static fields declared directly on a type.
    ///
    /// # Errors
    /// Returns any metadata read error.
    pub fn static_fields(&self, type_index: u32) -> Result<Arc<[FieldInfo]>> {
        self.layouts
            .get_or_build(type_index, true, || self.declared_fields(type_index, true))
    }

    /// `type_index` followed by its base types, most derived first.
    fn base_chain(&self, type_index: u32) -> Result<Vec<u32>> {
        let mut chain = vec![type_index];
        let mut current = type_index;
        while let Some(base) = self.base_or_element_type(current)? {
            if chain.len() > self.type_count as usize {
                return Err(malformed_error!("Base type chain of type {} is cyclic", type_index));
            }
            chain.push(base);
            current = base;
        }
        Ok(chain)
    }

    fn declared_fields(&self, type_index: u32, want_static: bool) -> Result<Vec<FieldInfo>> {
        let mut fields = Vec::new();
        for field_index in self.type_field_indices(type_index)? {
            if self.field_is_static(field_index)? != want_static {
                continue;
            }

            let field_type = self.field_type(field_index)?;
            fields.push(FieldInfo {
                field_index,
                type_index: field_type,
                flags: self.type_flags(field_type)?,
                type_size: self.type_size(field_type)?,
                offset: self.field_offset(field_index)?,
            });
        }
        Ok(fields)
    }

    /// Returns `true` if `base` appears in the base type chain of `type_index`.
    ///
    /// A type does not inherit from itself. Arrays never inherit, since their chain link names
    /// the element type.
    #[must_use]
    pub fn inherits_from(&self, type_index: u32, base: u32) -> bool {
        if self.type_flags(type_index).is_ok_and(TypeFlags::is_array) {
            return false;
        }

        let mut current = type_index;
        for _ in 0..=self.type_count {
            match self.base_or_element_type(current) {
                Ok(Some(parent)) if parent == base => return true,
                Ok(Some(parent)) => current = parent,
                _ => return false,
            }
        }
        false
    }

    /// Returns `true` if the type derives from `System.Enum`.
    #[must_use]
    pub fn is_enum(&self, type_index: u32) -> bool {
        match self.well_known.enum_base() {
            Some(enum_base) => matches!(self.base_or_element_type(type_index), Ok(Some(base)) if base == enum_base),
            None => false,
        }
    }
}

fn cached_string<F>(cache: &DashMap<u32, Arc<str>>, index: u32, read: F) -> Result<Arc<str>>
where
    F: FnOnce() -> Result<String>,
{
    if let Some(name) = cache.get(&index) {
        return Ok(Arc::clone(name.value()));
    }

    let name: Arc<str> = read()?.into();
    cache.insert(index, Arc::clone(&name));
    Ok(name)
}

fn count_u32(count: u64) -> Result<u32> {
    u32::try_from(count).map_err(|_| malformed_error!("Element count {} is too large", count))
}
