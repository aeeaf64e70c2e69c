//! Builders for byte-exact synthetic captures.
//!
//! [`ContainerBuilder`] lays out the raw container: chapters, chunked blocks (optionally with
//! scattered chunk placement), the block section, the directory and the footer.
//! [`SnapshotBuilder`] sits on top and produces the managed-side chapters from a small type,
//! field and heap model, so crawler tests can describe object graphs instead of bytes.

use strum::EnumCount;

use crate::lowlevel::{
    EntryType, DIRECTORY_MAGIC, FOOTER_MAGIC, HEADER_MAGIC, SUPPORTED_BLOCK_SECTION_VERSION,
    SUPPORTED_DIRECTORY_VERSION,
};

/// Payload of one chapter, in one of the three storage formats.
#[derive(Debug, Clone)]
pub enum ChapterData {
    Single(Vec<u8>),
    Fixed { element_size: u32, data: Vec<u8> },
    Dynamic(Vec<Vec<u8>>),
}

impl ChapterData {
    pub fn fixed_i32(values: &[i32]) -> ChapterData {
        ChapterData::Fixed {
            element_size: 4,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    pub fn fixed_u32(values: &[u32]) -> ChapterData {
        ChapterData::Fixed {
            element_size: 4,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    pub fn fixed_u64(values: &[u64]) -> ChapterData {
        ChapterData::Fixed {
            element_size: 8,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    pub fn fixed_u8(values: &[u8]) -> ChapterData {
        ChapterData::Fixed {
            element_size: 1,
            data: values.to_vec(),
        }
    }

    pub fn strings<S: AsRef<str>>(values: &[S]) -> ChapterData {
        ChapterData::Dynamic(values.iter().map(|s| s.as_ref().as_bytes().to_vec()).collect())
    }
}

/// Writes the container around a set of chapters, one block per chapter.
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    chunk_size: u64,
    scatter: bool,
    directory_version: u32,
    extra_entries: usize,
    chapters: Vec<(EntryType, ChapterData)>,
}

/// Filler preceding single-element payloads, so their block offset is never 0.
const SINGLE_ELEMENT_PREFIX: usize = 8;

impl ContainerBuilder {
    pub fn new(chunk_size: u64) -> ContainerBuilder {
        ContainerBuilder {
            chunk_size,
            scatter: false,
            directory_version: SUPPORTED_DIRECTORY_VERSION,
            extra_entries: 0,
            chapters: Vec::new(),
        }
    }

    /// Writes chunks in reverse order with gaps, so no two chunks are contiguous.
    pub fn scatter(&mut self, scatter: bool) -> &mut Self {
        self.scatter = scatter;
        self
    }

    pub fn directory_version(&mut self, version: u32) -> &mut Self {
        self.directory_version = version;
        self
    }

    /// Declares more directory entries than there are chapter kinds.
    pub fn extra_entries(&mut self, count: usize) -> &mut Self {
        self.extra_entries = count;
        self
    }

    pub fn chapter(&mut self, entry: EntryType, data: ChapterData) -> &mut Self {
        self.chapters.push((entry, data));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = HEADER_MAGIC.to_le_bytes().to_vec();
        let mut blocks: Vec<(u64, Vec<u64>)> = Vec::new();
        let mut entry_offsets = vec![0u64; EntryType::COUNT + self.extra_entries];

        for (block_index, (entry, data)) in self.chapters.iter().enumerate() {
            let (payload, format, entries_meta, header_meta, end_offsets) = match data {
                ChapterData::Single(bytes) => {
                    let mut payload = vec![0xEE; SINGLE_ELEMENT_PREFIX];
                    payload.extend_from_slice(bytes);
                    (payload, 1u16, bytes.len() as u32, SINGLE_ELEMENT_PREFIX as u64, Vec::new())
                }
                ChapterData::Fixed { element_size, data } => (
                    data.clone(),
                    2u16,
                    *element_size,
                    (data.len() / *element_size as usize) as u64,
                    Vec::new(),
                ),
                ChapterData::Dynamic(elements) => {
                    let mut payload = Vec::new();
                    let mut ends = Vec::new();
                    for element in elements {
                        payload.extend_from_slice(element);
                        ends.push(payload.len() as u64);
                    }
                    let total = payload.len() as u64;
                    (payload, 3u16, elements.len() as u32, total, ends)
                }
            };

            let chunks: Vec<&[u8]> = payload.chunks(self.chunk_size as usize).collect();
            let mut chunk_offsets = vec![0u64; chunks.len()];
            let order: Vec<usize> = if self.scatter {
                (0..chunks.len()).rev().collect()
            } else {
                (0..chunks.len()).collect()
            };
            for index in order {
                chunk_offsets[index] = out.len() as u64;
                out.extend_from_slice(chunks[index]);
                if self.scatter {
                    out.push(0xCC);
                }
            }
            blocks.push((payload.len() as u64, chunk_offsets));

            entry_offsets[*entry as usize] = out.len() as u64;
            out.extend_from_slice(&format.to_le_bytes());
            out.extend_from_slice(&(block_index as u32).to_le_bytes());
            out.extend_from_slice(&entries_meta.to_le_bytes());
            out.extend_from_slice(&header_meta.to_le_bytes());
            for end in end_offsets {
                out.extend_from_slice(&end.to_le_bytes());
            }
        }

        let mut block_offsets = Vec::new();
        for (total, chunk_offsets) in &blocks {
            block_offsets.push(out.len() as u64);
            out.extend_from_slice(&self.chunk_size.to_le_bytes());
            out.extend_from_slice(&total.to_le_bytes());
            for offset in chunk_offsets {
                out.extend_from_slice(&offset.to_le_bytes());
            }
        }

        let blocks_offset = out.len() as u64;
        out.extend_from_slice(&SUPPORTED_BLOCK_SECTION_VERSION.to_le_bytes());
        out.extend_from_slice(&(block_offsets.len() as i32).to_le_bytes());
        for offset in block_offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }

        let directory_offset = out.len() as u64;
        out.extend_from_slice(&DIRECTORY_MAGIC.to_le_bytes());
        out.extend_from_slice(&self.directory_version.to_le_bytes());
        out.extend_from_slice(&blocks_offset.to_le_bytes());
        out.extend_from_slice(&(entry_offsets.len() as i32).to_le_bytes());
        for offset in entry_offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }

        out.extend_from_slice(&directory_offset.to_le_bytes());
        out.extend_from_slice(&FOOTER_MAGIC.to_le_bytes());
        out
    }
}

/// A type description of a synthetic capture.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub base: Option<u32>,
    pub size: i32,
    pub flags: u32,
}

impl TypeDef {
    pub fn class(name: &str, base: Option<u32>, size: i32) -> TypeDef {
        TypeDef {
            name: name.to_string(),
            base,
            size,
            flags: 0,
        }
    }

    pub fn value(name: &str, base: Option<u32>, size: i32) -> TypeDef {
        TypeDef {
            flags: 1,
            ..TypeDef::class(name, base, size)
        }
    }

    pub fn array(name: &str, element: u32, rank: u32) -> TypeDef {
        TypeDef {
            name: name.to_string(),
            base: Some(element),
            size: 0,
            flags: 2 | (rank << 16),
        }
    }
}

#[derive(Debug, Clone)]
struct FieldDef {
    name: String,
    type_index: u32,
    offset: i32,
    is_static: bool,
}

/// A contiguous heap section under construction.
#[derive(Debug, Clone)]
pub struct HeapImage {
    base: u64,
    bytes: Vec<u8>,
}

impl HeapImage {
    pub fn new(base: u64) -> HeapImage {
        HeapImage {
            base,
            bytes: Vec::new(),
        }
    }

    /// Appends `bytes` at the next 8-byte aligned address and returns that address.
    pub fn alloc(&mut self, bytes: &[u8]) -> u64 {
        let address = self.reserve(bytes.len());
        self.write(address, bytes);
        address
    }

    /// Reserves `len` zeroed bytes at the next 8-byte aligned address.
    pub fn reserve(&mut self, len: usize) -> u64 {
        let aligned = self.bytes.len().next_multiple_of(8);
        self.bytes.resize(aligned + len, 0);
        self.base + aligned as u64
    }

    /// Overwrites previously allocated bytes at `address`.
    pub fn write(&mut self, address: u64, bytes: &[u8]) {
        let offset = (address - self.base) as usize;
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

/// Type-info structures live far away from any heap image.
const TYPE_INFO_BASE: u64 = 0x7F10_0000_0000;

/// Produces complete synthetic captures from a type, field and heap model.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    version: u32,
    vm: [i32; 6],
    chunk_size: u64,
    scatter: bool,
    types: Vec<TypeDef>,
    type_fields: Vec<Vec<u32>>,
    static_bytes: Vec<Vec<u8>>,
    fields: Vec<FieldDef>,
    heaps: Vec<HeapImage>,
    gc_handles: Vec<u64>,
    extra: Vec<(EntryType, ChapterData)>,
}

impl SnapshotBuilder {
    /// 64-bit runtime with 16-byte object headers and 32-byte array headers.
    pub fn new() -> SnapshotBuilder {
        SnapshotBuilder {
            version: 16,
            vm: [8, 16, 32, 16, 24, 8],
            chunk_size: 64,
            scatter: true,
            types: Vec::new(),
            type_fields: Vec::new(),
            static_bytes: Vec::new(),
            fields: Vec::new(),
            heaps: Vec::new(),
            gc_handles: Vec::new(),
            extra: Vec::new(),
        }
    }

    pub fn format_version(&mut self, version: u32) -> &mut Self {
        self.version = version;
        self
    }

    /// Switches to a runtime with `size`-byte pointers and matching header geometry.
    pub fn pointer_size(&mut self, size: i32) -> &mut Self {
        self.vm = [size, size * 2, size * 4, size * 2, size * 3, 8];
        self
    }

    pub fn add_type(&mut self, def: TypeDef) -> u32 {
        self.types.push(def);
        self.type_fields.push(Vec::new());
        self.static_bytes.push(Vec::new());
        (self.types.len() - 1) as u32
    }

    pub fn add_field(&mut self, owner: u32, name: &str, type_index: u32, offset: i32, is_static: bool) -> u32 {
        let index = self.fields.len() as u32;
        self.fields.push(FieldDef {
            name: name.to_string(),
            type_index,
            offset,
            is_static,
        });
        self.type_fields[owner as usize].push(index);
        index
    }

    pub fn set_static_bytes(&mut self, owner: u32, bytes: Vec<u8>) {
        self.static_bytes[owner as usize] = bytes;
    }

    pub fn add_heap(&mut self, heap: HeapImage) {
        self.heaps.push(heap);
    }

    pub fn add_gc_handle(&mut self, address: u64) {
        self.gc_handles.push(address);
    }

    pub fn chapter(&mut self, entry: EntryType, data: ChapterData) {
        self.extra.push((entry, data));
    }

    pub fn type_pointer(&self, type_index: u32) -> u64 {
        TYPE_INFO_BASE + u64::from(type_index) * 0x40
    }

    fn pointer_bytes(&self, value: u64) -> Vec<u8> {
        if self.vm[0] == 4 {
            (value as u32).to_le_bytes().to_vec()
        } else {
            value.to_le_bytes().to_vec()
        }
    }

    /// Object header of the given type: the type-info pointer followed by zeroes.
    pub fn object_header(&self, type_index: u32) -> Vec<u8> {
        let mut header = self.pointer_bytes(self.type_pointer(type_index));
        header.resize(self.vm[1] as usize, 0);
        header
    }

    /// Bytes of a boxed object: header, then `payload` at the first field offset.
    pub fn object(&self, type_index: u32, payload: &[u8]) -> Vec<u8> {
        let mut bytes = self.object_header(type_index);
        bytes.extend_from_slice(payload);
        bytes
    }

    /// Bytes of an array object with the given bounds pointer, inline length and element bytes.
    pub fn array_object(&self, type_index: u32, bounds: u64, length: i32, elements: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; self.vm[2] as usize];
        let pointer = self.pointer_bytes(self.type_pointer(type_index));
        bytes[..pointer.len()].copy_from_slice(&pointer);

        let bounds_offset = self.vm[3] as usize;
        let bounds = self.pointer_bytes(bounds);
        bytes[bounds_offset..bounds_offset + bounds.len()].copy_from_slice(&bounds);

        let size_offset = self.vm[4] as usize;
        bytes[size_offset..size_offset + 4].copy_from_slice(&length.to_le_bytes());

        bytes.extend_from_slice(elements);
        bytes
    }

    /// Bytes of a string object.
    pub fn string_object(&self, string_type: u32, text: &str) -> Vec<u8> {
        let units: Vec<u16> = text.encode_utf16().collect();
        let mut bytes = self.object_header(string_type);
        bytes.extend_from_slice(&(units.len() as i32).to_le_bytes());
        for unit in units {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes.extend_from_slice(&[0, 0]);
        bytes
    }

    pub fn build(&self) -> Vec<u8> {
        let mut container = ContainerBuilder::new(self.chunk_size);
        container.scatter(self.scatter);

        // 2023-06-01T00:00:00Z in .NET ticks
        let ticks: i64 = 638_211_744_000_000_000;
        let vm: Vec<u8> = self.vm.iter().flat_map(|v| v.to_le_bytes()).collect();

        container
            .chapter(EntryType::MetadataVersion, ChapterData::Single(self.version.to_le_bytes().to_vec()))
            .chapter(EntryType::MetadataRecordDate, ChapterData::Single(ticks.to_le_bytes().to_vec()))
            .chapter(EntryType::MetadataCaptureFlags, ChapterData::Single(3u32.to_le_bytes().to_vec()))
            .chapter(EntryType::MetadataVirtualMachineInformation, ChapterData::Single(vm));

        if !self.types.is_empty() {
            let names: Vec<&str> = self.types.iter().map(|t| t.name.as_str()).collect();
            let assemblies = vec!["Assembly-CSharp.dll"; self.types.len()];
            let flags: Vec<u32> = self.types.iter().map(|t| t.flags).collect();
            let sizes: Vec<i32> = self.types.iter().map(|t| t.size).collect();
            let bases: Vec<i32> = self
                .types
                .iter()
                .map(|t| t.base.map_or(-1, |b| b as i32))
                .collect();
            let pointers: Vec<u64> = (0..self.types.len() as u32).map(|i| self.type_pointer(i)).collect();
            let indices: Vec<i32> = (0..self.types.len() as i32).collect();
            let field_indices = self
                .type_fields
                .iter()
                .map(|fields| fields.iter().flat_map(|f| (*f as i32).to_le_bytes()).collect())
                .collect();

            container
                .chapter(EntryType::TypeDescriptionsName, ChapterData::strings(&names))
                .chapter(EntryType::TypeDescriptionsAssembly, ChapterData::strings(&assemblies))
                .chapter(EntryType::TypeDescriptionsFlags, ChapterData::fixed_u32(&flags))
                .chapter(EntryType::TypeDescriptionsSize, ChapterData::fixed_i32(&sizes))
                .chapter(EntryType::TypeDescriptionsBaseOrElementTypeIndex, ChapterData::fixed_i32(&bases))
                .chapter(EntryType::TypeDescriptionsTypeInfoAddress, ChapterData::fixed_u64(&pointers))
                .chapter(EntryType::TypeDescriptionsTypeIndex, ChapterData::fixed_i32(&indices))
                .chapter(EntryType::TypeDescriptionsFieldIndices, ChapterData::Dynamic(field_indices))
                .chapter(
                    EntryType::TypeDescriptionsStaticFieldBytes,
                    ChapterData::Dynamic(self.static_bytes.clone()),
                );
        }

        if !self.fields.is_empty() {
            let names: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
            let offsets: Vec<i32> = self.fields.iter().map(|f| f.offset).collect();
            let types: Vec<i32> = self.fields.iter().map(|f| f.type_index as i32).collect();
            let statics: Vec<u8> = self.fields.iter().map(|f| u8::from(f.is_static)).collect();

            container
                .chapter(EntryType::FieldDescriptionsName, ChapterData::strings(&names))
                .chapter(EntryType::FieldDescriptionsOffset, ChapterData::fixed_i32(&offsets))
                .chapter(EntryType::FieldDescriptionsTypeIndex, ChapterData::fixed_i32(&types))
                .chapter(EntryType::FieldDescriptionsIsStatic, ChapterData::fixed_u8(&statics));
        }

        if !self.heaps.is_empty() {
            let starts: Vec<u64> = self.heaps.iter().map(|h| h.base).collect();
            let bytes = self.heaps.iter().map(|h| h.bytes.clone()).collect();
            container
                .chapter(EntryType::ManagedHeapSectionsStartAddress, ChapterData::fixed_u64(&starts))
                .chapter(EntryType::ManagedHeapSectionsBytes, ChapterData::Dynamic(bytes));
        }

        if !self.gc_handles.is_empty() {
            container.chapter(EntryType::GcHandlesTarget, ChapterData::fixed_u64(&self.gc_handles));
        }

        for (entry, data) in &self.extra {
            container.chapter(*entry, data.clone());
        }

        container.build()
    }
}

/// Type indices of [`standard_types`].
#[derive(Debug, Clone, Copy)]
pub struct StandardTypes {
    pub object: u32,
    pub value_type: u32,
    pub enum_base: u32,
    pub int32: u32,
    pub int64: u32,
    pub byte: u32,
    pub double: u32,
    pub string: u32,
    pub unity_object: u32,
}

/// Registers the runtime types most graphs need, `UnityEngine.Object` with its `m_CachedPtr`
/// field at offset 16.
pub fn standard_types(builder: &mut SnapshotBuilder) -> StandardTypes {
    let object = builder.add_type(TypeDef::class("System.Object", None, 16));
    let value_type = builder.add_type(TypeDef::class("System.ValueType", Some(object), 16));
    let enum_base = builder.add_type(TypeDef::class("System.Enum", Some(value_type), 16));
    let int32 = builder.add_type(TypeDef::value("System.Int32", Some(value_type), 4));
    let int64 = builder.add_type(TypeDef::value("System.Int64", Some(value_type), 8));
    let byte = builder.add_type(TypeDef::value("System.Byte", Some(value_type), 1));
    let double = builder.add_type(TypeDef::value("System.Double", Some(value_type), 8));
    let intptr = builder.add_type(TypeDef::value("System.IntPtr", Some(value_type), 8));
    let string = builder.add_type(TypeDef::class("System.String", Some(object), 0));
    let unity_object = builder.add_type(TypeDef::class("UnityEngine.Object", Some(object), 24));
    builder.add_field(unity_object, "m_CachedPtr", intptr, 16, false);

    StandardTypes {
        object,
        value_type,
        enum_base,
        int32,
        int64,
        byte,
        double,
        string,
        unity_object,
    }
}
