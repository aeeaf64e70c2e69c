//! Fixed-layout metadata records stored in single-element chapters.
//!
//! # Key Types
//! - [`FormatVersion`]: The capture format revision, with named feature thresholds
//! - [`CaptureFlags`]: Which data categories the capture contains
//! - [`TypeFlags`]: Per-type value-type / array / rank bits
//! - [`VirtualMachineInformation`]: Pointer width and object header geometry of the runtime
//! - [`ProfileTargetInfo`], [`ProfileTargetMemoryStats`]: Target device description and memory summary

use bitflags::bitflags;
use chrono::{DateTime, TimeZone, Utc};
use strum::{Display, FromRepr};

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

/// Revision of the capture format, as stored in the version chapter.
///
/// The value is kept raw so that captures newer than the known revisions still open; use the
/// associated constants to test for individual features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FormatVersion(pub u32);

impl FormatVersion {
    /// Oldest revision carrying capture metadata
    pub const MIN_SUPPORTED: FormatVersion = FormatVersion(8);
    /// Native connections stored as instance ids
    pub const NATIVE_CONNECTIONS_AS_INSTANCE_IDS: FormatVersion = FormatVersion(10);
    /// Adds the profile target info and memory stats records
    pub const PROFILE_TARGET_INFO_AND_MEM_STATS: FormatVersion = FormatVersion(11);
    /// Heap section start addresses carry a VM-heap tag in bit 63
    pub const MEM_LABEL_SIZE_AND_HEAP_ID: FormatVersion = FormatVersion(12);
    /// Scene roots and asset bundle relations
    pub const SCENE_ROOTS_AND_ASSET_BUNDLES: FormatVersion = FormatVersion(13);
    /// Graphics resource references and allocator information
    pub const GFX_RESOURCE_REFERENCES_AND_ALLOCATORS: FormatVersion = FormatVersion(14);
    /// Native object metadata
    pub const NATIVE_OBJECT_META_DATA: FormatVersion = FormatVersion(15);
    /// System memory regions
    pub const SYSTEM_MEMORY_REGIONS: FormatVersion = FormatVersion(16);
    /// System memory resident pages
    pub const SYSTEM_MEMORY_RESIDENT_PAGES: FormatVersion = FormatVersion(17);

    /// Returns `true` if this revision includes everything introduced by `feature`.
    #[must_use]
    pub fn supports(self, feature: FormatVersion) -> bool {
        self >= feature
    }

    /// Returns `true` if heap section start addresses must be tag-decoded.
    #[must_use]
    pub fn heap_addresses_encoded(self) -> bool {
        self.supports(Self::MEM_LABEL_SIZE_AND_HEAP_ID)
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Data categories requested when the capture was taken
    pub struct CaptureFlags: u32 {
        /// Managed heap and type data
        const MANAGED_OBJECTS = 1 << 0;
        /// Native engine objects
        const NATIVE_OBJECTS = 1 << 1;
        /// Native allocations
        const NATIVE_ALLOCATIONS = 1 << 2;
        /// Native allocation sites
        const NATIVE_ALLOCATION_SITES = 1 << 3;
        /// Native stack traces
        const NATIVE_STACK_TRACES = 1 << 4;
    }
}

/// Bitmask selecting the array rank from [`TypeFlags`]
pub const TYPE_FLAGS_RANK_SHIFT: u32 = 16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Runtime classification bits of a type description
    pub struct TypeFlags: u32 {
        /// Instances are stored inline, without an object header
        const VALUE_TYPE = 1 << 0;
        /// The type is an array
        const ARRAY = 1 << 1;
        /// Array rank, in the upper half-word
        const ARRAY_RANK_MASK = 0xFFFF_0000;
    }
}

impl TypeFlags {
    /// Decodes flags from their raw value, keeping the rank bits.
    #[must_use]
    pub fn from_raw(raw: u32) -> TypeFlags {
        TypeFlags::from_bits_truncate(raw)
    }

    /// Number of array dimensions encoded in the rank bits.
    #[must_use]
    pub fn rank(self) -> u32 {
        (self & TypeFlags::ARRAY_RANK_MASK).bits() >> TYPE_FLAGS_RANK_SHIFT
    }

    /// Returns `true` for value types.
    #[must_use]
    pub fn is_value_type(self) -> bool {
        self.contains(TypeFlags::VALUE_TYPE)
    }

    /// Returns `true` for arrays.
    #[must_use]
    pub fn is_array(self) -> bool {
        self.contains(TypeFlags::ARRAY)
    }
}

/// Object geometry of the scripting runtime that produced the capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualMachineInformation {
    /// Width of a pointer in bytes (4 or 8)
    pub pointer_size: i32,
    /// Size of the header preceding every heap object
    pub object_header_size: i32,
    /// Size of the header preceding array elements
    pub array_header_size: i32,
    /// Offset of the bounds pointer inside an array header
    pub array_bounds_offset_in_header: i32,
    /// Offset of the length word inside an array header
    pub array_size_offset_in_header: i32,
    /// Heap allocation granularity
    pub allocation_granularity: i32,
}

impl VirtualMachineInformation {
    /// Size of the packed record
    pub const SIZE: usize = 24;

    /// Decodes the record from its chapter bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is truncated, or [`crate::Error::Malformed`]
    /// if the pointer size is neither 4 nor 8 or a header offset is negative.
    pub fn read(data: &[u8]) -> Result<VirtualMachineInformation> {
        if data.len() < Self::SIZE {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);
        let info = VirtualMachineInformation {
            pointer_size: parser.read_le::<i32>()?,
            object_header_size: parser.read_le::<i32>()?,
            array_header_size: parser.read_le::<i32>()?,
            array_bounds_offset_in_header: parser.read_le::<i32>()?,
            array_size_offset_in_header: parser.read_le::<i32>()?,
            allocation_granularity: parser.read_le::<i32>()?,
        };

        if info.pointer_size != 4 && info.pointer_size != 8 {
            return Err(malformed_error!("Invalid pointer size {}", info.pointer_size));
        }
        if info.object_header_size < 0
            || info.array_header_size < 0
            || info.array_bounds_offset_in_header < 0
            || info.array_size_offset_in_header < 0
        {
            return Err(malformed_error!("Negative object geometry in {:?}", info));
        }

        Ok(info)
    }

    /// Pointer width in bytes.
    #[must_use]
    pub fn pointer_bytes(&self) -> usize {
        self.pointer_size as usize
    }

    /// Object header size in bytes.
    #[must_use]
    pub fn object_header_bytes(&self) -> usize {
        self.object_header_size as usize
    }

    /// Array header size in bytes.
    #[must_use]
    pub fn array_header_bytes(&self) -> usize {
        self.array_header_size as usize
    }
}

/// Scripting backend the target player was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(i32)]
pub enum ScriptingBackend {
    /// Mono JIT / AOT runtime
    Mono2x = 0,
    /// IL2CPP ahead-of-time runtime
    IL2CPP = 1,
    /// Legacy WinRT .NET runtime
    WinRTDotNET = 2,
}

/// Description of the device the capture was taken on.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileTargetInfo {
    /// Capture session identifier
    pub session_guid: u32,
    /// Raw `RuntimePlatform` value
    pub platform: i32,
    /// Raw `GraphicsDeviceType` value
    pub graphics_device_type: i32,
    /// Physical memory of the target in bytes
    pub total_physical_memory: u64,
    /// Graphics memory of the target in bytes
    pub total_graphics_memory: u64,
    /// Raw scripting backend value, see [`ProfileTargetInfo::scripting_backend`]
    pub scripting_backend_raw: i32,
    /// Seconds between player start and capture
    pub time_since_startup: f64,
    /// Engine version string
    pub unity_version: String,
    /// Product name of the captured player
    pub product_name: String,
}

impl ProfileTargetInfo {
    /// Size of the naturally aligned record, including trailing padding
    pub const SIZE: usize = 520;

    /// Decodes the record from its chapter bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than the fixed fields.
    pub fn read(data: &[u8]) -> Result<ProfileTargetInfo> {
        let mut parser = Parser::new(data);

        let session_guid = parser.read_le::<u32>()?;
        let platform = parser.read_le::<i32>()?;
        let graphics_device_type = parser.read_le::<i32>()?;
        parser.advance_by(4)?;
        let total_physical_memory = parser.read_le::<u64>()?;
        let total_graphics_memory = parser.read_le::<u64>()?;
        let scripting_backend_raw = parser.read_le::<i32>()?;
        parser.advance_by(4)?;
        let time_since_startup = parser.read_le::<f64>()?;

        let version_length = parser.read_le::<u32>()? as usize;
        let unity_version = parser.read_fixed_string_utf8(version_length, 16)?;
        let product_length = parser.read_le::<u32>()? as usize;
        let product_name = parser.read_fixed_string_utf8(product_length, 256)?;

        Ok(ProfileTargetInfo {
            session_guid,
            platform,
            graphics_device_type,
            total_physical_memory,
            total_graphics_memory,
            scripting_backend_raw,
            time_since_startup,
            unity_version,
            product_name,
        })
    }

    /// The scripting backend, if it is one of the known values.
    #[must_use]
    pub fn scripting_backend(&self) -> Option<ScriptingBackend> {
        ScriptingBackend::from_repr(self.scripting_backend_raw)
    }
}

impl std::fmt::Display for ProfileTargetInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (Unity {}), platform {}, graphics device {}, backend {}, {} bytes physical, {} bytes graphics, {:.1}s since startup",
            self.product_name,
            self.unity_version,
            self.platform,
            self.graphics_device_type,
            self.scripting_backend()
                .map_or_else(|| self.scripting_backend_raw.to_string(), |b| b.to_string()),
            self.total_physical_memory,
            self.total_graphics_memory,
            self.time_since_startup
        )
    }
}

/// Memory summary of the target at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct ProfileTargetMemoryStats {
    pub total_virtual_memory: u64,
    pub total_used_memory: u64,
    pub total_reserved_memory: u64,
    pub temp_allocator_used_memory: u64,
    pub graphics_used_memory: u64,
    pub audio_used_memory: u64,
    pub gc_heap_used_memory: u64,
    pub gc_heap_reserved_memory: u64,
    pub profiler_used_memory: u64,
    pub profiler_reserved_memory: u64,
    pub memory_profiler_used_memory: u64,
    pub memory_profiler_reserved_memory: u64,
    /// Free block histogram, truncated to the recorded bucket count
    pub free_block_buckets: Vec<u32>,
}

impl ProfileTargetMemoryStats {
    /// Maximum number of free block buckets
    pub const MAX_BUCKETS: usize = 32;

    /// Decodes the record from its chapter bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is truncated.
    pub fn read(data: &[u8]) -> Result<ProfileTargetMemoryStats> {
        let mut parser = Parser::new(data);
        let mut totals = [0u64; 12];
        for total in &mut totals {
            *total = parser.read_le::<u64>()?;
        }

        let bucket_count = (parser.read_le::<u32>()? as usize).min(Self::MAX_BUCKETS);
        let mut free_block_buckets = Vec::with_capacity(bucket_count);
        for _ in 0..bucket_count {
            free_block_buckets.push(parser.read_le::<u32>()?);
        }

        let [total_virtual_memory, total_used_memory, total_reserved_memory, temp_allocator_used_memory, graphics_used_memory, audio_used_memory, gc_heap_used_memory, gc_heap_reserved_memory, profiler_used_memory, profiler_reserved_memory, memory_profiler_used_memory, memory_profiler_reserved_memory] =
            totals;

        Ok(ProfileTargetMemoryStats {
            total_virtual_memory,
            total_used_memory,
            total_reserved_memory,
            temp_allocator_used_memory,
            graphics_used_memory,
            audio_used_memory,
            gc_heap_used_memory,
            gc_heap_reserved_memory,
            profiler_used_memory,
            profiler_reserved_memory,
            memory_profiler_used_memory,
            memory_profiler_reserved_memory,
            free_block_buckets,
        })
    }
}

/// Ticks between 0001-01-01 and the Unix epoch, in 100ns units.
const TICKS_AT_UNIX_EPOCH: i64 = 621_355_968_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Converts a .NET `DateTime` tick count to UTC.
///
/// Returns `None` for tick values outside the representable range.
#[must_use]
pub fn ticks_to_datetime(ticks: i64) -> Option<DateTime<Utc>> {
    let since_epoch = ticks.checked_sub(TICKS_AT_UNIX_EPOCH)?;
    let seconds = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = since_epoch.rem_euclid(TICKS_PER_SECOND) * 100;

    Utc.timestamp_opt(seconds, u32::try_from(nanos).ok()?).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn type_flags_rank() {
        let flags = TypeFlags::from_raw(0x0003_0002);
        assert!(flags.is_array());
        assert!(!flags.is_value_type());
        assert_eq!(flags.rank(), 3);

        assert_eq!(TypeFlags::from_raw(1).rank(), 0);
        assert!(TypeFlags::from_raw(1).is_value_type());
    }

    #[test]
    fn format_version_features() {
        assert!(!FormatVersion(11).heap_addresses_encoded());
        assert!(FormatVersion(12).heap_addresses_encoded());
        assert!(FormatVersion(17).supports(FormatVersion::PROFILE_TARGET_INFO_AND_MEM_STATS));
        assert_eq!(FormatVersion(16).to_string(), "16");
    }

    #[test]
    fn vm_information() {
        let raw: Vec<u8> = [8i32, 16, 32, 16, 24, 8]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();

        let info = VirtualMachineInformation::read(&raw).unwrap();
        assert_eq!(info.pointer_size, 8);
        assert_eq!(info.object_header_size, 16);
        assert_eq!(info.array_header_size, 32);
        assert_eq!(info.array_bounds_offset_in_header, 16);
        assert_eq!(info.array_size_offset_in_header, 24);
        assert_eq!(info.allocation_granularity, 8);

        let mut bad = raw.clone();
        bad[0] = 6;
        assert!(VirtualMachineInformation::read(&bad).is_err());
        assert!(VirtualMachineInformation::read(&raw[..20]).is_err());
    }

    #[test]
    fn profile_target_info() {
        let mut raw = vec![0u8; ProfileTargetInfo::SIZE];
        raw[0..4].copy_from_slice(&42u32.to_le_bytes());
        raw[4..8].copy_from_slice(&2i32.to_le_bytes());
        raw[8..12].copy_from_slice(&18i32.to_le_bytes());
        raw[16..24].copy_from_slice(&(16u64 << 30).to_le_bytes());
        raw[24..32].copy_from_slice(&(4u64 << 30).to_le_bytes());
        raw[32..36].copy_from_slice(&1i32.to_le_bytes());
        raw[40..48].copy_from_slice(&12.5f64.to_le_bytes());
        raw[48..52].copy_from_slice(&10u32.to_le_bytes());
        raw[52..62].copy_from_slice(b"2021.3.5f1");
        raw[68..72].copy_from_slice(&4u32.to_le_bytes());
        raw[72..76].copy_from_slice(b"Game");

        let info = ProfileTargetInfo::read(&raw).unwrap();
        assert_eq!(info.session_guid, 42);
        assert_eq!(info.platform, 2);
        assert_eq!(info.graphics_device_type, 18);
        assert_eq!(info.total_physical_memory, 16 << 30);
        assert_eq!(info.scripting_backend(), Some(ScriptingBackend::IL2CPP));
        assert!((info.time_since_startup - 12.5).abs() < f64::EPSILON);
        assert_eq!(info.unity_version, "2021.3.5f1");
        assert_eq!(info.product_name, "Game");
    }

    #[test]
    fn memory_stats() {
        let mut raw = Vec::new();
        for total in 1u64..=12 {
            raw.extend_from_slice(&total.to_le_bytes());
        }
        raw.extend_from_slice(&3u32.to_le_bytes());
        for bucket in 0u32..32 {
            raw.extend_from_slice(&(bucket * 10).to_le_bytes());
        }
        raw.extend_from_slice(&[0u8; 32]);

        let stats = ProfileTargetMemoryStats::read(&raw).unwrap();
        assert_eq!(stats.total_virtual_memory, 1);
        assert_eq!(stats.gc_heap_used_memory, 7);
        assert_eq!(stats.memory_profiler_reserved_memory, 12);
        assert_eq!(stats.free_block_buckets, vec![0, 10, 20]);
    }

    #[test]
    fn ticks() {
        let epoch = ticks_to_datetime(TICKS_AT_UNIX_EPOCH).unwrap();
        assert_eq!(epoch.timestamp(), 0);

        // 2023-06-01T00:00:00Z
        let date = ticks_to_datetime(TICKS_AT_UNIX_EPOCH + 1_685_577_600 * TICKS_PER_SECOND).unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2023, 6, 1));

        assert!(ticks_to_datetime(i64::MIN).is_none());
    }
}
