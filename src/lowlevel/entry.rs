//! Chapter kinds and storage formats.

use strum::{Display, EnumCount, EnumIter, FromRepr};

/// Every chapter kind a snapshot directory can reference, in directory order.
///
/// The directory's entry offset table is indexed by the discriminant of this enum. Only the
/// managed-side subset is consumed by the heap crawler; the remaining kinds are listed so
/// that directory indices stay aligned across format versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumCount, EnumIter, FromRepr)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum EntryType {
    MetadataVersion = 0,
    MetadataRecordDate,
    MetadataUserMetadata,
    MetadataCaptureFlags,
    MetadataVirtualMachineInformation,
    NativeTypesName,
    NativeTypesNativeBaseTypeArrayIndex,
    NativeObjectsNativeTypeArrayIndex,
    NativeObjectsHideFlags,
    NativeObjectsFlags,
    NativeObjectsInstanceId,
    NativeObjectsName,
    NativeObjectsNativeObjectAddress,
    NativeObjectsSize,
    NativeObjectsRootReferenceId,
    GcHandlesTarget,
    ConnectionsFrom,
    ConnectionsTo,
    ManagedHeapSectionsStartAddress,
    ManagedHeapSectionsBytes,
    ManagedStacksStartAddress,
    ManagedStacksBytes,
    TypeDescriptionsFlags,
    TypeDescriptionsName,
    TypeDescriptionsAssembly,
    TypeDescriptionsFieldIndices,
    TypeDescriptionsStaticFieldBytes,
    TypeDescriptionsBaseOrElementTypeIndex,
    TypeDescriptionsSize,
    TypeDescriptionsTypeInfoAddress,
    TypeDescriptionsTypeIndex,
    FieldDescriptionsOffset,
    FieldDescriptionsTypeIndex,
    FieldDescriptionsName,
    FieldDescriptionsIsStatic,
    NativeRootReferencesId,
    NativeRootReferencesAreaName,
    NativeRootReferencesObjectName,
    NativeRootReferencesAccumulatedSize,
    NativeAllocationsMemoryRegionIndex,
    NativeAllocationsRootReferenceId,
    NativeAllocationsAllocationSiteId,
    NativeAllocationsAddress,
    NativeAllocationsSize,
    NativeAllocationsOverheadSize,
    NativeAllocationsPaddingSize,
    NativeMemoryRegionsName,
    NativeMemoryRegionsParentIndex,
    NativeMemoryRegionsAddressBase,
    NativeMemoryRegionsAddressSize,
    NativeMemoryRegionsFirstAllocationIndex,
    NativeMemoryRegionsNumAllocations,
    NativeMemoryLabelsName,
    NativeAllocationSitesId,
    NativeAllocationSitesMemoryLabelIndex,
    NativeAllocationSitesCallstackSymbols,
    NativeCallstackSymbolSymbol,
    NativeCallstackSymbolReadableStackTrace,
    NativeObjectsGcHandleIndex,
    ProfileTargetInfo,
    ProfileTargetMemoryStats,
    NativeMemoryLabelsSize,
    SceneObjectsName,
    SceneObjectsPath,
    SceneObjectsAssetPath,
    SceneObjectsBuildIndex,
    SceneObjectsRootIdCounts,
    SceneObjectsRootIdOffsets,
    SceneObjectsRootIds,
    NativeMemoryLabelsAllocatorIdentifier,
    NativeGfxResourceReferencesId,
    NativeGfxResourceReferencesSize,
    NativeGfxResourceReferencesRootId,
    NativeAllocatorInfoAllocatorName,
    NativeAllocatorInfoIdentifier,
    NativeAllocatorInfoUsedSize,
    NativeAllocatorInfoReservedSize,
    NativeAllocatorInfoOverheadSize,
    NativeAllocatorInfoPeakUsedSize,
    NativeAllocatorInfoAllocationCount,
    NativeAllocatorInfoFlags,
}

/// How a chapter lays out its elements inside its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(u16)]
pub enum EntryFormat {
    /// Present in the enumeration but never valid in a chapter header.
    Undefined = 0,
    /// One element of `entries_meta` bytes at block offset `header_meta`.
    SingleElement = 1,
    /// `header_meta` elements of `entries_meta` bytes each.
    ConstantSizeElementArray = 2,
    /// `entries_meta` elements whose cumulative end offsets follow the chapter header.
    DynamicSizeElementArray = 3,
}
