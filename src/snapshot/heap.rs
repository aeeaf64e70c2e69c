//! Managed heap sections and address resolution.

use rayon::prelude::*;

use crate::{
    lowlevel::{ChapterReader, EntryType},
    Result,
};

/// Bit 63 of a raw section start address marks a VM heap section in tagged captures.
pub const VM_HEAP_TAG: u64 = 1 << 63;

/// Resolutions further than this from a section start are rejected as non-managed pointers.
const MAX_SECTION_OFFSET: u64 = i32::MAX as u64;

/// One captured region of the managed heap.
#[derive(Debug, Clone)]
pub struct ManagedHeapSection {
    start: u64,
    end: u64,
    is_vm_heap: bool,
    bytes: Vec<u8>,
}

impl ManagedHeapSection {
    /// Creates a section from its raw start address.
    ///
    /// When `addresses_encoded` is set the top bit of `raw_start` is the VM-heap tag and is
    /// stripped from the address.
    #[must_use]
    pub fn new(raw_start: u64, addresses_encoded: bool, bytes: Vec<u8>) -> ManagedHeapSection {
        let (start, is_vm_heap) = if addresses_encoded {
            (raw_start & !VM_HEAP_TAG, raw_start & VM_HEAP_TAG != 0)
        } else {
            (raw_start, false)
        };

        ManagedHeapSection {
            start,
            end: start.saturating_add(bytes.len() as u64),
            is_vm_heap,
            bytes,
        }
    }

    /// First virtual address covered by the section.
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// One past the last virtual address covered by the section.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Returns `true` for VM heap sections, `false` for GC heap sections.
    #[must_use]
    pub fn is_vm_heap(&self) -> bool {
        self.is_vm_heap
    }

    /// The captured section contents.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns `true` if `address` lies in `[start, end)`.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }
}

/// Maps virtual addresses to the captured heap bytes behind them.
///
/// Sections are kept sorted by start address and treated as a non-overlapping partition of the
/// address space. Addresses outside every section (native pointers, garbage) resolve to `None`.
#[derive(Debug, Default)]
pub struct HeapAddressResolver {
    sections: Vec<ManagedHeapSection>,
}

impl HeapAddressResolver {
    /// Builds a resolver over `sections`, sorting them by start address.
    #[must_use]
    pub fn new(mut sections: Vec<ManagedHeapSection>) -> HeapAddressResolver {
        sections.sort_by_key(ManagedHeapSection::start);
        HeapAddressResolver { sections }
    }

    /// Copies every heap section out of the capture.
    ///
    /// Section payloads are independent chapter elements and are read in parallel. A capture
    /// without heap chapters yields an empty resolver.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the start address and byte chapters disagree on the
    /// number of sections, or any error from reading the chapters.
    pub fn load(reader: &ChapterReader, addresses_encoded: bool) -> Result<HeapAddressResolver> {
        if !reader.has_chapter(EntryType::ManagedHeapSectionsStartAddress)
            || !reader.has_chapter(EntryType::ManagedHeapSectionsBytes)
        {
            log::warn!("Snapshot contains no managed heap sections");
            return Ok(HeapAddressResolver::default());
        }

        let starts = reader.read_fixed_array_all::<u64>(EntryType::ManagedHeapSectionsStartAddress)?;
        let count = reader.element_count(EntryType::ManagedHeapSectionsBytes);
        if starts.len() as u64 != count {
            return Err(malformed_error!(
                "Heap section chapters disagree: {} start addresses, {} byte blobs",
                starts.len(),
                count
            ));
        }

        let sections = starts
            .into_par_iter()
            .enumerate()
            .map(|(index, start)| {
                let bytes = reader
                    .read_single_element_from_array(EntryType::ManagedHeapSectionsBytes, index as u64)?
                    .into_owned();
                Ok(ManagedHeapSection::new(start, addresses_encoded, bytes))
            })
            .collect::<Result<Vec<_>>>()?;

        let resolver = HeapAddressResolver::new(sections);
        log::debug!(
            "Loaded {} managed heap sections ({} bytes)",
            resolver.sections.len(),
            resolver.total_bytes()
        );

        Ok(resolver)
    }

    /// All sections, ordered by start address.
    #[must_use]
    pub fn sections(&self) -> &[ManagedHeapSection] {
        &self.sections
    }

    /// Sum of all section sizes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.sections.iter().map(|s| s.bytes.len() as u64).sum()
    }

    /// Index of the section containing `address`.
    #[must_use]
    pub fn section_index(&self, address: u64) -> Option<usize> {
        let candidate = self.sections.partition_point(|s| s.start <= address);
        if candidate == 0 {
            return None;
        }

        let index = candidate - 1;
        self.sections[index].contains(address).then_some(index)
    }

    /// Returns the captured bytes from `address` to the end of its section.
    #[must_use]
    pub fn resolve(&self, address: u64) -> Option<&[u8]> {
        let section = &self.sections[self.section_index(address)?];

        let offset = address - section.start;
        if offset >= MAX_SECTION_OFFSET {
            return None;
        }

        section.bytes.get(offset as usize..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> HeapAddressResolver {
        HeapAddressResolver::new(vec![
            ManagedHeapSection::new(0x3000, false, vec![3; 0x100]),
            ManagedHeapSection::new(0x1000, false, (0..=255).collect()),
            ManagedHeapSection::new(0x2000, false, vec![2; 0x10]),
        ])
    }

    #[test]
    fn resolves_inside_sections() {
        let resolver = resolver();
        assert_eq!(resolver.sections()[0].start(), 0x1000);

        let bytes = resolver.resolve(0x1000).unwrap();
        assert_eq!(bytes.len(), 256);
        assert_eq!(bytes[0], 0);

        let bytes = resolver.resolve(0x10FF).unwrap();
        assert_eq!(bytes, &[255]);

        assert_eq!(resolver.resolve(0x200F).unwrap(), &[2]);
        assert_eq!(resolver.resolve(0x3080).unwrap().len(), 0x80);
    }

    #[test]
    fn gaps_resolve_to_none() {
        let resolver = resolver();

        assert!(resolver.resolve(0).is_none());
        assert!(resolver.resolve(0x0FFF).is_none());
        assert!(resolver.resolve(0x1100).is_none());
        assert!(resolver.resolve(0x2010).is_none());
        assert!(resolver.resolve(0x3100).is_none());
        assert!(resolver.resolve(u64::MAX).is_none());
        assert!(HeapAddressResolver::default().resolve(0x1000).is_none());
    }

    #[test]
    fn tagged_addresses() {
        let tagged = ManagedHeapSection::new(VM_HEAP_TAG | 0x5000, true, vec![0; 8]);
        assert_eq!(tagged.start(), 0x5000);
        assert_eq!(tagged.end(), 0x5008);
        assert!(tagged.is_vm_heap());

        let plain = ManagedHeapSection::new(0x5000, true, vec![0; 8]);
        assert!(!plain.is_vm_heap());

        let untouched = ManagedHeapSection::new(VM_HEAP_TAG | 0x5000, false, vec![0; 8]);
        assert_eq!(untouched.start(), VM_HEAP_TAG | 0x5000);
        assert!(!untouched.is_vm_heap());
    }
}
