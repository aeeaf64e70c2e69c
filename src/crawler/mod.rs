//! The managed heap graph crawler.
//!
//! [`HeapGraph`] materialises every object reachable from the GC handles and static fields of a
//! capture. Each heap address is resolved to a type, sized, copied, and decoded field by field;
//! references are followed recursively. Instances live in an arena indexed by [`InstanceId`] and
//! link to the instance that first reached them, which drives both cycle detection and the
//! retention paths built by [`crate::leak`].
//!
//! Per-object problems (unresolvable types, dangling pointers, corrupt lengths, cycles, depth
//! limit) never abort the crawl: they are logged, folded into [`FieldValue`] states or
//! [`CrawlState`]s, and counted in [`CrawlDiagnostics`]. Only structural metadata errors
//! propagate.
//!
//! # Examples
//!
//! ```rust,no_run
//! use heapscope::{CrawlConfig, HeapGraph, SnapshotFile};
//!
//! let snapshot = SnapshotFile::from_file("capture.snap")?;
//! let mut graph = HeapGraph::new(&snapshot, CrawlConfig::default());
//! let summary = graph.crawl()?;
//! println!("{} instances from {} roots", summary.instances, summary.gc_roots);
//! # Ok::<(), heapscope::Error>(())
//! ```

mod config;
mod instance;
mod object;
mod value;

pub use config::CrawlConfig;
pub use instance::{CrawlState, InstanceId, LoadedReason, ManagedClassInstance};
pub use object::{array_length, element_type, object_size, parse_object, ElementType, RawManagedObjectInfo};
pub use value::{FieldValue, Target};

use std::{collections::HashMap, sync::Arc, time::Instant};

use crate::{
    file::io::read_le,
    snapshot::{Primitive, SnapshotFile, TypeFlags},
    Error, Result,
};

/// Totals of a completed crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CrawlSummary {
    /// GC handles processed
    pub gc_roots: usize,
    /// Instances added by following static fields
    pub from_static_fields: usize,
    /// Distinct addressed instances in the graph
    pub instances: usize,
    /// Per-object problems met so far
    pub diagnostics: CrawlDiagnostics,
}

/// Counts of the per-object problems a crawl recovered from.
///
/// Cycle stops occur in any graph with back-references and are not counted by
/// [`CrawlDiagnostics::is_clean`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CrawlDiagnostics {
    /// Addresses inside the captured heap whose type or size could not be resolved
    pub unknown_types: usize,
    /// Reference and string slots whose non-null pointer did not lead to an object
    pub unresolved_pointers: usize,
    /// Arrays whose length exceeds the captured bytes
    pub corrupt_array_lengths: usize,
    /// Arrays cut short by [`CrawlConfig::max_array_elements`]
    pub capped_arrays: usize,
    /// Instances stopped because an ancestor has the same address
    pub cycle_stops: usize,
    /// Instances stopped by [`CrawlConfig::max_depth`]
    pub depth_stops: usize,
}

impl CrawlDiagnostics {
    /// Returns `true` if nothing was lost or left unresolved.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unknown_types == 0
            && self.unresolved_pointers == 0
            && self.corrupt_array_lengths == 0
            && self.capped_arrays == 0
            && self.depth_stops == 0
    }
}

/// The managed object graph of one capture.
pub struct HeapGraph<'s> {
    snapshot: &'s SnapshotFile,
    config: CrawlConfig,
    objects: HashMap<u64, Option<Arc<RawManagedObjectInfo>>>,
    instances: Vec<ManagedClassInstance>,
    by_address: HashMap<u64, InstanceId>,
    static_owners: HashMap<u32, u32>,
    diagnostics: CrawlDiagnostics,
}

impl<'s> HeapGraph<'s> {
    /// Creates an empty graph over `snapshot`.
    #[must_use]
    pub fn new(snapshot: &'s SnapshotFile, config: CrawlConfig) -> HeapGraph<'s> {
        HeapGraph {
            snapshot,
            config,
            objects: HashMap::new(),
            instances: Vec::new(),
            by_address: HashMap::new(),
            static_owners: HashMap::new(),
            diagnostics: CrawlDiagnostics::default(),
        }
    }

    /// The capture this graph is built from.
    #[must_use]
    pub fn snapshot(&self) -> &'s SnapshotFile {
        self.snapshot
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Crawls the GC roots and, unless disabled, the static fields.
    ///
    /// # Errors
    /// Returns structural metadata errors; per-object failures are logged and skipped.
    pub fn crawl(&mut self) -> Result<CrawlSummary> {
        let gc_roots = self.crawl_gc_roots()?;
        let from_static_fields = if self.config.crawl_static_fields {
            self.crawl_static_fields()?
        } else {
            0
        };

        if !self.diagnostics.is_clean() {
            log::warn!("Crawl recovered from per-object problems: {:?}", self.diagnostics);
        }

        Ok(CrawlSummary {
            gc_roots,
            from_static_fields,
            instances: self.instance_count(),
            diagnostics: self.diagnostics,
        })
    }

    /// Per-object problems recorded since the graph was created.
    #[must_use]
    pub fn diagnostics(&self) -> &CrawlDiagnostics {
        &self.diagnostics
    }

    /// Materialises the targets of every GC handle. Returns the number of handles processed.
    ///
    /// # Errors
    /// Returns structural metadata errors; per-object failures are logged and skipped.
    pub fn crawl_gc_roots(&mut self) -> Result<usize> {
        let roots = self.snapshot.gc_handles()?;
        let start = Instant::now();

        log::info!("Processing {} GC roots...", roots.len());
        for &root in &roots {
            if root != 0 {
                self.get_or_create(root, None, 0, LoadedReason::GcRoot)?;
            }
        }

        log::info!(
            "Found {} managed objects in {}ms",
            self.instance_count(),
            start.elapsed().as_millis()
        );
        Ok(roots.len())
    }

    /// Follows the reference-typed static fields of every type. Returns the number of instances
    /// added.
    ///
    /// Records the declaring type of every static field visited, see
    /// [`HeapGraph::static_owner`]. Value-type statics and fields with unresolved offsets are
    /// skipped.
    ///
    /// # Errors
    /// Returns structural metadata errors; per-object failures are logged and skipped.
    pub fn crawl_static_fields(&mut self) -> Result<usize> {
        let snapshot = self.snapshot;
        let start = Instant::now();
        let before = self.instance_count();

        log::info!("Processing static field info for {} types...", snapshot.type_count());
        for type_index in 0..snapshot.type_count() {
            let storage = snapshot.static_field_bytes(type_index)?;
            if storage.is_empty() {
                continue;
            }

            for field in snapshot.static_fields(type_index)?.iter() {
                self.static_owners.insert(field.field_index, type_index);
                if field.is_value_type() {
                    continue;
                }

                let Ok(offset) = usize::try_from(field.offset) else {
                    continue;
                };
                let pointer = storage
                    .get(offset..)
                    .and_then(|slot| snapshot.read_pointer(slot))
                    .unwrap_or(0);
                if pointer == 0 {
                    continue;
                }

                self.get_or_create(pointer, None, 0, LoadedReason::StaticField(field.field_index))?;
            }
        }

        let added = self.instance_count() - before;
        log::info!(
            "Found {} additional managed objects from static fields in {}ms",
            added,
            start.elapsed().as_millis()
        );
        Ok(added)
    }

    /// Returns the instance at `address`, materialising it (and everything it references) on
    /// first visit.
    ///
    /// Returns `Ok(None)` if the address does not hold an object of a known type.
    ///
    /// # Errors
    /// Returns structural metadata errors.
    pub fn get_or_create(
        &mut self,
        address: u64,
        parent: Option<InstanceId>,
        depth: u32,
        reason: LoadedReason,
    ) -> Result<Option<InstanceId>> {
        if let Some(&id) = self.by_address.get(&address) {
            return Ok(Some(id));
        }

        let Some(info) = self.raw_object(address)? else {
            return Ok(None);
        };

        let id = self.push(ManagedClassInstance::new(
            address,
            info.type_index,
            info.flags,
            parent,
            reason,
        ));

        let (fields, state) = if info.flags.is_array() {
            self.array_elements(id, &info, depth)?
        } else {
            self.object_fields(id, info.type_index, &info.data, 0, depth)?
        };
        self.finish(id, fields, state);

        self.by_address.insert(address, id);
        Ok(Some(id))
    }

    /// Materialises an inline value type from its raw bytes.
    ///
    /// Enums decode to a single integer of their declared width; other value types decode their
    /// fields with offsets adjusted for the missing object header. The instance has address 0
    /// and is not cached by address.
    ///
    /// # Errors
    /// Returns [`Error::Precondition`] if `flags` does not describe a value type, and structural
    /// metadata errors.
    pub fn value_type_instance(
        &mut self,
        type_index: u32,
        flags: TypeFlags,
        data: &[u8],
        parent: Option<InstanceId>,
        depth: u32,
        reason: LoadedReason,
    ) -> Result<InstanceId> {
        if !flags.is_value_type() {
            return Err(Error::Precondition(format!(
                "type {type_index} is not a value type (flags {flags:?})"
            )));
        }

        let id = self.push(ManagedClassInstance::new(0, type_index, flags, parent, reason));

        let (fields, state) = if self.snapshot.is_enum(type_index) {
            let value = read_integer(data, data.len()).map_or_else(
                || {
                    log::warn!("Invalid enum size {} for type {}", data.len(), type_index);
                    FieldValue::Unreadable
                },
                FieldValue::Integer,
            );
            (vec![value], CrawlState::Complete)
        } else {
            let header = self.snapshot.vm_info().object_header_bytes();
            self.object_fields(id, type_index, data, header, depth)?
        };
        self.finish(id, fields, state);

        Ok(id)
    }

    /// Resolves, sizes and copies the object at `address`, caching the outcome.
    ///
    /// # Errors
    /// Returns structural metadata errors.
    pub fn raw_object(&mut self, address: u64) -> Result<Option<Arc<RawManagedObjectInfo>>> {
        if let Some(cached) = self.objects.get(&address) {
            return Ok(cached.clone());
        }

        let info = parse_object(self.snapshot, address)?.map(Arc::new);
        if info.is_none() && self.snapshot.heap().resolve(address).is_some() {
            self.diagnostics.unknown_types += 1;
        }
        self.objects.insert(address, info.clone());
        Ok(info)
    }

    fn push(&mut self, instance: ManagedClassInstance) -> InstanceId {
        let id = InstanceId(self.instances.len());
        self.instances.push(instance);
        id
    }

    fn finish(&mut self, id: InstanceId, fields: Vec<FieldValue>, state: CrawlState) {
        let instance = &mut self.instances[id.0];
        instance.fields = fields;
        instance.state = state;
    }

    /// Cycle and depth checks run before any field of `id` is decoded.
    fn stop_state(&mut self, id: InstanceId, depth: u32) -> Option<CrawlState> {
        let instance = &self.instances[id.0];
        if instance.address != 0 && self.has_ancestor_at(instance.parent, instance.address) {
            self.diagnostics.cycle_stops += 1;
            return Some(CrawlState::CycleStopped);
        }

        if depth > self.config.max_depth {
            log::warn!(
                "Stopped reading fields due to too-deeply nested object at depth {}",
                depth
            );
            self.diagnostics.depth_stops += 1;
            return Some(CrawlState::DepthStopped);
        }

        None
    }

    fn has_ancestor_at(&self, mut current: Option<InstanceId>, address: u64) -> bool {
        while let Some(id) = current {
            let ancestor = &self.instances[id.0];
            if ancestor.address == address {
                return true;
            }
            current = ancestor.parent;
        }
        false
    }

    /// Decodes the instance fields of `type_index` from `data`. `header_adjust` is subtracted
    /// from every field offset (the object header size for inline value types, 0 otherwise).
    fn object_fields(
        &mut self,
        id: InstanceId,
        type_index: u32,
        data: &[u8],
        header_adjust: usize,
        depth: u32,
    ) -> Result<(Vec<FieldValue>, CrawlState)> {
        if let Some(state) = self.stop_state(id, depth) {
            return Ok((Vec::new(), state));
        }

        let layout = self.snapshot.instance_fields(type_index)?;
        let mut fields = Vec::with_capacity(layout.len());
        for field in layout.iter() {
            let slot = usize::try_from(field.offset)
                .ok()
                .and_then(|offset| offset.checked_sub(header_adjust))
                .and_then(|offset| data.get(offset..));

            let value = match slot {
                Some(slot) => self.decode_value(
                    slot,
                    field.type_index,
                    field.flags,
                    field.type_size,
                    id,
                    depth + 1,
                    LoadedReason::InstanceField(field.field_index),
                )?,
                None => FieldValue::Unreadable,
            };
            fields.push(value);
        }

        Ok((fields, CrawlState::Complete))
    }

    fn array_elements(
        &mut self,
        id: InstanceId,
        info: &RawManagedObjectInfo,
        depth: u32,
    ) -> Result<(Vec<FieldValue>, CrawlState)> {
        if let Some(state) = self.stop_state(id, depth) {
            return Ok((Vec::new(), state));
        }
        if !self.config.decode_array_elements {
            return Ok((Vec::new(), CrawlState::Complete));
        }

        let length = array_length(self.snapshot, info.flags, &info.data);
        let element = element_type(self.snapshot, info.type_index)?;
        let header = self.snapshot.vm_info().array_header_bytes();

        let available = info.data.len().saturating_sub(header) / element.size;
        if length > available {
            self.diagnostics.corrupt_array_lengths += 1;
            log::warn!(
                "Array at 0x{:X} claims {} elements but only {} are captured",
                info.address,
                length,
                available
            );
        }
        let count = length.min(available);
        if count > self.config.max_array_elements {
            self.diagnostics.capped_arrays += 1;
            log::warn!(
                "Decoding {} of {} elements of array at 0x{:X}",
                self.config.max_array_elements,
                count,
                info.address
            );
        }
        let count = count.min(self.config.max_array_elements);

        let mut elements = Vec::with_capacity(count);
        for index in 0..count {
            let slot = &info.data[header + index * element.size..];
            elements.push(self.decode_value(
                slot,
                element.type_index,
                element.flags,
                element.size as i32,
                id,
                depth + 1,
                LoadedReason::ArrayElement(index as u32),
            )?);
        }

        Ok((elements, CrawlState::Complete))
    }

    /// Decodes one field or array slot according to its declared type.
    #[allow(clippy::too_many_arguments)]
    fn decode_value(
        &mut self,
        slot: &[u8],
        type_index: u32,
        flags: TypeFlags,
        type_size: i32,
        parent: InstanceId,
        depth: u32,
        reason: LoadedReason,
    ) -> Result<FieldValue> {
        let snapshot = self.snapshot;

        if let Some(primitive) = snapshot.well_known().classify(type_index).and_then(|t| t.primitive()) {
            return match primitive {
                Primitive::Integer(width) => {
                    Ok(read_integer(slot, width).map_or(FieldValue::Unreadable, FieldValue::Integer))
                }
                Primitive::Float32 => Ok(read_le::<f32>(slot)
                    .map_or(FieldValue::Unreadable, |v| FieldValue::FloatingPoint(f64::from(v)))),
                Primitive::Float64 => {
                    Ok(read_le::<f64>(slot).map_or(FieldValue::Unreadable, FieldValue::FloatingPoint))
                }
                Primitive::String => self.decode_string(slot),
            };
        }

        if snapshot.is_enum(type_index) {
            return self.decode_enum(slot, type_index);
        }

        if flags.is_value_type() {
            if let Ok(size) = usize::try_from(type_size) {
                if size > 0 {
                    let inline = &slot[..size.min(slot.len())];
                    let id = self.value_type_instance(type_index, flags, inline, Some(parent), depth, reason)?;
                    return Ok(FieldValue::Reference(Target::Resolved(id)));
                }
            }
        }

        let Some(pointer) = snapshot.read_pointer(slot) else {
            return Ok(FieldValue::Unreadable);
        };
        if pointer == 0 {
            return Ok(FieldValue::Reference(Target::Null));
        }

        Ok(FieldValue::Reference(
            match self.get_or_create(pointer, Some(parent), depth, reason)? {
                Some(id) => Target::Resolved(id),
                None => {
                    self.diagnostics.unresolved_pointers += 1;
                    Target::Unresolved(pointer)
                }
            },
        ))
    }

    fn decode_string(&mut self, slot: &[u8]) -> Result<FieldValue> {
        let Some(pointer) = self.snapshot.read_pointer(slot) else {
            return Ok(FieldValue::Unreadable);
        };
        if pointer == 0 {
            return Ok(FieldValue::String(Target::Null));
        }

        let header = self.snapshot.vm_info().object_header_bytes();
        let text = self
            .raw_object(pointer)?
            .and_then(|info| info.string_value(header));

        Ok(FieldValue::String(match text {
            Some(text) => Target::Resolved(text),
            None => {
                self.diagnostics.unresolved_pointers += 1;
                Target::Unresolved(pointer)
            }
        }))
    }

    fn decode_enum(&mut self, slot: &[u8], type_index: u32) -> Result<FieldValue> {
        let snapshot = self.snapshot;

        let backing = snapshot
            .instance_fields(type_index)?
            .iter()
            .rev()
            .find_map(|field| match snapshot.well_known().classify(field.type_index)?.primitive()? {
                Primitive::Integer(width) => Some(width),
                _ => None,
            });
        let width = match backing {
            Some(width) => width,
            None => usize::try_from(snapshot.type_size(type_index)?).unwrap_or(0),
        };

        Ok(match read_integer(slot, width) {
            Some(value) => FieldValue::Enum { type_index, value },
            None => {
                log::warn!("Enum type {} has unsupported width {}", type_index, width);
                FieldValue::Unreadable
            }
        })
    }

    /// An instance by handle.
    ///
    /// # Panics
    /// Panics if `id` was not produced by this graph.
    #[must_use]
    pub fn instance(&self, id: InstanceId) -> &ManagedClassInstance {
        &self.instances[id.0]
    }

    /// The instance cached for `address`.
    #[must_use]
    pub fn instance_at(&self, address: u64) -> Option<InstanceId> {
        self.by_address.get(&address).copied()
    }

    /// Handles of every addressed instance, in discovery order.
    #[must_use]
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.by_address.values().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Every addressed instance, in discovery order.
    pub fn instances(&self) -> impl Iterator<Item = (InstanceId, &ManagedClassInstance)> + '_ {
        self.instance_ids().into_iter().map(|id| (id, self.instance(id)))
    }

    /// Number of addressed instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.by_address.len()
    }

    /// Declaring type of a static field visited by [`HeapGraph::crawl_static_fields`].
    #[must_use]
    pub fn static_owner(&self, field_index: u32) -> Option<u32> {
        self.static_owners.get(&field_index).copied()
    }

    /// Returns `true` if the instance's type derives from `base`.
    #[must_use]
    pub fn inherits_from(&self, id: InstanceId, base: u32) -> bool {
        let instance = self.instance(id);
        !instance.is_array() && self.snapshot.inherits_from(instance.type_index, base)
    }
}

/// Reads a little-endian integer of 1, 2, 4 or 8 bytes as a signed value.
///
/// Single bytes are zero-extended.
fn read_integer(slot: &[u8], width: usize) -> Option<i64> {
    match width {
        1 => slot.first().map(|&b| i64::from(b)),
        2 => read_le::<i16>(slot).ok().map(i64::from),
        4 => read_le::<i32>(slot).ok().map(i64::from),
        8 => read_le::<i64>(slot).ok(),
        _ => None,
    }
}
