//! Field layouts of managed types.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{snapshot::TypeFlags, Result};

/// Resolved description of one field as it appears in a type's layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Index into the field description chapters
    pub field_index: u32,
    /// Type index of the field's declared type
    pub type_index: u32,
    /// Flags of the field's declared type
    pub flags: TypeFlags,
    /// Declared size of the field's type
    pub type_size: i32,
    /// Byte offset of the field within a boxed instance; negative when unresolved
    pub offset: i32,
}

impl FieldInfo {
    /// Returns `true` if the field's type is a value type.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.flags.is_value_type()
    }

    /// Returns `true` if the field's type is an array.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.flags.is_array()
    }
}

/// Memoised instance and static field layouts, keyed by type index.
///
/// Lookups clone the cached `Arc` out of the map before returning so no shard lock outlives the
/// call.
#[derive(Debug, Default)]
pub struct FieldLayoutCache {
    instance: DashMap<u32, Arc<[FieldInfo]>>,
    statics: DashMap<u32, Arc<[FieldInfo]>>,
}

impl FieldLayoutCache {
    /// Returns the cached layout, building it with `build` on a miss.
    ///
    /// # Errors
    /// Propagates any error from `build`; failures are not cached.
    pub fn get_or_build<F>(&self, type_index: u32, want_static: bool, build: F) -> Result<Arc<[FieldInfo]>>
    where
        F: FnOnce() -> Result<Vec<FieldInfo>>,
    {
        let map = if want_static { &self.statics } else { &self.instance };
        if let Some(layout) = map.get(&type_index) {
            return Ok(Arc::clone(layout.value()));
        }

        let layout: Arc<[FieldInfo]> = build()?.into();
        map.insert(type_index, Arc::clone(&layout));
        Ok(layout)
    }

    /// Number of cached layouts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instance.len() + self.statics.len()
    }

    /// Returns `true` if nothing has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(field_index: u32) -> FieldInfo {
        FieldInfo {
            field_index,
            type_index: 0,
            flags: TypeFlags::empty(),
            type_size: 8,
            offset: 16,
        }
    }

    #[test]
    fn builds_once() {
        let cache = FieldLayoutCache::default();
        let mut calls = 0;

        for _ in 0..3 {
            let layout = cache
                .get_or_build(4, false, || {
                    calls += 1;
                    Ok(vec![field(1), field(2)])
                })
                .unwrap();
            assert_eq!(layout.len(), 2);
        }
        assert_eq!(calls, 1);

        let statics = cache.get_or_build(4, true, || Ok(vec![])).unwrap();
        assert!(statics.is_empty());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let cache = FieldLayoutCache::default();

        assert!(cache
            .get_or_build(1, false, || Err(malformed_error!("broken")))
            .is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_build(1, false, || Ok(vec![field(9)])).unwrap()[0].field_index, 9);
    }
}
